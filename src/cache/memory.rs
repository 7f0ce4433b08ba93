use super::{CacheBackend, CacheEntry, KeyPattern};
use crate::error::ClientResult;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Process-local backend. Oldest entries are evicted once `max_entries` is reached.
pub struct MemoryBackend {
    entries: RwLock<HashMap<String, CacheEntry>>,
    max_entries: Option<usize>,
}

impl MemoryBackend {
    pub fn new(max_entries: Option<usize>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            max_entries: max_entries.filter(|max| *max > 0),
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> ClientResult<Option<CacheEntry>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, entry: CacheEntry) -> ClientResult<usize> {
        let mut entries = self.entries.write().await;
        let mut evicted = 0;

        if let Some(max) = self.max_entries {
            if !entries.contains_key(&entry.key) {
                while entries.len() >= max {
                    let oldest = entries
                        .values()
                        .min_by_key(|e| e.inserted_at)
                        .map(|e| e.key.clone());
                    match oldest {
                        Some(key) => {
                            entries.remove(&key);
                            evicted += 1;
                        }
                        None => break,
                    }
                }
            }
        }

        entries.insert(entry.key.clone(), entry);
        Ok(evicted)
    }

    async fn remove(&self, key: &str) -> ClientResult<bool> {
        Ok(self.entries.write().await.remove(key).is_some())
    }

    async fn invalidate(&self, pattern: &KeyPattern) -> ClientResult<usize> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|key, _| !pattern.matches(key));
        Ok(before - entries.len())
    }

    async fn clear(&self) -> ClientResult<()> {
        self.entries.write().await.clear();
        Ok(())
    }
}
