use super::{CacheBackend, CacheEntry, KeyPattern};
use crate::error::{ClientError, ClientResult};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};
use uuid::Uuid;

/// Durable backend storing one JSON document per entry.
///
/// File names are the farmhash fingerprint of the key; the key itself is kept
/// inside the document so collisions read as misses. Writes land in a temp
/// file and are renamed into place, so readers never see a partial entry.
pub struct DiskBackend {
    directory: PathBuf,
}

impl DiskBackend {
    pub async fn new(directory: impl AsRef<Path>) -> ClientResult<Self> {
        let directory = directory.as_ref().to_path_buf();
        fs::create_dir_all(&directory).await?;
        debug!("Disk cache directory: {}", directory.display());
        Ok(Self { directory })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.directory
            .join(format!("{:016x}.json", farmhash::fingerprint64(key.as_bytes())))
    }

    async fn read_entry(path: &Path) -> ClientResult<Option<CacheEntry>> {
        match fs::read(path).await {
            Ok(bytes) => {
                let entry = serde_json::from_slice(&bytes).map_err(|e| {
                    ClientError::CacheError(format!("Corrupt cache file {}: {}", path.display(), e))
                })?;
                Ok(Some(entry))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub(crate) async fn entry_files(&self) -> ClientResult<Vec<PathBuf>> {
        let mut files = Vec::new();
        let mut dir = fs::read_dir(&self.directory).await?;
        while let Some(item) = dir.next_entry().await? {
            let path = item.path();
            if path.extension().and_then(|ext| ext.to_str()) == Some("json") {
                files.push(path);
            }
        }
        Ok(files)
    }

    async fn remove_file(path: &Path) -> ClientResult<bool> {
        match fs::remove_file(path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl CacheBackend for DiskBackend {
    fn name(&self) -> &'static str {
        "disk"
    }

    async fn get(&self, key: &str) -> ClientResult<Option<CacheEntry>> {
        let entry = Self::read_entry(&self.path_for(key)).await?;
        Ok(entry.filter(|entry| entry.key == key))
    }

    async fn set(&self, entry: CacheEntry) -> ClientResult<usize> {
        let path = self.path_for(&entry.key);
        let serialized = serde_json::to_vec(&entry)?;

        let tmp = self.directory.join(format!(".{}.tmp", Uuid::new_v4()));
        fs::write(&tmp, serialized).await?;
        if let Err(e) = fs::rename(&tmp, &path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(0)
    }

    async fn remove(&self, key: &str) -> ClientResult<bool> {
        let path = self.path_for(key);
        match Self::read_entry(&path).await {
            Ok(Some(entry)) if entry.key == key => Self::remove_file(&path).await,
            Ok(_) => Ok(false),
            // An unreadable file under this key's name is removed regardless
            Err(_) => Self::remove_file(&path).await,
        }
    }

    async fn invalidate(&self, pattern: &KeyPattern) -> ClientResult<usize> {
        let mut removed = 0;
        for path in self.entry_files().await? {
            match Self::read_entry(&path).await {
                Ok(Some(entry)) if pattern.matches(&entry.key) => {
                    if Self::remove_file(&path).await? {
                        removed += 1;
                    }
                }
                Ok(_) => {}
                Err(e) => warn!("Skipping unreadable cache file: {}", e),
            }
        }
        Ok(removed)
    }

    async fn clear(&self) -> ClientResult<()> {
        for path in self.entry_files().await? {
            Self::remove_file(&path).await?;
        }
        Ok(())
    }
}
