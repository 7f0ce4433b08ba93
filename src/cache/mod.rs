/// Response caching module
///
/// This module implements the process-wide HTTP response cache:
/// - `CacheService`: lookups, stores, pattern invalidation and metrics
/// - Pluggable backends: in-memory, on-disk, Redis
/// - Request-identity keys (`CacheKey`)
/// - A process default instance with first-writer-wins installation

mod disk;
mod key;
mod memory;
mod redis_client;

#[cfg(test)]
mod tests;

pub use disk::DiskBackend;
pub use key::CacheKey;
pub(crate) use key::is_credential_param;
pub use memory::MemoryBackend;
pub use redis_client::RedisBackend;

use crate::config::{CacheBackendKind, CacheConfig};
use crate::error::{ClientError, ClientResult};
use crate::http::HttpResponse;
use crate::observability::logging::sanitize_cache_key;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Cached HTTP response payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedResponse {
    pub status: u16,
    pub body: String,
}

impl From<HttpResponse> for CachedResponse {
    fn from(response: HttpResponse) -> Self {
        Self {
            status: response.status,
            body: response.body,
        }
    }
}

/// One stored response. Entries are replaced, never mutated in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub payload: CachedResponse,
    pub inserted_at: DateTime<Utc>,
    pub ttl: Option<Duration>,
}

impl CacheEntry {
    pub fn new(key: impl Into<String>, payload: CachedResponse, ttl: Option<Duration>) -> Self {
        Self {
            key: key.into(),
            payload,
            inserted_at: Utc::now(),
            ttl,
        }
    }

    /// Whether the entry's TTL has elapsed at `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        let Some(ttl) = self.ttl else {
            return false;
        };
        match chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| self.inserted_at.checked_add_signed(ttl))
        {
            Some(expires_at) => expires_at <= now,
            // A TTL too large to represent never expires
            None => false,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Time left before expiry, `None` when the entry never expires
    pub fn remaining_ttl(&self) -> Option<Duration> {
        let ttl = self.ttl?;
        let elapsed = (Utc::now() - self.inserted_at).to_std().unwrap_or_default();
        Some(ttl.saturating_sub(elapsed))
    }
}

/// Glob pattern (`*` and `?`) over cache keys
#[derive(Debug, Clone)]
pub struct KeyPattern {
    glob: String,
    regex: Regex,
}

impl KeyPattern {
    pub fn new(glob: &str) -> ClientResult<Self> {
        let mut expr = String::with_capacity(glob.len() + 8);
        expr.push('^');
        for ch in glob.chars() {
            match ch {
                '*' => expr.push_str(".*"),
                '?' => expr.push('.'),
                other => expr.push_str(&regex::escape(other.encode_utf8(&mut [0u8; 4]))),
            }
        }
        expr.push('$');

        let regex = Regex::new(&expr)
            .map_err(|e| ClientError::CacheError(format!("Invalid key pattern '{}': {}", glob, e)))?;
        Ok(Self {
            glob: glob.to_string(),
            regex,
        })
    }

    pub fn matches(&self, key: &str) -> bool {
        self.regex.is_match(key)
    }

    pub fn as_glob(&self) -> &str {
        &self.glob
    }

    /// The same pattern for Redis `SCAN MATCH`, where `[`, `]` and `\` are special
    pub fn to_redis_glob(&self) -> String {
        let mut glob = String::with_capacity(self.glob.len());
        for ch in self.glob.chars() {
            if matches!(ch, '[' | ']' | '\\') {
                glob.push('\\');
            }
            glob.push(ch);
        }
        glob
    }
}

/// Storage backend behind the cache service.
///
/// Backends receive fully prefixed keys. Errors are reported to the service,
/// which counts them and degrades to a miss.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Short backend name for logs
    fn name(&self) -> &'static str;

    async fn get(&self, key: &str) -> ClientResult<Option<CacheEntry>>;

    /// Store an entry, returning how many other entries were evicted for room
    async fn set(&self, entry: CacheEntry) -> ClientResult<usize>;

    async fn remove(&self, key: &str) -> ClientResult<bool>;

    /// Remove all entries whose key matches, returning the count
    async fn invalidate(&self, pattern: &KeyPattern) -> ClientResult<usize>;

    async fn clear(&self) -> ClientResult<()>;
}

/// Internal cache statistics with atomic counters for thread safety
#[derive(Debug, Default)]
struct CacheStatsInternal {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    sets: AtomicU64,
    errors: AtomicU64,
}

impl CacheStatsInternal {
    fn to_metrics(&self) -> CacheMetrics {
        CacheMetrics {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            sets: self.sets.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }

    fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.evictions.store(0, Ordering::Relaxed);
        self.sets.store(0, Ordering::Relaxed);
        self.errors.store(0, Ordering::Relaxed);
    }
}

/// Snapshot of cache counters
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct CacheMetrics {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub sets: u64,
    pub errors: u64,
}

impl CacheMetrics {
    /// hits / (hits + misses), 0.0 before the first lookup
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Cache service shared by every request issued in the process
pub struct CacheService {
    backend: Arc<dyn CacheBackend>,
    enabled: bool,
    key_prefix: String,
    default_ttl: Option<Duration>,
    stats: CacheStatsInternal,
}

impl CacheService {
    /// Create a service over an explicit backend
    pub fn new(backend: Arc<dyn CacheBackend>, key_prefix: impl Into<String>, default_ttl: Option<Duration>) -> Self {
        Self {
            backend,
            enabled: true,
            key_prefix: key_prefix.into(),
            default_ttl,
            stats: CacheStatsInternal::default(),
        }
    }

    /// Unbounded in-memory cache without key prefix
    pub fn in_memory(default_ttl: Option<Duration>) -> Self {
        Self::new(Arc::new(MemoryBackend::new(None)), "", default_ttl)
    }

    /// Build the backend selected by `config`
    pub async fn from_config(config: &CacheConfig) -> ClientResult<Self> {
        let backend: Arc<dyn CacheBackend> = match config.backend {
            CacheBackendKind::Memory => Arc::new(MemoryBackend::new(config.max_entries)),
            CacheBackendKind::Disk => Arc::new(DiskBackend::new(&config.directory).await?),
            CacheBackendKind::Redis => {
                Arc::new(RedisBackend::new(config.redis.clone(), config.key_prefix.clone()).await?)
            }
        };

        info!(
            "Initialized {} response cache (enabled: {}, ttl: {:?})",
            backend.name(),
            config.enabled,
            config.ttl
        );

        let mut service = Self::new(backend, config.key_prefix.clone(), config.ttl);
        service.enabled = config.enabled;
        Ok(service)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    fn full_key(&self, key: &CacheKey) -> String {
        format!("{}{}", self.key_prefix, key.as_str())
    }

    /// Look up a response. Absent, expired and unreadable entries are misses.
    pub async fn get(&self, key: &CacheKey) -> Option<CachedResponse> {
        if !self.enabled {
            return None;
        }
        let full_key = self.full_key(key);

        match self.backend.get(&full_key).await {
            Ok(Some(entry)) if entry.is_expired() => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                match self.backend.remove(&full_key).await {
                    Ok(_) => {
                        self.stats.evictions.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => {
                        self.stats.errors.fetch_add(1, Ordering::Relaxed);
                        warn!("Failed to evict expired entry {}: {}", sanitize_cache_key(&full_key), e);
                    }
                }
                debug!("Expired entry for {} - CACHE MISS", sanitize_cache_key(&full_key));
                None
            }
            Ok(Some(entry)) => {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                debug!("Entry found for {} - CACHE HIT", sanitize_cache_key(&full_key));
                Some(entry.payload)
            }
            Ok(None) => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                debug!("No entry for {} - CACHE MISS", sanitize_cache_key(&full_key));
                None
            }
            Err(e) => {
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                warn!("{} cache read failed, treating as miss: {}", self.backend.name(), e);
                None
            }
        }
    }

    /// Store a response; `ttl` of `None` uses the service default.
    /// Returns whether the entry was stored.
    pub async fn set(&self, key: &CacheKey, payload: CachedResponse, ttl: Option<Duration>) -> bool {
        if !self.enabled {
            return false;
        }
        let entry = CacheEntry::new(self.full_key(key), payload, ttl.or(self.default_ttl));

        match self.backend.set(entry).await {
            Ok(evicted) => {
                self.stats.sets.fetch_add(1, Ordering::Relaxed);
                if evicted > 0 {
                    self.stats.evictions.fetch_add(evicted as u64, Ordering::Relaxed);
                }
                true
            }
            Err(e) => {
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                warn!("{} cache write failed: {}", self.backend.name(), e);
                false
            }
        }
    }

    /// Remove every entry whose key (without prefix) matches the glob `pattern`
    pub async fn invalidate(&self, pattern: &str) -> usize {
        let pattern = match KeyPattern::new(&format!("{}{}", self.key_prefix, pattern)) {
            Ok(pattern) => pattern,
            Err(e) => {
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                warn!("Rejected invalidation pattern: {}", e);
                return 0;
            }
        };

        match self.backend.invalidate(&pattern).await {
            Ok(removed) => {
                self.stats.evictions.fetch_add(removed as u64, Ordering::Relaxed);
                info!("Invalidated {} cache entries matching '{}'", removed, pattern.as_glob());
                removed
            }
            Err(e) => {
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                warn!("{} cache invalidation failed: {}", self.backend.name(), e);
                0
            }
        }
    }

    /// Drop every entry. Returns false when the backend failed.
    pub async fn clear(&self) -> bool {
        match self.backend.clear().await {
            Ok(()) => {
                info!("Cleared {} response cache", self.backend.name());
                true
            }
            Err(e) => {
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                warn!("{} cache clear failed: {}", self.backend.name(), e);
                false
            }
        }
    }

    pub fn metrics(&self) -> CacheMetrics {
        self.stats.to_metrics()
    }

    /// Reset cache statistics (useful for testing)
    pub fn reset_metrics(&self) {
        self.stats.reset();
    }
}

static DEFAULT_CACHE: RwLock<Option<Arc<CacheService>>> = RwLock::new(None);

/// Install `service` as the process default unless one is already installed.
/// Returns the instance that is installed afterwards (first writer wins).
pub fn install_default(service: CacheService) -> Arc<CacheService> {
    if let Some(existing) = DEFAULT_CACHE
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .as_ref()
    {
        return existing.clone();
    }

    let mut slot = DEFAULT_CACHE.write().unwrap_or_else(PoisonError::into_inner);
    if let Some(existing) = slot.as_ref() {
        return existing.clone();
    }
    let service = Arc::new(service);
    *slot = Some(service.clone());
    service
}

/// The process default cache, if one was installed
pub fn default_cache() -> Option<Arc<CacheService>> {
    DEFAULT_CACHE
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

/// Remove the process default so the next installation wins (test isolation)
pub fn reset_default() -> Option<Arc<CacheService>> {
    DEFAULT_CACHE
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .take()
}
