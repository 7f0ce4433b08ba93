use std::collections::HashSet;
use std::env;
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

use crate::error::{ClientError, ClientResult};
use crate::http::{RetryPolicy, TimeoutConfig, TransportErrorKind};

/// Client configuration loaded from environment variables
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Search service endpoint and credential
    pub search: SearchServiceConfig,
    /// Retry policy for every outbound request
    pub retry: RetryPolicy,
    /// Connect/read/total timeouts
    pub timeout: TimeoutConfig,
    /// Response cache
    pub cache: CacheConfig,
    /// Bounds on a single aggregation call
    pub aggregation: AggregationLimits,
}

/// Search service configuration
#[derive(Debug, Clone, Default)]
pub struct SearchServiceConfig {
    /// Base URL of the multi-index search service
    pub url: String,
    /// Bearer token sent with every search request
    pub token: Option<String>,
}

impl SearchServiceConfig {
    /// Endpoint accepting batched queries
    pub fn multi_search_url(&self) -> ClientResult<Url> {
        let raw = format!("{}/multi-search", self.url.trim_end_matches('/'));
        Url::parse(&raw)
            .map_err(|e| ClientError::ConfigError(format!("Invalid search URL '{}': {}", self.url, e)))
    }
}

/// Storage used by the response cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheBackendKind {
    /// Process-local map
    #[default]
    Memory,
    /// JSON files under `CacheConfig::directory`
    Disk,
    /// Shared Redis deployment
    Redis,
}

impl FromStr for CacheBackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(CacheBackendKind::Memory),
            "disk" | "file" => Ok(CacheBackendKind::Disk),
            "redis" => Ok(CacheBackendKind::Redis),
            other => Err(format!("unknown cache backend '{}'", other)),
        }
    }
}

/// Response cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Serve and store responses through the cache
    pub enabled: bool,
    /// Storage backend
    pub backend: CacheBackendKind,
    /// Default entry lifetime; `None` keeps entries until invalidated
    pub ttl: Option<Duration>,
    /// Namespace prepended to every key
    pub key_prefix: String,
    /// Install the cache as the process default, or reuse the one installed
    pub shared: bool,
    /// Memory backend capacity
    pub max_entries: Option<usize>,
    /// Disk backend directory
    pub directory: PathBuf,
    /// Redis backend connection
    pub redis: RedisConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: CacheBackendKind::Memory,
            ttl: Some(Duration::from_secs(300)),
            key_prefix: "ffbb:".to_string(),
            shared: false,
            max_entries: Some(10_000),
            directory: env::temp_dir().join("ffbb-search-cache"),
            redis: RedisConfig::default(),
        }
    }
}

/// Redis configuration
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Redis connection URL
    pub url: String,
    /// Maximum Redis connections
    pub max_connections: u32,
    /// Connection timeout in seconds
    pub connection_timeout_secs: u64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            max_connections: 4,
            connection_timeout_secs: 5,
        }
    }
}

/// Bounds on one aggregation call
#[derive(Debug, Clone)]
pub struct AggregationLimits {
    /// Maximum rounds, the first one included
    pub max_rounds: u32,
    /// Stop paginating a query once it holds this many hits
    pub max_hits_per_query: Option<usize>,
    /// Wall-clock budget for the whole call
    pub deadline: Option<Duration>,
    /// Pause before each continuation round
    pub round_delay: Duration,
    /// Fail with `RecursionBudgetExceeded` instead of returning partial results
    pub strict: bool,
}

impl Default for AggregationLimits {
    fn default() -> Self {
        Self {
            max_rounds: 25,
            max_hits_per_query: None,
            deadline: None,
            round_delay: Duration::ZERO,
            strict: false,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> ClientResult<Self> {
        // Load .env file if it exists
        if let Err(e) = dotenvy::dotenv() {
            tracing::debug!("Could not load .env file: {}", e);
        }

        let retry_defaults = RetryPolicy::default();
        let timeout_defaults = TimeoutConfig::default();
        let cache_defaults = CacheConfig::default();
        let redis_defaults = RedisConfig::default();
        let aggregation_defaults = AggregationLimits::default();

        let config = Config {
            search: SearchServiceConfig {
                url: env::var("FFBB_SEARCH_URL")
                    .map_err(|_| ClientError::ConfigError("FFBB_SEARCH_URL is required".to_string()))?,
                token: env::var("FFBB_SEARCH_TOKEN").ok().filter(|t| !t.is_empty()),
            },
            retry: RetryPolicy {
                max_attempts: env_or("RETRY_MAX_ATTEMPTS", retry_defaults.max_attempts)?,
                base_delay: env_millis_or("RETRY_BASE_DELAY_MS", retry_defaults.base_delay)?,
                max_delay: env_millis_or("RETRY_MAX_DELAY_MS", retry_defaults.max_delay)?,
                backoff_factor: env_or("RETRY_BACKOFF_FACTOR", retry_defaults.backoff_factor)?,
                jitter_enabled: env_or("RETRY_JITTER", retry_defaults.jitter_enabled)?,
                retryable_status_codes: env_set_or(
                    "RETRY_STATUS_CODES",
                    retry_defaults.retryable_status_codes,
                )?,
                retryable_error_kinds: env_set_or::<TransportErrorKind>(
                    "RETRY_ERROR_KINDS",
                    retry_defaults.retryable_error_kinds,
                )?,
            },
            timeout: TimeoutConfig {
                connect: env_millis_or("HTTP_CONNECT_TIMEOUT_MS", timeout_defaults.connect)?,
                read: env_millis_or("HTTP_READ_TIMEOUT_MS", timeout_defaults.read)?,
                total: env_millis_or("HTTP_TOTAL_TIMEOUT_MS", timeout_defaults.total)?,
            },
            cache: CacheConfig {
                enabled: env_or("CACHE_ENABLED", cache_defaults.enabled)?,
                backend: env_or("CACHE_BACKEND", cache_defaults.backend)?,
                ttl: match env::var("CACHE_TTL_SECS") {
                    // 0 disables expiry
                    Ok(raw) => Some(parse_value::<u64>("CACHE_TTL_SECS", &raw)?)
                        .filter(|secs| *secs > 0)
                        .map(Duration::from_secs),
                    Err(_) => cache_defaults.ttl,
                },
                key_prefix: env::var("CACHE_KEY_PREFIX").unwrap_or(cache_defaults.key_prefix),
                shared: env_or("CACHE_SHARED", cache_defaults.shared)?,
                max_entries: match env::var("CACHE_MAX_ENTRIES") {
                    Ok(raw) => Some(parse_value::<usize>("CACHE_MAX_ENTRIES", &raw)?).filter(|n| *n > 0),
                    Err(_) => cache_defaults.max_entries,
                },
                directory: env::var("CACHE_DIR")
                    .map(PathBuf::from)
                    .unwrap_or(cache_defaults.directory),
                redis: RedisConfig {
                    url: env::var("REDIS_URL").unwrap_or(redis_defaults.url),
                    max_connections: env_or("REDIS_MAX_CONNECTIONS", redis_defaults.max_connections)?,
                    connection_timeout_secs: env_or(
                        "REDIS_CONNECTION_TIMEOUT_SECS",
                        redis_defaults.connection_timeout_secs,
                    )?,
                },
            },
            aggregation: AggregationLimits {
                max_rounds: env_or("AGGREGATION_MAX_ROUNDS", aggregation_defaults.max_rounds)?,
                max_hits_per_query: match env::var("AGGREGATION_MAX_HITS") {
                    Ok(raw) => Some(parse_value("AGGREGATION_MAX_HITS", &raw)?),
                    Err(_) => aggregation_defaults.max_hits_per_query,
                },
                deadline: match env::var("AGGREGATION_DEADLINE_MS") {
                    Ok(raw) => Some(Duration::from_millis(parse_value("AGGREGATION_DEADLINE_MS", &raw)?)),
                    Err(_) => aggregation_defaults.deadline,
                },
                round_delay: env_millis_or("AGGREGATION_ROUND_DELAY_MS", aggregation_defaults.round_delay)?,
                strict: env_or("AGGREGATION_STRICT", aggregation_defaults.strict)?,
            },
        };

        // Validate configuration
        config.validate()?;

        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> ClientResult<()> {
        if !self.search.url.starts_with("https://") && !self.search.url.starts_with("http://") {
            return Err(ClientError::ConfigError(
                "FFBB_SEARCH_URL must start with http:// or https://".to_string(),
            ));
        }
        self.search.multi_search_url()?;

        if self.retry.max_attempts == 0 {
            return Err(ClientError::ConfigError("Retry max attempts must be at least 1".to_string()));
        }

        if !self.retry.backoff_factor.is_finite() || self.retry.backoff_factor < 1.0 {
            return Err(ClientError::ConfigError("Backoff factor must be >= 1.0".to_string()));
        }

        if self.retry.base_delay > self.retry.max_delay {
            return Err(ClientError::ConfigError(
                "Retry base delay cannot exceed max delay".to_string(),
            ));
        }

        if self.timeout.total.is_zero() {
            return Err(ClientError::ConfigError("Total timeout must be greater than 0".to_string()));
        }

        if self.aggregation.max_rounds == 0 {
            return Err(ClientError::ConfigError("Aggregation max rounds must be at least 1".to_string()));
        }

        if self.cache.backend == CacheBackendKind::Redis
            && !self.cache.redis.url.starts_with("redis://")
            && !self.cache.redis.url.starts_with("rediss://")
        {
            return Err(ClientError::ConfigError(
                "REDIS_URL must start with redis:// or rediss://".to_string(),
            ));
        }

        if self.cache.backend == CacheBackendKind::Redis && self.cache.key_prefix.is_empty() {
            return Err(ClientError::ConfigError(
                "CACHE_KEY_PREFIX must not be empty with the Redis backend".to_string(),
            ));
        }

        Ok(())
    }
}

fn parse_value<T>(name: &str, raw: &str) -> ClientResult<T>
where
    T: FromStr,
    T::Err: Display,
{
    raw.trim()
        .parse()
        .map_err(|e| ClientError::ConfigError(format!("Invalid {}: {}", name, e)))
}

fn env_or<T>(name: &str, default: T) -> ClientResult<T>
where
    T: FromStr,
    T::Err: Display,
{
    match env::var(name) {
        Ok(raw) => parse_value(name, &raw),
        Err(_) => Ok(default),
    }
}

fn env_millis_or(name: &str, default: Duration) -> ClientResult<Duration> {
    match env::var(name) {
        Ok(raw) => parse_value::<u64>(name, &raw).map(Duration::from_millis),
        Err(_) => Ok(default),
    }
}

/// Comma-separated set, e.g. `429,500,503`
fn env_set_or<T>(name: &str, default: HashSet<T>) -> ClientResult<HashSet<T>>
where
    T: FromStr + Eq + std::hash::Hash,
    T::Err: Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .split(',')
            .filter(|item| !item.trim().is_empty())
            .map(|item| parse_value(name, item))
            .collect(),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();

        // Should fail without a search URL
        assert!(config.validate().is_err());

        config.search.url = "https://search.example.org".to_string();
        assert!(config.validate().is_ok());

        config.retry.max_attempts = 0;
        assert!(config.validate().is_err());
        config.retry.max_attempts = 3;

        config.retry.backoff_factor = 0.5;
        assert!(config.validate().is_err());
        config.retry.backoff_factor = 2.0;

        config.cache.backend = CacheBackendKind::Redis;
        config.cache.redis.url = "localhost:6379".to_string();
        assert!(config.validate().is_err());

        config.cache.redis.url = "redis://localhost:6379".to_string();
        assert!(config.validate().is_ok());
        config.cache.key_prefix = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_multi_search_url() {
        let search = SearchServiceConfig {
            url: "https://search.example.org/".to_string(),
            token: None,
        };
        assert_eq!(
            search.multi_search_url().unwrap().as_str(),
            "https://search.example.org/multi-search"
        );

        let nested = SearchServiceConfig {
            url: "https://example.org/meili".to_string(),
            token: None,
        };
        assert_eq!(
            nested.multi_search_url().unwrap().as_str(),
            "https://example.org/meili/multi-search"
        );
    }

    #[test]
    fn test_value_parsing_helpers() {
        assert_eq!(parse_value::<u32>("X", " 7 ").unwrap(), 7);
        assert!(matches!(
            parse_value::<u32>("RETRY_MAX_ATTEMPTS", "many"),
            Err(ClientError::ConfigError(msg)) if msg.contains("RETRY_MAX_ATTEMPTS")
        ));
        assert_eq!("Disk".parse::<CacheBackendKind>(), Ok(CacheBackendKind::Disk));
        assert!("memcached".parse::<CacheBackendKind>().is_err());
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.retry.max_attempts, 3);
        assert!(config.retry.retryable_status_codes.contains(&429));
        assert!(!config.retry.retryable_status_codes.contains(&404));
        assert_eq!(config.cache.backend, CacheBackendKind::Memory);
        assert_eq!(config.aggregation.max_rounds, 25);
        assert!(!config.aggregation.strict);
    }
}
