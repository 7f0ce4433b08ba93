use std::sync::Arc;
use tracing::info;

use crate::cache::{self, CacheMetrics, CacheService};
use crate::config::{CacheConfig, Config};
use crate::error::ClientResult;
use crate::http::{HttpClient, ReqwestTransport, Transport};
use crate::observability::MetricsRegistry;
use crate::search::{AggregationEngine, AggregationOutcome, DomainRegistry};
use crate::types::SearchQuery;

/// Entry point wiring transport, retries, cache and the aggregation engine
/// from one `Config`.
pub struct FederationSearchClient<H> {
    engine: AggregationEngine<H>,
    cache: Option<Arc<CacheService>>,
    metrics: MetricsRegistry,
}

impl<H> FederationSearchClient<H> {
    /// Build a client talking to the configured search service over HTTP
    pub async fn from_config(config: &Config, registry: DomainRegistry<H>) -> ClientResult<Self> {
        let transport = Arc::new(ReqwestTransport::new(&config.timeout)?);
        Self::with_transport(config, transport, registry).await
    }

    /// Build a client over an explicit transport
    pub async fn with_transport(
        config: &Config,
        transport: Arc<dyn Transport>,
        registry: DomainRegistry<H>,
    ) -> ClientResult<Self> {
        config.validate()?;

        let metrics = MetricsRegistry::new()?;
        let cache = Self::build_cache(&config.cache).await?;

        let mut http = HttpClient::new(transport, config.retry.clone(), config.timeout.clone())
            .with_metrics(metrics.clone());
        if let Some(cache) = &cache {
            http = http.with_cache(cache.clone());
        }

        let engine = AggregationEngine::new(Arc::new(http), config.search.multi_search_url()?, registry)
            .with_token(config.search.token.clone())
            .with_limits(config.aggregation.clone())
            .with_metrics(metrics.clone());

        info!(
            "Search client ready (cache: {}, max attempts: {}, max rounds: {})",
            cache.as_ref().map(|c| c.backend_name()).unwrap_or("disabled"),
            config.retry.max_attempts,
            config.aggregation.max_rounds
        );

        Ok(Self {
            engine,
            cache,
            metrics,
        })
    }

    async fn build_cache(config: &CacheConfig) -> ClientResult<Option<Arc<CacheService>>> {
        if !config.enabled {
            return Ok(None);
        }
        if config.shared {
            if let Some(existing) = cache::default_cache() {
                return Ok(Some(existing));
            }
            let service = CacheService::from_config(config).await?;
            return Ok(Some(cache::install_default(service)));
        }
        Ok(Some(Arc::new(CacheService::from_config(config).await?)))
    }

    /// Run a batch of queries, paginating each until complete
    pub async fn aggregate(&self, queries: &[SearchQuery]) -> ClientResult<AggregationOutcome<H>> {
        self.engine.aggregate(queries).await
    }

    pub fn engine(&self) -> &AggregationEngine<H> {
        &self.engine
    }

    /// Cache counters; `None` when caching is disabled
    pub fn cache_metrics(&self) -> Option<CacheMetrics> {
        self.cache.as_ref().map(|cache| cache.metrics())
    }

    /// Remove cached responses whose key matches the glob `pattern`
    pub async fn invalidate_cache(&self, pattern: &str) -> usize {
        match &self.cache {
            Some(cache) => cache.invalidate(pattern).await,
            None => 0,
        }
    }

    pub async fn clear_cache(&self) -> bool {
        match &self.cache {
            Some(cache) => cache.clear().await,
            None => false,
        }
    }

    /// Physical requests sent, cache hits excluded
    pub fn network_calls(&self) -> u64 {
        self.engine.http().network_calls()
    }

    pub fn metrics(&self) -> &MetricsRegistry {
        &self.metrics
    }
}
