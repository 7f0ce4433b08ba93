use super::{HttpRequest, HttpResponse, RetryExecutor, RetryPolicy, TimeoutConfig, Transport};
use crate::cache::{CacheKey, CacheService};
use crate::error::{ClientError, ClientResult};
use crate::observability::logging::sanitize_url;
use crate::observability::{MetricsRegistry, Timer};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// HTTP client that serves cacheable requests from the response cache and
/// sends everything else through the retry executor
pub struct HttpClient {
    /// Network seam, one round-trip per call
    transport: Arc<dyn Transport>,
    /// Retry and per-attempt deadline handling
    executor: RetryExecutor,
    /// Shared response cache
    cache: Option<Arc<CacheService>>,
    /// TTL for newly cached responses; `None` defers to the cache's default
    cache_ttl: Option<Duration>,
    /// Optional Prometheus collectors
    metrics: Option<MetricsRegistry>,
    /// Physical attempts handed to the transport
    network_calls: AtomicU64,
}

impl HttpClient {
    /// Create a client without cache or metrics
    pub fn new(transport: Arc<dyn Transport>, policy: RetryPolicy, timeout: TimeoutConfig) -> Self {
        Self {
            transport,
            executor: RetryExecutor::new(policy, timeout),
            cache: None,
            cache_ttl: None,
            metrics: None,
            network_calls: AtomicU64::new(0),
        }
    }

    /// Serve and store cacheable responses through `cache`
    pub fn with_cache(mut self, cache: Arc<CacheService>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Override the TTL used for responses stored by this client
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    pub fn with_metrics(mut self, metrics: MetricsRegistry) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn cache(&self) -> Option<&Arc<CacheService>> {
        self.cache.as_ref()
    }

    /// Number of transport attempts made so far, retries included
    pub fn network_calls(&self) -> u64 {
        self.network_calls.load(Ordering::Relaxed)
    }

    /// Send one logical request.
    ///
    /// Non-2xx responses are converted into `RetryableStatus` or `FatalStatus`
    /// depending on the retry policy; exhausted transport failures into
    /// `Transport`. All three carry the URL and attempt count.
    #[instrument(skip_all, fields(method = %request.method, path = request.url.path()))]
    pub async fn send(&self, request: &HttpRequest) -> ClientResult<HttpResponse> {
        let cache_slot = match (&self.cache, request.cacheable) {
            (Some(cache), true) if cache.is_enabled() => Some((cache, CacheKey::for_request(request))),
            _ => None,
        };

        if let Some((cache, key)) = &cache_slot {
            if let Some(cached) = cache.get(key).await {
                debug!("Serving {} from cache", sanitize_url(&request.url));
                if let Some(metrics) = &self.metrics {
                    metrics.metrics.cache_hits_total.inc();
                }
                return Ok(HttpResponse::new(cached.status, cached.body));
            }
            if let Some(metrics) = &self.metrics {
                metrics.metrics.cache_misses_total.inc();
            }
        }

        let timer = self
            .metrics
            .as_ref()
            .map(|m| Timer::new(m.metrics.http_request_duration_seconds.clone()));

        let outcome = self
            .executor
            .execute(
                || {
                    self.network_calls.fetch_add(1, Ordering::Relaxed);
                    self.transport.send(request)
                },
                request.idempotent,
            )
            .await;

        if let Some(timer) = timer {
            timer.observe();
        }
        if let Some(metrics) = &self.metrics {
            metrics.metrics.http_requests_total.inc();
            metrics
                .metrics
                .http_retries_total
                .inc_by(outcome.attempts.saturating_sub(1) as f64);
        }

        let attempts = outcome.attempts;
        let url = sanitize_url(&request.url);
        let result = match outcome.result {
            Ok(response) if response.is_success() => {
                if let Some((cache, key)) = &cache_slot {
                    let stored = cache
                        .set(key, response.clone().into(), self.cache_ttl)
                        .await;
                    if !stored {
                        debug!("Response for {} was not cached", url);
                    }
                }
                Ok(response)
            }
            Ok(response) if self.executor.policy().is_retryable_status(response.status) => {
                Err(ClientError::RetryableStatus {
                    status: response.status,
                    url,
                    attempts,
                })
            }
            Ok(response) => Err(ClientError::FatalStatus {
                status: response.status,
                url,
                attempts,
            }),
            Err(error) => Err(ClientError::Transport {
                kind: error.kind,
                url,
                attempts,
                message: error.message,
            }),
        };

        if let Err(error) = &result {
            warn!("Outbound request failed: {}", error);
            if let Some(metrics) = &self.metrics {
                metrics.metrics.http_errors_total.inc();
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheService;
    use crate::http::{TransportError, TransportErrorKind};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use url::Url;

    /// Mock transport replaying a script of results, repeating the last one
    struct ScriptedTransport {
        script: Mutex<VecDeque<Result<HttpResponse, TransportError>>>,
        last: Mutex<Option<Result<HttpResponse, TransportError>>>,
    }

    impl ScriptedTransport {
        fn new(script: Vec<Result<HttpResponse, TransportError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                last: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn send(&self, _request: &HttpRequest) -> Result<HttpResponse, TransportError> {
            let next = self.script.lock().unwrap().pop_front();
            let mut last = self.last.lock().unwrap();
            match next {
                Some(result) => {
                    *last = Some(result.clone());
                    result
                }
                None => last.clone().expect("script must not be empty"),
            }
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            jitter_enabled: false,
            ..Default::default()
        }
    }

    fn search_request() -> HttpRequest {
        let url = Url::parse("https://search.example.org/multi-search").unwrap();
        HttpRequest::post_json(url, br#"{"queries":[]}"#.to_vec())
            .idempotent(true)
            .cacheable(true)
    }

    #[tokio::test]
    async fn test_fatal_status_is_not_retried() {
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(HttpResponse::new(401, ""))]));
        let client = HttpClient::new(transport, fast_policy(), TimeoutConfig::default());

        let err = client.send(&search_request()).await.unwrap_err();
        assert!(matches!(err, ClientError::FatalStatus { status: 401, attempts: 1, .. }));
        assert_eq!(client.network_calls(), 1);
    }

    #[tokio::test]
    async fn test_exhausted_retryable_status_keeps_its_kind() {
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(HttpResponse::new(502, ""))]));
        let client = HttpClient::new(transport, fast_policy(), TimeoutConfig::default());

        let err = client.send(&search_request()).await.unwrap_err();
        assert!(matches!(err, ClientError::RetryableStatus { status: 502, attempts: 3, .. }));
        assert_eq!(client.network_calls(), 3);
    }

    #[tokio::test]
    async fn test_exhausted_transport_error_keeps_its_kind() {
        let transport = Arc::new(ScriptedTransport::new(vec![Err(TransportError::new(
            TransportErrorKind::Timeout,
            "deadline",
        ))]));
        let client = HttpClient::new(transport, fast_policy(), TimeoutConfig::default());

        let err = client.send(&search_request()).await.unwrap_err();
        match err {
            ClientError::Transport { kind, attempts, url, .. } => {
                assert_eq!(kind, TransportErrorKind::Timeout);
                assert_eq!(attempts, 3);
                assert!(url.contains("/multi-search"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_identical_requests_hit_the_cache() {
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(HttpResponse::new(200, "payload"))]));
        let cache = Arc::new(CacheService::in_memory(Some(Duration::from_secs(60))));
        let client = HttpClient::new(transport, fast_policy(), TimeoutConfig::default())
            .with_cache(cache.clone());

        let first = client.send(&search_request()).await.unwrap();
        let second = client.send(&search_request()).await.unwrap();
        let third = client.send(&search_request()).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(second, third);
        assert_eq!(client.network_calls(), 1);

        let metrics = cache.metrics();
        assert_eq!(metrics.misses, 1);
        assert_eq!(metrics.hits, 2);
        assert_eq!(metrics.sets, 1);
    }

    #[tokio::test]
    async fn test_failed_responses_are_not_cached() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Ok(HttpResponse::new(404, "")),
            Ok(HttpResponse::new(200, "found")),
        ]));
        let cache = Arc::new(CacheService::in_memory(None));
        let client = HttpClient::new(transport, fast_policy(), TimeoutConfig::default())
            .with_cache(cache.clone());

        assert!(client.send(&search_request()).await.is_err());
        assert_eq!(client.send(&search_request()).await.unwrap().body, "found");
        assert_eq!(cache.metrics().sets, 1);
        assert_eq!(client.network_calls(), 2);
    }

    #[tokio::test]
    async fn test_uncacheable_requests_bypass_cache() {
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(HttpResponse::new(200, "fresh"))]));
        let cache = Arc::new(CacheService::in_memory(None));
        let client = HttpClient::new(transport, fast_policy(), TimeoutConfig::default())
            .with_cache(cache.clone());

        let request = search_request().cacheable(false);
        client.send(&request).await.unwrap();
        client.send(&request).await.unwrap();

        assert_eq!(client.network_calls(), 2);
        assert_eq!(cache.metrics().hits + cache.metrics().misses, 0);
    }

    #[tokio::test]
    async fn test_metrics_are_recorded() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Ok(HttpResponse::new(503, "")),
            Ok(HttpResponse::new(200, "ok")),
        ]));
        let metrics = MetricsRegistry::new().unwrap();
        let client = HttpClient::new(transport, fast_policy(), TimeoutConfig::default())
            .with_metrics(metrics.clone());

        client.send(&search_request()).await.unwrap();

        assert_eq!(metrics.metrics.http_requests_total.get(), 1.0);
        assert_eq!(metrics.metrics.http_retries_total.get(), 1.0);
        assert_eq!(metrics.metrics.http_errors_total.get(), 0.0);
    }
}
