use prometheus::{Counter, Encoder, Histogram, HistogramOpts, Registry, TextEncoder};
use std::sync::Arc;
use std::time::Instant;

use crate::error::{ClientError, ClientResult};

/// Prometheus registry shared by the HTTP client and the aggregation engine
#[derive(Clone)]
pub struct MetricsRegistry {
    registry: Arc<Registry>,
    pub metrics: Arc<Metrics>,
}

/// All client metrics
pub struct Metrics {
    // HTTP metrics
    pub http_requests_total: Counter,
    pub http_retries_total: Counter,
    pub http_errors_total: Counter,
    pub http_request_duration_seconds: Histogram,

    // Cache metrics
    pub cache_hits_total: Counter,
    pub cache_misses_total: Counter,

    // Aggregation metrics
    pub aggregation_total: Counter,
    pub aggregation_rounds: Histogram,
}

impl MetricsRegistry {
    /// Create a new metrics registry with all collectors
    pub fn new() -> ClientResult<Self> {
        let registry = Arc::new(Registry::new());
        let metrics = Arc::new(Metrics::new(&registry)?);

        Ok(Self { registry, metrics })
    }

    /// Get metrics in Prometheus text format
    pub fn gather(&self) -> ClientResult<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();

        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|e| ClientError::Internal(format!("Failed to encode metrics: {}", e)))?;

        String::from_utf8(buffer)
            .map_err(|e| ClientError::Internal(format!("Failed to convert metrics to string: {}", e)))
    }

    /// Underlying registry, for embedding into an application's exporter
    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }
}

fn counter(registry: &Registry, name: &str, help: &str) -> ClientResult<Counter> {
    let counter = Counter::new(name, help)
        .map_err(|e| ClientError::Internal(format!("Failed to create {} metric: {}", name, e)))?;
    registry
        .register(Box::new(counter.clone()))
        .map_err(|e| ClientError::Internal(format!("Failed to register {}: {}", name, e)))?;
    Ok(counter)
}

fn histogram(registry: &Registry, name: &str, help: &str, buckets: Vec<f64>) -> ClientResult<Histogram> {
    let histogram = Histogram::with_opts(HistogramOpts::new(name, help).buckets(buckets))
        .map_err(|e| ClientError::Internal(format!("Failed to create {} metric: {}", name, e)))?;
    registry
        .register(Box::new(histogram.clone()))
        .map_err(|e| ClientError::Internal(format!("Failed to register {}: {}", name, e)))?;
    Ok(histogram)
}

impl Metrics {
    fn new(registry: &Registry) -> ClientResult<Self> {
        Ok(Self {
            http_requests_total: counter(
                registry,
                "http_requests_total",
                "Total number of HTTP requests sent to the search service",
            )?,
            http_retries_total: counter(
                registry,
                "http_retries_total",
                "Total number of HTTP attempts beyond the first",
            )?,
            http_errors_total: counter(
                registry,
                "http_errors_total",
                "Total number of HTTP requests that ended in an error",
            )?,
            http_request_duration_seconds: histogram(
                registry,
                "http_request_duration_seconds",
                "Duration of HTTP requests in seconds, retries included",
                vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0],
            )?,
            cache_hits_total: counter(registry, "cache_hits_total", "Total number of cache hits")?,
            cache_misses_total: counter(registry, "cache_misses_total", "Total number of cache misses")?,
            aggregation_total: counter(
                registry,
                "aggregation_total",
                "Total number of aggregation calls",
            )?,
            aggregation_rounds: histogram(
                registry,
                "aggregation_rounds",
                "Rounds performed per aggregation call",
                vec![1.0, 2.0, 3.0, 5.0, 8.0, 13.0, 25.0, 50.0],
            )?,
        })
    }
}

/// Timer helper for measuring durations
pub struct Timer {
    start: Instant,
    histogram: Histogram,
}

impl Timer {
    pub fn new(histogram: Histogram) -> Self {
        Self {
            start: Instant::now(),
            histogram,
        }
    }

    pub fn observe(self) {
        let duration = self.start.elapsed();
        self.histogram.observe(duration.as_secs_f64());
    }
}
