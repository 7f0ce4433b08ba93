//! Client for a multi-index basketball federation search service.
//!
//! Queries are sent in batches to the `multi-search` endpoint, paginated per
//! query until every hit is retrieved, filtered client-side against the search
//! term and served through a retrying, caching HTTP layer.

pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod http;
pub mod observability;
pub mod search;
pub mod types;

pub use cache::{CacheMetrics, CacheService};
pub use client::FederationSearchClient;
pub use config::{AggregationLimits, CacheConfig, Config};
pub use error::{ClientError, ClientResult};
pub use http::{HttpClient, RetryPolicy, TimeoutConfig};
pub use search::{
    AggregationEngine, AggregationOutcome, Completeness, DomainRegistry, HitDomain, PartialReason, QueryOutcome,
};
pub use types::{SearchQuery, SearchResult};
