use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// One query against one index of the search service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchQuery {
    /// Index identifier (e.g. "organismes", "competitions")
    #[serde(rename = "indexUid")]
    pub index: String,
    /// Free-text term; absent means "match everything"
    #[serde(rename = "q", default, skip_serializing_if = "Option::is_none")]
    pub term: Option<String>,
    /// Facets to compute, order preserved
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub facets: Vec<String>,
    /// Page size
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Index of the first hit
    #[serde(default)]
    pub offset: usize,
    /// Filter expressions, ANDed by the service
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filter: Vec<String>,
    /// Sort expressions, e.g. "date:desc"
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sort: Vec<String>,
}

fn default_limit() -> usize {
    10
}

impl SearchQuery {
    pub fn new(index: impl Into<String>) -> Self {
        Self {
            index: index.into(),
            term: None,
            facets: Vec::new(),
            limit: default_limit(),
            offset: 0,
            filter: Vec::new(),
            sort: Vec::new(),
        }
    }

    pub fn with_term(mut self, term: impl Into<String>) -> Self {
        self.term = Some(term.into());
        self
    }

    pub fn with_facets<I, S>(mut self, facets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.facets = facets.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_filter(mut self, expression: impl Into<String>) -> Self {
        self.filter.push(expression.into());
        self
    }

    pub fn with_sort(mut self, expression: impl Into<String>) -> Self {
        self.sort.push(expression.into());
        self
    }

    /// Trimmed, lowercased term; `None` when absent or blank
    pub fn lowercased_term(&self) -> Option<String> {
        self.term
            .as_deref()
            .map(str::trim)
            .filter(|term| !term.is_empty())
            .map(str::to_lowercase)
    }
}

/// Min/max of a numeric facet
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FacetStat {
    pub min: f64,
    pub max: f64,
}

/// Facet name -> value -> count
pub type FacetDistribution = HashMap<String, HashMap<String, u64>>;

/// Decoded result of one query, merged across pagination rounds
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult<H> {
    pub index: String,
    pub hits: Vec<H>,
    /// Term echoed by the service
    pub query: Option<String>,
    pub processing_time_ms: u64,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    pub estimated_total_hits: Option<u64>,
    pub facet_distribution: FacetDistribution,
    pub facet_stats: HashMap<String, FacetStat>,
}

impl<H> SearchResult<H> {
    /// Keep `hits.len() <= estimated_total_hits` when the estimate is known
    pub(crate) fn reconcile_estimate(&mut self) {
        if let Some(estimate) = self.estimated_total_hits {
            let kept = self.hits.len() as u64;
            if kept > estimate {
                self.estimated_total_hits = Some(kept);
            }
        }
    }
}

/// Request body of the multi-search endpoint
#[derive(Debug, Serialize)]
pub struct MultiSearchRequest<'a> {
    pub queries: Vec<&'a SearchQuery>,
}

/// Response body of the multi-search endpoint; elements decoded one by one
#[derive(Debug, Deserialize)]
pub struct MultiSearchResponse {
    #[serde(default)]
    pub results: Vec<Value>,
}

/// One element of `results` before hit decoding
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawSearchResult {
    #[serde(default)]
    pub index_uid: Option<String>,
    #[serde(default)]
    pub hits: Vec<Value>,
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub processing_time_ms: u64,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: Option<usize>,
    #[serde(default)]
    pub estimated_total_hits: Option<u64>,
    #[serde(default)]
    pub facet_distribution: Option<FacetDistribution>,
    #[serde(default)]
    pub facet_stats: Option<HashMap<String, FacetStat>>,
}
