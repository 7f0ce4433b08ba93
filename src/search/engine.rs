use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};
use url::Url;
use uuid::Uuid;

use super::domain::{DomainRegistry, HitDomain};
use crate::config::AggregationLimits;
use crate::error::{ClientError, ClientResult};
use crate::http::{HttpClient, HttpRequest};
use crate::observability::logging::sanitize_term;
use crate::observability::MetricsRegistry;
use crate::types::{MultiSearchRequest, MultiSearchResponse, RawSearchResult, SearchQuery, SearchResult};

/// Why a query stopped before all of its hits were retrieved
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartialReason {
    /// `max_rounds` was reached
    RoundLimit,
    /// `max_hits_per_query` was reached
    HitCap,
    /// The aggregation deadline elapsed
    Deadline,
    /// A continuation round failed; earlier hits are kept
    ContinuationFailed(String),
    /// A round returned no hits while the estimate says more exist
    NoProgress,
}

#[derive(Debug)]
pub enum Completeness {
    Complete,
    Partial(PartialReason),
    Failed { error: ClientError },
}

impl Completeness {
    pub fn is_complete(&self) -> bool {
        matches!(self, Completeness::Complete)
    }

    pub fn is_partial(&self) -> bool {
        matches!(self, Completeness::Partial(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Completeness::Failed { .. })
    }
}

/// Result of one input query
#[derive(Debug)]
pub struct QueryOutcome<H> {
    /// Merged result; `None` when the first round produced nothing usable
    pub result: Option<SearchResult<H>>,
    pub status: Completeness,
}

/// Result of one aggregation call, in input order
#[derive(Debug)]
pub struct AggregationOutcome<H> {
    pub results: Vec<QueryOutcome<H>>,
    /// Rounds performed, the first one included
    pub rounds: u32,
    /// A query was cut short by a round, hit or time budget
    pub truncated: bool,
}

impl<H> AggregationOutcome<H> {
    fn empty() -> Self {
        Self {
            results: Vec::new(),
            rounds: 0,
            truncated: false,
        }
    }

    /// Every query completed
    pub fn is_complete(&self) -> bool {
        self.results.iter().all(|outcome| outcome.status.is_complete())
    }

    /// Merged results in input order, failed queries as `None`
    pub fn into_results(self) -> Vec<Option<SearchResult<H>>> {
        self.results.into_iter().map(|outcome| outcome.result).collect()
    }
}

/// Drop hits that do not match `lowercased_term` and shrink the estimate to match.
/// Returns the number of removed hits.
///
/// The estimate is lowered by the removed count, floored at 0, then raised back
/// to `hits.len()` if it fell below it. `hits.len() <= estimated_total_hits`
/// therefore always holds, but when the service under-reports its total the
/// estimate drops by less than the removed count.
pub fn apply_hit_filter<H>(
    result: &mut SearchResult<H>,
    domain: &dyn HitDomain<H>,
    lowercased_term: &str,
) -> usize {
    let before = result.hits.len();
    result.hits.retain(|hit| domain.is_valid(hit, lowercased_term));
    let removed = before - result.hits.len();

    if removed > 0 {
        result.estimated_total_hits = result
            .estimated_total_hits
            .map(|total| total.saturating_sub(removed as u64));
    }
    result.reconcile_estimate();

    removed
}

/// A query still being paginated
struct PendingQuery {
    /// Position in the caller's batch
    position: usize,
    /// Engine-owned copy; offset and limit advance between rounds
    query: SearchQuery,
    /// Offset requested by the caller
    base_offset: usize,
    term: Option<String>,
}

/// One decoded element of a round's response
struct RoundResult<H> {
    result: SearchResult<H>,
    /// Hits received before filtering
    raw_count: usize,
    removed: usize,
}

/// Sends batches of queries to the multi-search endpoint and paginates each
/// query until all of its hits are retrieved or a budget is reached.
pub struct AggregationEngine<H> {
    http: Arc<HttpClient>,
    endpoint: Url,
    token: Option<String>,
    registry: DomainRegistry<H>,
    limits: AggregationLimits,
    metrics: Option<MetricsRegistry>,
}

impl<H> AggregationEngine<H> {
    pub fn new(http: Arc<HttpClient>, endpoint: Url, registry: DomainRegistry<H>) -> Self {
        Self {
            http,
            endpoint,
            token: None,
            registry,
            limits: AggregationLimits::default(),
            metrics: None,
        }
    }

    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }

    pub fn with_limits(mut self, limits: AggregationLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_metrics(mut self, metrics: MetricsRegistry) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn limits(&self) -> &AggregationLimits {
        &self.limits
    }

    pub fn http(&self) -> &Arc<HttpClient> {
        &self.http
    }

    /// Run `queries` as one batch, paginating each until complete.
    ///
    /// A failure of the first round is returned as an error; failures of later
    /// rounds degrade the affected queries to `Partial` and keep the hits
    /// already fetched.
    #[instrument(skip(self, queries), fields(trace_id = %Uuid::new_v4(), batch = queries.len()))]
    pub async fn aggregate(&self, queries: &[SearchQuery]) -> ClientResult<AggregationOutcome<H>> {
        if queries.is_empty() {
            return Ok(AggregationOutcome::empty());
        }

        let started = Instant::now();
        let max_rounds = self.limits.max_rounds.max(1);

        let mut results: Vec<Option<SearchResult<H>>> = queries.iter().map(|_| None).collect();
        let mut statuses: Vec<Completeness> = queries.iter().map(|_| Completeness::Complete).collect();
        let mut pending: Vec<PendingQuery> = queries
            .iter()
            .enumerate()
            .map(|(position, query)| PendingQuery {
                position,
                query: query.clone(),
                base_offset: query.offset,
                term: query.lowercased_term(),
            })
            .collect();

        for entry in &pending {
            debug!(
                "Query {} on '{}' term={:?} limit={} offset={}",
                entry.position,
                entry.query.index,
                entry.term.as_deref().map(sanitize_term),
                entry.query.limit,
                entry.query.offset
            );
        }

        let mut rounds = 0u32;
        let mut truncated = false;

        while !pending.is_empty() {
            let mut breach = self.budget_breach(rounds, max_rounds, started);

            if breach.is_none() && rounds > 0 && !self.limits.round_delay.is_zero() {
                // Never sleep past the deadline
                let delay = match self.limits.deadline {
                    Some(deadline) => self
                        .limits
                        .round_delay
                        .min(deadline.saturating_sub(started.elapsed())),
                    None => self.limits.round_delay,
                };
                tokio::time::sleep(delay).await;
                breach = self.budget_breach(rounds, max_rounds, started);
            }

            if let Some((reason, description)) = breach {
                if self.limits.strict {
                    return Err(ClientError::RecursionBudgetExceeded {
                        rounds,
                        reason: format!("{} with {} queries pending", description, pending.len()),
                    });
                }
                warn!(
                    "Aggregation stopped after {} rounds: {} ({} queries pending)",
                    rounds,
                    description,
                    pending.len()
                );
                for entry in &pending {
                    statuses[entry.position] = Completeness::Partial(reason.clone());
                }
                truncated = true;
                break;
            }

            rounds += 1;

            let raw_results = match self.dispatch(&pending).await {
                Ok(raw_results) => raw_results,
                Err(e) if rounds == 1 => return Err(e),
                Err(e) => {
                    warn!("Continuation round {} failed: {}", rounds, e);
                    let message = e.to_string();
                    for entry in &pending {
                        statuses[entry.position] =
                            Completeness::Partial(PartialReason::ContinuationFailed(message.clone()));
                    }
                    break;
                }
            };

            let mut raw_results = raw_results.into_iter();
            let mut continuations = Vec::new();

            for mut entry in std::mem::take(&mut pending) {
                let position = entry.position;

                let round = match self.decode_element(&entry, raw_results.next()) {
                    Ok(round) => round,
                    Err(e) if rounds == 1 => {
                        warn!("Query {} on '{}' failed to decode: {}", position, entry.query.index, e);
                        statuses[position] = Completeness::Failed { error: e };
                        continue;
                    }
                    Err(e) => {
                        warn!("Continuation of query {} failed to decode: {}", position, e);
                        statuses[position] =
                            Completeness::Partial(PartialReason::ContinuationFailed(e.to_string()));
                        continue;
                    }
                };

                let RoundResult {
                    result,
                    raw_count,
                    removed,
                } = round;

                match results[position].as_mut() {
                    Some(merged) => {
                        // Later estimates are not re-read, only shrunk by filtering
                        merged.hits.extend(result.hits);
                        merged.processing_time_ms += result.processing_time_ms;
                        merged.estimated_total_hits = merged
                            .estimated_total_hits
                            .map(|total| total.saturating_sub(removed as u64));
                        merged.reconcile_estimate();
                    }
                    None => results[position] = Some(result),
                }

                let Some(merged) = results[position].as_ref() else {
                    continue;
                };
                let retrieved = merged.hits.len();
                let Some(total) = merged.estimated_total_hits else {
                    continue;
                };
                let target = usize::try_from(total)
                    .unwrap_or(usize::MAX)
                    .saturating_sub(entry.base_offset);

                if retrieved >= target {
                    continue;
                }
                if raw_count == 0 {
                    debug!("Query {} stalled at {} of {} hits", position, retrieved, target);
                    statuses[position] = Completeness::Partial(PartialReason::NoProgress);
                    continue;
                }

                let mut limit = target - retrieved;
                if let Some(cap) = self.limits.max_hits_per_query {
                    if retrieved >= cap {
                        debug!("Query {} reached the hit cap of {}", position, cap);
                        statuses[position] = Completeness::Partial(PartialReason::HitCap);
                        truncated = true;
                        continue;
                    }
                    limit = limit.min(cap - retrieved);
                }

                entry.query.offset += raw_count;
                entry.query.limit = limit;
                continuations.push(entry);
            }

            if !continuations.is_empty() {
                debug!(
                    "Round {} done, {} queries need another page",
                    rounds,
                    continuations.len()
                );
            }
            pending = continuations;
        }

        if let Some(metrics) = &self.metrics {
            metrics.metrics.aggregation_total.inc();
            metrics.metrics.aggregation_rounds.observe(f64::from(rounds));
        }

        info!(
            "Aggregated {} queries in {} rounds ({:?}, truncated={})",
            queries.len(),
            rounds,
            started.elapsed(),
            truncated
        );

        let results = results
            .into_iter()
            .zip(statuses)
            .map(|(result, status)| QueryOutcome { result, status })
            .collect();

        Ok(AggregationOutcome {
            results,
            rounds,
            truncated,
        })
    }

    /// Round or deadline budget exhausted before dispatching round `rounds + 1`
    fn budget_breach(&self, rounds: u32, max_rounds: u32, started: Instant) -> Option<(PartialReason, String)> {
        if rounds >= max_rounds {
            return Some((PartialReason::RoundLimit, format!("round limit of {} reached", max_rounds)));
        }
        match self.limits.deadline {
            Some(deadline) if started.elapsed() >= deadline => Some((
                PartialReason::Deadline,
                format!("deadline of {:?} elapsed", deadline),
            )),
            _ => None,
        }
    }

    /// Send the pending subset as one multi-search request
    async fn dispatch(&self, pending: &[PendingQuery]) -> ClientResult<Vec<Value>> {
        let request = MultiSearchRequest {
            queries: pending.iter().map(|entry| &entry.query).collect(),
        };
        let body = serde_json::to_vec(&request)?;

        let http_request = HttpRequest::post_json(self.endpoint.clone(), body)
            .with_bearer_token(self.token.clone())
            .idempotent(true)
            .cacheable(true);

        let response = self.http.send(&http_request).await?;

        let parsed: MultiSearchResponse = serde_json::from_str(&response.body)
            .map_err(|e| ClientError::Decode(format!("Malformed multi-search response: {}", e)))?;

        if parsed.results.len() != pending.len() {
            warn!(
                "Multi-search returned {} results for {} queries",
                parsed.results.len(),
                pending.len()
            );
        }

        Ok(parsed.results)
    }

    /// Decode and filter the response element belonging to `entry`
    fn decode_element(&self, entry: &PendingQuery, raw: Option<Value>) -> ClientResult<RoundResult<H>> {
        let index = &entry.query.index;

        let raw = raw.ok_or_else(|| {
            ClientError::Decode(format!("No result returned for query on index '{}'", index))
        })?;
        let domain = self
            .registry
            .get(index)
            .ok_or_else(|| ClientError::Decode(format!("No hit domain registered for index '{}'", index)))?;
        let raw: RawSearchResult = serde_json::from_value(raw)
            .map_err(|e| ClientError::Decode(format!("Malformed result for index '{}': {}", index, e)))?;

        let raw_count = raw.hits.len();
        let hits = raw
            .hits
            .into_iter()
            .map(|hit| domain.decode(index, hit))
            .collect::<Result<Vec<H>, String>>()
            .map_err(|e| ClientError::Decode(format!("Malformed hit in index '{}': {}", index, e)))?;

        let mut result = SearchResult {
            index: index.clone(),
            hits,
            query: raw.query,
            processing_time_ms: raw.processing_time_ms,
            limit: raw.limit,
            offset: raw.offset,
            estimated_total_hits: raw.estimated_total_hits,
            facet_distribution: raw.facet_distribution.unwrap_or_default(),
            facet_stats: raw.facet_stats.unwrap_or_default(),
        };

        let removed = match entry.term.as_deref() {
            Some(term) => apply_hit_filter(&mut result, domain.as_ref(), term),
            None => {
                result.reconcile_estimate();
                0
            }
        };

        Ok(RoundResult {
            result,
            raw_count,
            removed,
        })
    }
}
