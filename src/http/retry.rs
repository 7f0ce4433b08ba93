/// Retry logic with exponential backoff for outbound search requests
///
/// Every attempt runs under the total per-attempt deadline. Failed attempts are
/// retried when their status code or transport error kind is in the policy's
/// retryable sets, with a capped exponential delay and optional ±25% jitter.

use super::{HttpResponse, TransportError, TransportErrorKind};
use rand::Rng;
use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

/// Smallest delay ever produced once jitter is applied
const MIN_JITTERED_DELAY: Duration = Duration::from_millis(100);

/// Retry configuration
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Maximum delay between attempts
    pub max_delay: Duration,
    /// Multiplier applied per attempt
    pub backoff_factor: f64,
    /// Perturb delays by ±25% to avoid synchronized retries
    pub jitter_enabled: bool,
    /// Response statuses worth another attempt
    pub retryable_status_codes: HashSet<u16>,
    /// Transport failures worth another attempt
    pub retryable_error_kinds: HashSet<TransportErrorKind>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500), // 500ms, 1s, 2s
            max_delay: Duration::from_secs(10),
            backoff_factor: 2.0,
            jitter_enabled: true,
            retryable_status_codes: [429, 500, 502, 503, 504].into_iter().collect(),
            retryable_error_kinds: [TransportErrorKind::Connect, TransportErrorKind::Timeout]
                .into_iter()
                .collect(),
        }
    }
}

impl RetryPolicy {
    /// A policy that makes a single attempt
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    pub fn is_retryable_status(&self, status: u16) -> bool {
        self.retryable_status_codes.contains(&status)
    }

    pub fn is_retryable_error(&self, kind: TransportErrorKind) -> bool {
        self.retryable_error_kinds.contains(&kind)
    }

    /// Deterministic part of the delay after the 0-based `attempt` failed:
    /// `min(base_delay * backoff_factor^attempt, max_delay)`
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let max_ms = self.max_delay.as_millis() as f64;
        let exponent = attempt.min(i32::MAX as u32) as i32;
        let delay_ms = self.base_delay.as_millis() as f64 * self.backoff_factor.powi(exponent);

        if !delay_ms.is_finite() || delay_ms >= max_ms {
            self.max_delay
        } else {
            Duration::from_millis(delay_ms.round().max(0.0) as u64)
        }
    }
}

/// Timeouts applied to every outbound request
#[derive(Debug, Clone)]
pub struct TimeoutConfig {
    /// TCP/TLS connection establishment
    pub connect: Duration,
    /// Whole-request timeout of the HTTP client (reqwest `timeout`): connect,
    /// headers and body of one attempt, not a per-read idle timeout
    pub read: Duration,
    /// Deadline for one whole attempt, enforced by the retry executor
    pub total: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(5),
            read: Duration::from_secs(30),
            total: Duration::from_secs(30),
        }
    }
}

/// Final result of a retried request plus the number of attempts made
#[derive(Debug)]
pub struct RetryOutcome {
    /// Last response observed (possibly non-2xx) or last transport error
    pub result: Result<HttpResponse, TransportError>,
    pub attempts: u32,
}

/// Retry executor that applies a `RetryPolicy` to a request function
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    policy: RetryPolicy,
    timeout: TimeoutConfig,
}

impl RetryExecutor {
    /// Create a new retry executor with the given policy and timeouts
    pub fn new(policy: RetryPolicy, timeout: TimeoutConfig) -> Self {
        Self { policy, timeout }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn timeout(&self) -> &TimeoutConfig {
        &self.timeout
    }

    /// Run `operation` until it succeeds, fails permanently or attempts run out.
    ///
    /// Requests that are not `idempotent` are only replayed when the previous
    /// attempt could not connect, since any other failure may have reached the
    /// server.
    pub async fn execute<F, Fut>(&self, operation: F, idempotent: bool) -> RetryOutcome
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<HttpResponse, TransportError>>,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt: u32 = 0;

        loop {
            let result = match timeout(self.timeout.total, operation()).await {
                Ok(result) => result,
                Err(_) => Err(TransportError::new(
                    TransportErrorKind::Timeout,
                    format!("attempt exceeded total timeout of {:?}", self.timeout.total),
                )),
            };
            attempt += 1;

            let retry_reason = match &result {
                Ok(response) if response.is_success() => {
                    if attempt > 1 {
                        debug!("Request succeeded after {} attempts", attempt);
                    }
                    None
                }
                Ok(response) if idempotent && self.policy.is_retryable_status(response.status) => {
                    Some(format!("status {}", response.status))
                }
                Err(error)
                    if self.policy.is_retryable_error(error.kind)
                        && (idempotent || error.kind == TransportErrorKind::Connect) =>
                {
                    Some(error.to_string())
                }
                Ok(response) => {
                    debug!("Not retrying status {}", response.status);
                    None
                }
                Err(error) => {
                    debug!("Not retrying error: {}", error);
                    None
                }
            };

            let Some(reason) = retry_reason else {
                return RetryOutcome { result, attempts: attempt };
            };

            if attempt >= max_attempts {
                warn!("Request failed after {} attempts: {}", attempt, reason);
                return RetryOutcome { result, attempts: attempt };
            }

            let delay = self.calculate_delay(attempt - 1);
            warn!(
                "Request failed (attempt {}/{}), retrying in {:?}: {}",
                attempt, max_attempts, delay, reason
            );
            sleep(delay).await;
        }
    }

    /// Delay before the next attempt, jitter included
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let capped_delay = self.policy.backoff_delay(attempt);

        if self.policy.jitter_enabled {
            let factor = rand::thread_rng().gen_range(0.75..=1.25);
            let jittered = Duration::from_secs_f64(capped_delay.as_secs_f64() * factor);
            jittered.max(MIN_JITTERED_DELAY)
        } else {
            capped_delay
        }
    }
}
