use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::services::providers::{DiscoverClient, DiscoverParams, DiscoverResponse};

/// Longest server-requested wait we are willing to honor
const MAX_RETRY_AFTER: Duration = Duration::from_secs(60);

/// Backoff settings for one logical fetch
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Additional attempts after the first one
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Fraction of the computed delay applied as +/- random jitter
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(300),
            max_delay: Duration::from_secs(10),
            jitter: 0.2,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based), before jitter
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Why a fetch produced no data
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum FetchError {
    #[error("request rejected with status {status}: {message}")]
    Terminal { status: u16, message: String },

    #[error("gave up after {attempts} attempts: {last_error}")]
    Exhausted { attempts: u32, last_error: String },
}

/// Items from one successful fetch
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchedPage {
    pub items: Vec<Value>,
    /// Pages the provider reports for this query, when known
    pub total_pages: Option<u32>,
}

/// Request, retry and failure counters owned by one fetcher
#[derive(Debug, Default)]
pub struct FetchMetrics {
    requests: AtomicU64,
    retries: AtomicU64,
    failures: AtomicU64,
}

/// Point-in-time copy of `FetchMetrics`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub requests: u64,
    pub retries: u64,
    pub failures: u64,
}

impl FetchMetrics {
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

enum Classification {
    Success,
    Retryable,
    Terminal(u16),
}

/// 429 and 5xx are worth retrying, as is a request that never got a response.
fn classify(response: &DiscoverResponse) -> Classification {
    if response.success {
        return Classification::Success;
    }
    match response.status_code {
        None => Classification::Retryable,
        Some(429) | Some(500..=599) => Classification::Retryable,
        Some(status) => Classification::Terminal(status),
    }
}

/// Runs discover queries with exponential backoff and jitter.
///
/// Failures come back as `FetchError` values; the caller decides whether to
/// fall back to cached data.
pub struct Fetcher {
    client: Arc<dyn DiscoverClient>,
    policy: RetryPolicy,
    rng: Mutex<StdRng>,
    metrics: FetchMetrics,
}

impl Fetcher {
    pub fn new(client: Arc<dyn DiscoverClient>, policy: RetryPolicy) -> Self {
        Self::with_rng(client, policy, StdRng::from_entropy())
    }

    /// Uses the given random source for jitter
    pub fn with_rng(client: Arc<dyn DiscoverClient>, policy: RetryPolicy, rng: StdRng) -> Self {
        Self {
            client,
            policy,
            rng: Mutex::new(rng),
            metrics: FetchMetrics::default(),
        }
    }

    pub fn client(&self) -> &Arc<dyn DiscoverClient> {
        &self.client
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Performs one logical query, retrying transient failures.
    pub async fn fetch(&self, params: &DiscoverParams) -> Result<FetchedPage, FetchError> {
        let max_attempts = self.policy.max_retries.saturating_add(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            self.metrics.requests.fetch_add(1, Ordering::Relaxed);
            let response = self.client.discover(params).await;

            let last_error = match classify(&response) {
                Classification::Success => {
                    tracing::debug!(
                        attempt,
                        results = response.results.len(),
                        provider = self.client.name(),
                        "Fetch succeeded"
                    );
                    return Ok(FetchedPage {
                        items: response.results,
                        total_pages: response.total_pages,
                    });
                }
                Classification::Terminal(status) => {
                    self.metrics.failures.fetch_add(1, Ordering::Relaxed);
                    let message = response.error.unwrap_or_default();
                    tracing::warn!(status, error = %message, "Fetch failed with non-retryable status");
                    return Err(FetchError::Terminal { status, message });
                }
                Classification::Retryable => describe_failure(&response),
            };

            if attempt >= max_attempts {
                self.metrics.failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(attempts = attempt, error = %last_error, "Fetch retries exhausted");
                return Err(FetchError::Exhausted {
                    attempts: attempt,
                    last_error,
                });
            }

            let delay = self.retry_delay(attempt, response.retry_after);
            self.metrics.retries.fetch_add(1, Ordering::Relaxed);
            tracing::info!(
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %last_error,
                "Transient fetch failure, retrying"
            );
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
    }

    /// A server-supplied retry-after wins over the computed backoff.
    fn retry_delay(&self, retry: u32, retry_after: Option<Duration>) -> Duration {
        if let Some(wait) = retry_after {
            return wait.min(MAX_RETRY_AFTER);
        }

        let base = self.policy.backoff(retry);
        let jitter = self.policy.jitter.clamp(0.0, 1.0);
        if jitter == 0.0 || base.is_zero() {
            return base;
        }

        let factor = match self.rng.lock() {
            Ok(mut rng) => rng.gen_range((1.0 - jitter)..=(1.0 + jitter)),
            Err(_) => 1.0,
        };
        base.mul_f64(factor)
    }
}

fn describe_failure(response: &DiscoverResponse) -> String {
    let message = response.error.clone().unwrap_or_else(|| "unknown error".to_string());
    match response.status_code {
        Some(status) => format!("status {}: {}", status, message),
        None => message,
    }
}
