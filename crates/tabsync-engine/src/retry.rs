//! Bounded retry with exponential backoff for provider calls.
//!
//! Rate-limit responses back off exponentially on top of a fixed floor
//! (`base * 2^n + floor`), transient failures wait a short fixed delay, and
//! everything else fails immediately.

use std::future::Future;
use std::time::Duration;

use crate::metrics::SyncMetrics;
use crate::provider::{ProviderErrorKind, ProviderResult};

/// Retry policy for provider calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Base of the exponential rate-limit backoff.
    pub base_delay: Duration,
    /// Fixed addend of every rate-limit backoff.
    pub rate_limit_floor: Duration,
    /// Delay before retrying a transient failure.
    pub transient_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            rate_limit_floor: Duration::from_secs(5),
            transient_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// A policy that retries without waiting.
    #[must_use]
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            rate_limit_floor: Duration::ZERO,
            transient_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay before the retry following failed attempt `attempt` (1-based).
    #[must_use]
    pub fn delay_for(&self, kind: ProviderErrorKind, attempt: u32) -> Duration {
        let delay = match kind {
            ProviderErrorKind::RateLimited => {
                let exponent = attempt.saturating_sub(1).min(16);
                self.base_delay
                    .saturating_mul(2_u32.saturating_pow(exponent))
                    .saturating_add(self.rate_limit_floor)
            }
            _ => self.transient_delay,
        };
        delay.min(self.max_delay)
    }
}

/// Runs `call` until it succeeds, fails permanently, or attempts run out.
///
/// # Errors
///
/// Returns the last error once it is not retryable or the policy is exhausted.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    mut call: F,
) -> ProviderResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ProviderResult<T>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match call().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < policy.max_attempts => {
                let delay = policy.delay_for(err.kind, attempt);
                tracing::warn!(
                    operation,
                    attempt,
                    kind = %err.kind,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %err.message,
                    "provider call failed; retrying"
                );
                SyncMetrics::new().record_provider_retry(operation, err.kind.as_str());
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}
