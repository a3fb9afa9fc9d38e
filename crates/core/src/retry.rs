//! Exponential-backoff retry for saga-level external calls.
//!
//! Registry lookups and channel publishes are retried here; rule evaluation
//! never is. The policy grows the delay by a fixed multiplier, caps it, and
//! gives up after a fixed number of attempts.

use std::future::Future;
use std::time::Duration;

/// Tunable parameters for the backoff strategy.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub initial_delay: Duration,
    /// Factor by which the delay grows after each failure.
    pub multiplier: f64,
    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(500),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// A policy that tries once and never sleeps.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            multiplier: 1.0,
            max_delay: Duration::ZERO,
        }
    }

    /// Calculate the next backoff delay, clamped to `max_delay`.
    pub fn next_delay(&self, current: Duration) -> Duration {
        let next_ms = (current.as_millis() as f64 * self.multiplier) as u64;
        Duration::from_millis(next_ms).min(self.max_delay)
    }

    /// Delays slept between consecutive attempts.
    pub fn delays(&self) -> Vec<Duration> {
        let mut out = Vec::new();
        let mut delay = self.initial_delay.min(self.max_delay);
        for _ in 1..self.max_attempts.max(1) {
            out.push(delay);
            delay = self.next_delay(delay);
        }
        out
    }
}

/// Result of a call that eventually succeeded.
#[derive(Debug, Clone, PartialEq)]
pub struct Attempted<T> {
    pub value: T,
    pub attempts: u32,
}

/// The call failed with a non-retryable error or ran out of attempts.
#[derive(Debug, thiserror::Error)]
#[error("{label} failed after {attempts} attempt(s): {source}")]
pub struct RetryError<E: std::error::Error + 'static> {
    pub label: &'static str,
    pub attempts: u32,
    #[source]
    pub source: E,
}

/// Run `op` until it succeeds, `retryable` rejects the error, or the policy
/// runs out of attempts.
pub async fn with_retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    label: &'static str,
    retryable: impl Fn(&E) -> bool,
    mut op: F,
) -> Result<Attempted<T>, RetryError<E>>
where
    E: std::error::Error + 'static,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut delay = policy.initial_delay.min(policy.max_delay);
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        match op().await {
            Ok(value) => {
                return Ok(Attempted {
                    value,
                    attempts: attempt,
                })
            }
            Err(e) if attempt < max_attempts && retryable(&e) => {
                tracing::warn!(
                    label,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Attempt failed, retrying",
                );
                tokio::time::sleep(delay).await;
                delay = policy.next_delay(delay);
            }
            Err(e) => {
                return Err(RetryError {
                    label,
                    attempts: attempt,
                    source: e,
                })
            }
        }
    }
}
