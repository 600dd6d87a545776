//! Exponential-backoff retry for transient failures
//!
//! Used by the batch writer for store round trips and by the chunk
//! processor for page fetches. Delays double from `base_delay` up to
//! `max_delay`; the caller decides which errors are worth retrying.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

/// Retry schedule for one operation
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first one (minimum 1)
    pub max_attempts: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Cap applied to the doubled delays
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Delay before retrying after the given failed attempt (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let doubled = self
            .base_delay
            .saturating_mul(1u32 << (attempt - 1).min(16));
        doubled.min(self.max_delay)
    }
}

/// Run `op` until it succeeds, retries are exhausted, or an error the
/// predicate rejects is returned.
///
/// `op` receives the 1-based attempt number; `should_retry` sees each error
/// before a retry is scheduled, so permanent failures short-circuit.
pub async fn retry_if<T, E, Op, Fut, Pred>(
    policy: &RetryPolicy,
    label: &str,
    mut op: Op,
    should_retry: Pred,
) -> Result<T, E>
where
    Op: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    Pred: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let attempts = policy.max_attempts.max(1);

    for attempt in 1..=attempts {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < attempts && should_retry(&e) => {
                let delay = policy.delay_after(attempt);
                warn!(
                    operation = label,
                    attempt,
                    max_attempts = attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "transient failure, backing off"
                );
                tokio::time::sleep(delay).await;
            },
            Err(e) => return Err(e),
        }
    }

    unreachable!("retry loop returns on the last attempt")
}
