//! Uniform retry policy for store operations.
//!
//! Failure `i` (0-based) waits a random delay in `[c/2, c]` where
//! `c = min(2^i seconds, max_backoff)`. Delays only grow with `i` and never
//! exceed `max_backoff`.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::QueueError;
use crate::store::StoreError;

/// Upper bound of the delay after failure `failure` (0-based).
pub fn backoff_ceiling(failure: u32, max_backoff: Duration) -> Duration {
    let exp = Duration::from_secs(1u64.checked_shl(failure.min(63)).unwrap_or(u64::MAX));
    exp.min(max_backoff)
}

/// Delay after failure `failure` for a jitter `fraction` in `[0, 1]`.
pub fn jittered_backoff(failure: u32, max_backoff: Duration, fraction: f64) -> Duration {
    let ceiling = backoff_ceiling(failure, max_backoff);
    ceiling.mul_f64(0.5 + 0.5 * fraction.clamp(0.0, 1.0))
}

/// Longest total time `max_attempts` attempts can spend sleeping between
/// failures.
pub fn max_cumulative_backoff(max_attempts: u32, max_backoff: Duration) -> Duration {
    (0..max_attempts.saturating_sub(1))
        .map(|failure| backoff_ceiling(failure, max_backoff))
        .sum()
}

/// Run `attempt` until it succeeds, retrying transient store errors.
///
/// - Non-transient errors are returned at once as [`QueueError::Store`].
/// - After `max_attempts` transient failures: [`QueueError::RetriesExhausted`].
/// - Cancellation before or during an attempt, or during a backoff sleep:
///   [`QueueError::Interrupted`]. An attempt in flight is dropped.
pub async fn manage_retries<T, F, Fut>(
    cancel: &CancellationToken,
    operation: &str,
    max_attempts: u32,
    max_backoff: Duration,
    mut attempt: F,
) -> Result<T, QueueError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let max_attempts = max_attempts.max(1);
    let mut failures = 0u32;
    loop {
        if cancel.is_cancelled() {
            return Err(QueueError::Interrupted {
                operation: operation.to_string(),
            });
        }

        let outcome = tokio::select! {
            _ = cancel.cancelled() => {
                return Err(QueueError::Interrupted {
                    operation: operation.to_string(),
                });
            }
            outcome = attempt() => outcome,
        };
        let err = match outcome {
            Ok(value) => return Ok(value),
            Err(err) if !err.is_transient() => return Err(QueueError::Store(err)),
            Err(err) => err,
        };

        failures += 1;
        if failures >= max_attempts {
            return Err(QueueError::RetriesExhausted {
                operation: operation.to_string(),
                attempts: failures,
                source: err,
            });
        }

        let delay = jittered_backoff(failures - 1, max_backoff, rand::thread_rng().r#gen());
        warn!(
            operation,
            attempt = failures,
            max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "store operation failed; retrying"
        );

        tokio::select! {
            _ = cancel.cancelled() => {
                return Err(QueueError::Interrupted {
                    operation: operation.to_string(),
                });
            }
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
