//! Bounded retry with a fixed backoff table.
//!
//! Storage and delivery share one schedule: four attempts in total, with
//! sleeps of 1s, 3s and 5s between them. The schedule is a lookup table, not
//! an exponential formula.

use crate::error::{MetricaError, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Maximum attempts including the first try.
pub const MAX_ATTEMPTS: u32 = 4;

/// Delay to wait after the given (1-based) attempt failed.
pub fn backoff_delay(attempt: u32) -> Duration {
    match attempt {
        1 => Duration::from_secs(1),
        2 => Duration::from_secs(3),
        3 => Duration::from_secs(5),
        _ => Duration::from_secs(1),
    }
}

/// Run `op` up to [`MAX_ATTEMPTS`] times, sleeping [`backoff_delay`] between
/// failed attempts.
///
/// Non-retryable errors (see [`MetricaError::is_retryable`]) are returned
/// immediately. When every attempt fails the last error is returned as-is;
/// callers wrap it into their own exhaustion variant.
pub async fn retry_with_backoff<F, Fut, T>(operation: &str, mut op: F) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1;

    loop {
        match op(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(operation, attempt, "Operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) if err.is_retryable() && attempt < MAX_ATTEMPTS => {
                let delay = backoff_delay(attempt);
                debug!(
                    operation,
                    attempt,
                    delay_secs = delay.as_secs(),
                    error = %err,
                    "Attempt failed, retrying after backoff"
                );
                metrics::counter!("metrica_retries_total", "operation" => operation.to_string())
                    .increment(1);
                sleep(delay).await;
                attempt += 1;
            }
            Err(err) => {
                if err.is_retryable() {
                    warn!(operation, attempts = attempt, error = %err, "Retries exhausted");
                }
                return Err(err);
            }
        }
    }
}

/// Map an exhausted storage error into `StorageUnavailable`.
pub(crate) fn storage_exhausted(operation: &str, err: MetricaError) -> MetricaError {
    if err.is_retryable() {
        MetricaError::StorageUnavailable {
            operation: operation.to_string(),
            attempts: MAX_ATTEMPTS,
            reason: err.to_string(),
        }
    } else {
        err
    }
}
