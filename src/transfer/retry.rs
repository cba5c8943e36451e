//! Retrying transient transfer failures

use crate::transfer::error::TransferResult;
use backoff::{backoff::Backoff, ExponentialBackoff};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Default schedule for push/pull retries
pub fn default_backoff() -> ExponentialBackoff {
    ExponentialBackoff {
        initial_interval: Duration::from_millis(100),
        max_interval: Duration::from_secs(5),
        max_elapsed_time: Some(Duration::from_secs(60)),
        ..Default::default()
    }
}

/// Run `op` until it succeeds, fails permanently, or the default schedule
/// runs out
pub async fn with_backoff<T, F, Fut>(op: F) -> TransferResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = TransferResult<T>>,
{
    with_backoff_config(default_backoff(), op).await
}

/// Like [`with_backoff`] with a caller-supplied schedule.
///
/// Only retryable errors are retried. The wait before each attempt is the
/// larger of the schedule's interval and the error's `retry_after` hint.
pub async fn with_backoff_config<T, F, Fut>(
    mut backoff: ExponentialBackoff,
    mut op: F,
) -> TransferResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = TransferResult<T>>,
{
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() => match backoff.next_backoff() {
                Some(interval) => {
                    let wait = e.retry_after().map_or(interval, |hint| hint.max(interval));
                    warn!(error = %e, ?wait, "transfer failed, retrying");
                    tokio::time::sleep(wait).await;
                }
                None => return Err(e),
            },
            Err(e) => return Err(e),
        }
    }
}
