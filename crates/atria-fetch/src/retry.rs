//! Exponential backoff retry for fetch attempts.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::{FetchError, Result};

/// Execute an async operation with exponential backoff retry.
///
/// Retries only errors worth retrying (see [`FetchError::is_retryable`]).
/// Cancellation aborts immediately, including mid-backoff, and is
/// returned as [`FetchError::Cancelled`].
pub async fn retry_with_backoff<F, Fut, T>(
    max_retries: u32,
    base_delay: Duration,
    cancel: &CancellationToken,
    mut f: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut backoff = base_delay;
    let mut last_error = None;

    for attempt in 0..=max_retries {
        if cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }

        match f().await {
            Ok(value) => return Ok(value),
            Err(FetchError::Cancelled) => return Err(FetchError::Cancelled),
            Err(e) if !e.is_retryable() => return Err(e),
            Err(e) => {
                last_error = Some(e);

                if attempt < max_retries {
                    warn!(
                        attempt = attempt + 1,
                        max_retries = max_retries,
                        backoff_ms = backoff.as_millis() as u64,
                        "Fetch failed, retrying"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(FetchError::Cancelled),
                        _ = tokio::time::sleep(backoff) => {}
                    }
                    backoff *= 2;
                }
            }
        }
    }

    Err(last_error.unwrap_or_else(|| FetchError::Transient("retries exhausted".into())))
}
