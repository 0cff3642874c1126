//! Error taxonomy for fetch operations.

use std::time::Duration;

/// Error type for fetch operations.
///
/// Transient failures and timeouts are retried with backoff; the rest
/// are surfaced immediately. Cancellation is not a real error: it means
/// the result was intentionally discarded.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum FetchError {
    /// Network-level failure; worth retrying.
    #[error("Transient fetch failure: {0}")]
    Transient(String),

    /// The attempt exceeded its deadline; worth retrying.
    #[error("Fetch timed out after {0:?}")]
    Timeout(Duration),

    /// The fetch was cancelled (superseded or detached). Never retried,
    /// never surfaced as an error state.
    #[error("Fetch cancelled")]
    Cancelled,

    /// The session ended while this binding held data.
    #[error("Session ended")]
    SessionEnded,

    /// Non-retryable failure from the fetch operation itself.
    #[error("Fetch failed: {0}")]
    Fatal(String),
}

impl FetchError {
    /// Whether retrying could help.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FetchError::Transient(_) | FetchError::Timeout(_))
    }
}

/// Result type for fetch operations.
pub type Result<T> = std::result::Result<T, FetchError>;
