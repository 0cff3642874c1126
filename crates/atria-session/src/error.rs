//! Error types for session operations.

/// Error type for session operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The auth provider rejected a call (network failure, bad response).
    #[error("Auth provider error: {0}")]
    Provider(String),

    /// There is no session to operate on.
    #[error("No active session")]
    NoSession,
}

/// Result type for session operations.
pub type Result<T> = std::result::Result<T, Error>;
