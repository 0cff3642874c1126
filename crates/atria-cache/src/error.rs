//! Error types for cache operations.

/// Error type for cache operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The snapshot store rejected a read or write.
    #[error("Snapshot store error: {0}")]
    Snapshot(String),

    /// A cache value could not be serialized or deserialized.
    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Result type for cache operations.
pub type Result<T> = std::result::Result<T, Error>;
