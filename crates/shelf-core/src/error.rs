use thiserror::Error;

/// Top-level error type for the Shelf search core.
///
/// Subsystems map their foreign errors (rusqlite, reqwest, tokio) into the
/// string-carrying variants so that `?` works across crate boundaries.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ShelfError {
    /// Missing or invalid configuration, including an absent provider
    /// credential. Fatal for a whole sync run.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The embedding provider failed or returned no usable vector.
    #[error("Provider error: {0}")]
    Provider(String),

    /// The durable vector store is unreachable or a query failed.
    #[error("Store error: {0}")]
    Store(String),

    /// A vector does not have the dimension already fixed by the store.
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Timed out after {0} ms")]
    Timeout(u64),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl ShelfError {
    /// True for errors that make every further sync item pointless.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ShelfError::Config(_) | ShelfError::DimensionMismatch { .. }
        )
    }
}

impl From<toml::de::Error> for ShelfError {
    fn from(err: toml::de::Error) -> Self {
        ShelfError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for ShelfError {
    fn from(err: toml::ser::Error) -> Self {
        ShelfError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for ShelfError {
    fn from(err: serde_json::Error) -> Self {
        ShelfError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for Shelf operations.
pub type Result<T> = std::result::Result<T, ShelfError>;
