//! Error types for storage operations

/// Errors from the backing store or the JSON layer above it.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("storage driver error: {0}")]
    Driver(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("stored value could not be decoded: {0}")]
    Decode(String),

    #[error("value could not be encoded: {0}")]
    Encode(String),

    #[error("invalid namespace: {0}")]
    InvalidNamespace(String),
}

/// Result alias for storage operations.
pub type Result<T> = std::result::Result<T, Error>;
