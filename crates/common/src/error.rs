//! Error types for Blackscope

use thiserror::Error;

/// Result type alias using Blackscope Error
pub type Result<T> = std::result::Result<T, Error>;

/// Blackscope error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Malformed record: {0}")]
    MalformedRecord(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Stream ended unexpectedly before the run completed")]
    UnexpectedEnd,

    #[error("Internal error: {0}")]
    Internal(String),
}
