//! Protocol error types

use thiserror::Error;

/// Protocol-specific errors
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Line too long: {size} > {max}")]
    LineTooLong { size: usize, max: usize },

    #[error("Invalid JSON: {0}")]
    InvalidJson(String),

    #[error("Unexpected response shape: {0}")]
    UnexpectedShape(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Core error: {0}")]
    Core(#[from] sofa_core::Error),
}

impl From<serde_json::Error> for ProtocolError {
    fn from(e: serde_json::Error) -> Self {
        ProtocolError::InvalidJson(e.to_string())
    }
}

/// Result type for protocol operations
pub type ProtocolResult<T> = Result<T, ProtocolError>;
