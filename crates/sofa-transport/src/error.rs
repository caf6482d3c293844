//! Transport error types

use thiserror::Error;

/// Connection-level failures, before or while a response is read
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Connection lost: {0}")]
    Disconnected(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Transport closed")]
    Closed,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl TransportError {
    /// Whether reissuing the same request may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TransportError::Connect(_) | TransportError::Disconnected(_) | TransportError::Timeout
        )
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            TransportError::Timeout
        } else if e.is_builder() {
            TransportError::InvalidRequest(e.to_string())
        } else if e.is_connect() {
            TransportError::Connect(e.to_string())
        } else {
            TransportError::Disconnected(e.to_string())
        }
    }
}

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;
