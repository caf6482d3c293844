//! Error types for Sofa Core

use thiserror::Error;

/// Core error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid revision: {0}")]
    InvalidRevision(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

/// Result type alias for Sofa Core operations
pub type Result<T> = std::result::Result<T, Error>;
