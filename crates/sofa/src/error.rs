//! Client error types

use sofa_protocol::{ErrorBody, ProtocolError, Response};
use sofa_transport::TransportError;
use thiserror::Error;

/// Classification of a non-2xx status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusKind {
    BadRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    Conflict,
    PreconditionFailed,
    ExpectationFailed,
    Server,
    Other,
}

/// A non-2xx response, with the server's `{error, reason}` when it sent one
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("HTTP {status}: {}", describe(.error, .reason))]
pub struct StatusError {
    pub status: u16,
    pub error: Option<String>,
    pub reason: Option<String>,
}

impl StatusError {
    pub fn new(status: u16, body: Option<ErrorBody>) -> Self {
        let (error, reason) = match body {
            Some(body) => (Some(body.error), Some(body.reason).filter(|r| !r.is_empty())),
            None => (None, None),
        };
        Self {
            status,
            error,
            reason,
        }
    }

    pub fn from_response(response: &Response) -> Self {
        Self::new(response.status, response.error_body())
    }

    pub fn kind(&self) -> StatusKind {
        match self.status {
            400 => StatusKind::BadRequest,
            401 => StatusKind::Unauthorized,
            403 => StatusKind::Forbidden,
            404 => StatusKind::NotFound,
            409 => StatusKind::Conflict,
            412 => StatusKind::PreconditionFailed,
            417 => StatusKind::ExpectationFailed,
            500..=599 => StatusKind::Server,
            _ => StatusKind::Other,
        }
    }

    /// Server trouble or throttling, as opposed to a bad request
    pub fn is_retryable(&self) -> bool {
        matches!(self.status, 408 | 429 | 500..=599)
    }
}

fn describe(error: &Option<String>, reason: &Option<String>) -> String {
    match (error, reason) {
        (Some(error), Some(reason)) => format!("{} ({})", error, reason),
        (Some(error), None) => error.clone(),
        _ => "no error body".to_string(),
    }
}

/// Client errors
#[derive(Error, Debug)]
pub enum Error {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Status(#[from] StatusError),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Core error: {0}")]
    Core(#[from] sofa_core::Error),

    #[error("Operation cancelled")]
    Cancelled,
}

impl Error {
    pub(crate) fn decode(what: &str, err: impl std::fmt::Display) -> Self {
        Error::Decode(format!("{}: {}", what, err))
    }

    /// Status code, for status errors
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Status(e) => Some(e.status),
            _ => None,
        }
    }

    pub fn kind(&self) -> Option<StatusKind> {
        match self {
            Error::Status(e) => Some(e.kind()),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == Some(StatusKind::NotFound)
    }

    pub fn is_conflict(&self) -> bool {
        self.kind() == Some(StatusKind::Conflict)
    }

    /// Whether a changes feed should reconnect after this error
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Transport(e) => e.is_retryable(),
            Error::Status(e) => e.is_retryable(),
            _ => false,
        }
    }
}

/// Result type for client operations
pub type Result<T> = std::result::Result<T, Error>;
