//! Server-side error responses

use sofa_protocol::Response;
use thiserror::Error;

/// An error the fake server reports as a non-2xx response
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{status} {error}: {reason}")]
pub struct ServerError {
    pub status: u16,
    pub error: String,
    pub reason: String,
}

impl ServerError {
    pub fn new(status: u16, error: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            status,
            error: error.into(),
            reason: reason.into(),
        }
    }

    pub fn bad_request(reason: impl Into<String>) -> Self {
        Self::new(400, "bad_request", reason)
    }

    pub fn not_found(reason: impl Into<String>) -> Self {
        Self::new(404, "not_found", reason)
    }

    pub fn conflict() -> Self {
        Self::new(409, "conflict", "Document update conflict.")
    }

    pub fn forbidden(reason: impl Into<String>) -> Self {
        Self::new(403, "forbidden", reason)
    }

    pub fn illegal_docid() -> Self {
        Self::new(
            400,
            "illegal_docid",
            "Only reserved document ids may start with underscore.",
        )
    }

    pub fn method_not_allowed() -> Self {
        Self::new(405, "method_not_allowed", "Only the documented methods are allowed.")
    }

    pub fn to_response(&self) -> Response {
        Response::error(self.status, &self.error, &self.reason)
    }
}

impl From<sofa_core::Error> for ServerError {
    fn from(e: sofa_core::Error) -> Self {
        match e {
            sofa_core::Error::InvalidRevision(_) => Self::bad_request("Invalid rev format"),
            other => Self::bad_request(other.to_string()),
        }
    }
}

impl From<sofa_protocol::ProtocolError> for ServerError {
    fn from(e: sofa_protocol::ProtocolError) -> Self {
        Self::bad_request(e.to_string())
    }
}

pub type ServerResult<T> = Result<T, ServerError>;
