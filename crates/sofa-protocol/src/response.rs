//! Response types

use crate::error::{ProtocolError, ProtocolResult};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Error body returned by the server for every non-2xx status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(default)]
    pub reason: String,
}

impl ErrorBody {
    pub fn new(error: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            reason: reason.into(),
        }
    }
}

/// A fully buffered response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Bytes,
}

impl Response {
    pub fn new(status: u16, content_type: Option<String>, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            content_type,
            body: body.into(),
        }
    }

    /// JSON response with the given status
    pub fn json<T: Serialize + ?Sized>(status: u16, value: &T) -> ProtocolResult<Self> {
        let body = serde_json::to_vec(value)?;
        Ok(Self::new(status, Some("application/json".into()), body))
    }

    /// Error response in the server's `{"error", "reason"}` shape
    pub fn error(status: u16, error: &str, reason: &str) -> Self {
        let body = serde_json::json!({ "error": error, "reason": reason });
        Self::new(status, Some("application/json".into()), body.to_string())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Decode the body as JSON
    pub fn decode<T: DeserializeOwned>(&self) -> ProtocolResult<T> {
        serde_json::from_slice(&self.body).map_err(|e| {
            ProtocolError::UnexpectedShape(format!("status {}: {}", self.status, e))
        })
    }

    /// Error body, when the server sent one
    pub fn error_body(&self) -> Option<ErrorBody> {
        serde_json::from_slice(&self.body).ok()
    }

    /// Body as text, lossily decoded
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}
