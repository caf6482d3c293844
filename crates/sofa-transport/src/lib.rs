//! Sofa Transport Layer
//!
//! The client never talks to the network directly; it hands a
//! [`Request`] to a [`Transport`] and gets back either a buffered
//! [`Response`] or a streamed body:
//! - `HttpTransport`: HTTP/1.1 and HTTP/2 via reqwest (rustls)
//! - any in-process implementation, such as the test server fake

pub mod error;
pub mod http;

pub use error::{TransportError, TransportResult};
pub use http::HttpTransport;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures_util::stream::{BoxStream, StreamExt};
use sofa_protocol::{Request, Response};
use std::sync::Arc;

/// Body of a streamed response, delivered in arbitrary chunks
pub type BodyStream = BoxStream<'static, TransportResult<Bytes>>;

/// A response whose body is read incrementally
pub struct StreamingResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: BodyStream,
}

impl StreamingResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Read the remaining body into a buffered response
    pub async fn collect(mut self) -> TransportResult<Response> {
        let mut buf = BytesMut::new();
        while let Some(chunk) = self.body.next().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(Response::new(self.status, self.content_type, buf.freeze()))
    }
}

impl std::fmt::Debug for StreamingResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingResponse")
            .field("status", &self.status)
            .field("content_type", &self.content_type)
            .finish_non_exhaustive()
    }
}

/// Executes protocol requests.
///
/// Implementations own connection management (pooling, TLS, chunked
/// decoding). A non-2xx status is a normal response, not an error.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// One round trip with the whole body buffered
    async fn execute(&self, request: Request) -> TransportResult<Response>;

    /// Open a request whose body is consumed as a stream.
    ///
    /// Dropping the returned body releases the connection.
    async fn open_stream(&self, request: Request) -> TransportResult<StreamingResponse>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn execute(&self, request: Request) -> TransportResult<Response> {
        (**self).execute(request).await
    }

    async fn open_stream(&self, request: Request) -> TransportResult<StreamingResponse> {
        (**self).open_stream(request).await
    }
}
