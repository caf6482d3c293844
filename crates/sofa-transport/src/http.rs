//! HTTP transport over reqwest

use crate::error::{TransportError, TransportResult};
use crate::{StreamingResponse, Transport};
use async_trait::async_trait;
use futures_util::StreamExt;
use sofa_protocol::{Body, Method, Request, Response};
use std::time::Duration;
use tracing::debug;

/// Default `User-Agent` header
pub const DEFAULT_USER_AGENT: &str = concat!("sofa/", env!("CARGO_PKG_VERSION"));

/// Transport speaking HTTP to a server base URL
#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    request_timeout: Option<Duration>,
}

impl HttpTransport {
    pub fn new(base_url: &str) -> TransportResult<Self> {
        Self::with_options(base_url, None, DEFAULT_USER_AGENT)
    }

    /// Create a transport with a per-request timeout for buffered requests.
    ///
    /// Streamed requests are never subject to `request_timeout`; their
    /// lifetime is governed by the caller.
    pub fn with_options(
        base_url: &str,
        request_timeout: Option<Duration>,
        user_agent: &str,
    ) -> TransportResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()?;
        Self::with_client(client, base_url, request_timeout)
    }

    /// Wrap an existing reqwest client
    pub fn with_client(
        client: reqwest::Client,
        base_url: &str,
        request_timeout: Option<Duration>,
    ) -> TransportResult<Self> {
        let url = reqwest::Url::parse(base_url)
            .map_err(|e| TransportError::InvalidRequest(format!("{}: {}", base_url, e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(TransportError::InvalidRequest(format!(
                "unsupported scheme: {}",
                url.scheme()
            )));
        }

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            request_timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Absolute URL of a request
    pub fn url_for(&self, request: &Request) -> String {
        format!("{}{}", self.base_url, request.path_and_query())
    }

    async fn send(
        &self,
        request: Request,
        timeout: Option<Duration>,
    ) -> TransportResult<reqwest::Response> {
        let url = self.url_for(&request);
        debug!(method = %request.method, url = %url, "sending request");

        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Head => reqwest::Method::HEAD,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Delete => reqwest::Method::DELETE,
        };

        let mut builder = self
            .client
            .request(method, url)
            .header(reqwest::header::ACCEPT, "application/json");
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(content_type) = request.body.content_type() {
            builder = builder.header(reqwest::header::CONTENT_TYPE, content_type);
        }
        if let Body::Json(bytes) | Body::Form(bytes) = request.body {
            builder = builder.body(bytes);
        }

        Ok(builder.send().await?)
    }
}

fn content_type(resp: &reqwest::Response) -> Option<String> {
    resp.headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

#[async_trait]
impl Transport for HttpTransport {
    async fn execute(&self, request: Request) -> TransportResult<Response> {
        let resp = self.send(request, self.request_timeout).await?;
        let status = resp.status().as_u16();
        let content_type = content_type(&resp);
        let body = resp.bytes().await?;
        debug!(status, bytes = body.len(), "response received");
        Ok(Response::new(status, content_type, body))
    }

    async fn open_stream(&self, request: Request) -> TransportResult<StreamingResponse> {
        let resp = self.send(request, None).await?;
        let status = resp.status().as_u16();
        let content_type = content_type(&resp);
        debug!(status, "stream opened");

        let body = resp
            .bytes_stream()
            .map(|chunk| chunk.map_err(TransportError::from))
            .boxed();

        Ok(StreamingResponse {
            status,
            content_type,
            body,
        })
    }
}
