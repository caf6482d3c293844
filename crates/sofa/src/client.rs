//! Server-level client

use crate::config::{ClientConfig, FeedConfig};
use crate::database::Database;
use crate::error::{Error, Result, StatusError};
use serde::de::DeserializeOwned;
use sofa_protocol::{DatabaseInfo, Request, Response, ServerInfo, UuidList};
use sofa_transport::http::DEFAULT_USER_AGENT;
use sofa_transport::{HttpTransport, StreamingResponse, Transport};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Handle to one server.
///
/// Cloning is cheap; clones share the transport and its connection pool.
#[derive(Clone)]
pub struct Client {
    transport: Arc<dyn Transport>,
    feed: Arc<FeedConfig>,
}

impl Client {
    /// Connect over HTTP using `config`
    pub fn new(config: ClientConfig) -> Result<Self> {
        let user_agent = config.user_agent.as_deref().unwrap_or(DEFAULT_USER_AGENT);
        let transport = HttpTransport::with_options(&config.url, config.request_timeout, user_agent)?;
        Ok(Self::with_transport(transport).with_feed_config(config.feed))
    }

    /// Connect over HTTP with default settings
    pub fn connect(url: &str) -> Result<Self> {
        Self::new(ClientConfig::new(url))
    }

    /// Use any transport, e.g. an in-process server
    pub fn with_transport(transport: impl Transport) -> Self {
        Self {
            transport: Arc::new(transport),
            feed: Arc::new(FeedConfig::default()),
        }
    }

    pub fn with_feed_config(mut self, feed: FeedConfig) -> Self {
        self.feed = Arc::new(feed);
        self
    }

    pub fn feed_config(&self) -> &FeedConfig {
        &self.feed
    }

    /// One round trip; any non-2xx status becomes [`Error::Status`]
    pub async fn execute(&self, request: Request) -> Result<Response> {
        let method = request.method;
        let path = request.path.clone();
        let started = Instant::now();

        let response = self.transport.execute(request).await?;
        debug!(
            %method,
            %path,
            status = response.status,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "request"
        );

        if response.is_success() {
            Ok(response)
        } else {
            Err(StatusError::from_response(&response).into())
        }
    }

    /// Execute and decode the JSON body
    pub async fn execute_json<T: DeserializeOwned>(&self, request: Request) -> Result<T> {
        let response = self.execute(request).await?;
        decode(&response)
    }

    /// Execute a request the server may hold open past the request timeout
    /// (long-poll) and decode the JSON body
    pub(crate) async fn execute_held<T: DeserializeOwned>(&self, request: Request) -> Result<T> {
        let response = self.open_stream(request).await?.collect().await?;
        decode(&response)
    }

    /// Open a streamed request; a non-2xx status is read whole and returned as an error
    pub(crate) async fn open_stream(&self, request: Request) -> Result<StreamingResponse> {
        let path = request.path.clone();
        let response = self.transport.open_stream(request).await?;
        debug!(%path, status = response.status, "stream opened");

        if response.is_success() {
            Ok(response)
        } else {
            let response = response.collect().await?;
            Err(StatusError::from_response(&response).into())
        }
    }

    pub async fn server_info(&self) -> Result<ServerInfo> {
        self.execute_json(Request::server_info()).await
    }

    pub async fn all_dbs(&self) -> Result<Vec<String>> {
        self.execute_json(Request::all_dbs()).await
    }

    /// Ask the server for `count` fresh ids
    pub async fn uuids(&self, count: usize) -> Result<Vec<String>> {
        let list: UuidList = self.execute_json(Request::uuids(count)).await?;
        Ok(list.uuids)
    }

    /// Create a database and return a handle to it
    pub async fn create_database(&self, name: &str) -> Result<Database> {
        self.execute(Request::create_db(name)).await?;
        Ok(self.database(name))
    }

    pub async fn delete_database(&self, name: &str) -> Result<()> {
        self.execute(Request::delete_db(name)).await?;
        Ok(())
    }

    pub async fn database_info(&self, name: &str) -> Result<DatabaseInfo> {
        self.execute_json(Request::db_info(name)).await
    }

    /// Handle to a database; no request is made
    pub fn database(&self, name: &str) -> Database {
        Database::new(self.clone(), name)
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client").field("feed", &self.feed).finish_non_exhaustive()
    }
}

/// Decode a JSON body, reporting malformed payloads as [`Error::Decode`]
pub(crate) fn decode<T: DeserializeOwned>(response: &Response) -> Result<T> {
    response
        .decode()
        .map_err(|e| Error::decode(std::any::type_name::<T>(), e))
}
