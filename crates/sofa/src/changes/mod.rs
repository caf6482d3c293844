//! Changes feed.
//!
//! [`Database::changes`] answers one normal or long-poll query.
//! [`Database::changes_feed`] runs any mode as a [`ChangesFeed`] stream; in
//! continuous mode the feed reconnects on failure and resumes from the last
//! delivered sequence, so each change is delivered at least once.

mod feed;
mod state;

pub use feed::ChangesFeed;
pub use state::FeedState;

use crate::config::FeedConfig;
use crate::database::Database;
use crate::error::{Error, Result};
use sofa_core::Seq;
use sofa_core::DESIGN_PREFIX;
use sofa_protocol::{ChangesBatch, FeedMode, Params, Request};
use std::str::FromStr;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// A server-side filter function, sent as `filter=design/name`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterRef {
    pub design: String,
    pub name: String,
}

impl FilterRef {
    pub fn new(design: impl Into<String>, name: impl Into<String>) -> Self {
        let design = design.into();
        let design = match design.strip_prefix(DESIGN_PREFIX) {
            Some(rest) => rest.to_string(),
            None => design,
        };
        Self {
            design,
            name: name.into(),
        }
    }
}

impl std::fmt::Display for FilterRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.design, self.name)
    }
}

impl FromStr for FilterRef {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.rsplit_once('/') {
            Some((design, name)) if !design.is_empty() && !name.is_empty() => {
                Ok(FilterRef::new(design, name))
            }
            _ => Err(Error::Protocol(sofa_protocol::ProtocolError::InvalidArgument(
                format!("filter must be design/name, got '{}'", s),
            ))),
        }
    }
}

/// What to ask the `_changes` endpoint for.
///
/// ```ignore
/// let sub = ChangesSubscription::continuous()
///     .since(Seq::now())
///     .filter(FilterRef::new("app", "by_type"))
///     .param("type", "order");
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ChangesSubscription {
    pub mode: FeedMode,
    /// Start after this checkpoint; `None` starts at the beginning
    pub since: Option<Seq>,
    pub filter: Option<FilterRef>,
    pub include_docs: bool,
    pub limit: Option<u64>,
    /// Server-side timeout; falls back to [`FeedConfig::server_timeout`]
    pub timeout: Option<Duration>,
    /// Server heartbeat; falls back to [`FeedConfig::heartbeat`]
    pub heartbeat: Option<Duration>,
    /// Extra parameters, e.g. arguments read by the filter function
    pub params: Params,
}

impl ChangesSubscription {
    pub fn new(mode: FeedMode) -> Self {
        Self {
            mode,
            since: None,
            filter: None,
            include_docs: false,
            limit: None,
            timeout: None,
            heartbeat: None,
            params: Params::new(),
        }
    }

    pub fn normal() -> Self {
        Self::new(FeedMode::Normal)
    }

    pub fn long_poll() -> Self {
        Self::new(FeedMode::LongPoll)
    }

    pub fn continuous() -> Self {
        Self::new(FeedMode::Continuous)
    }

    pub fn since(mut self, seq: impl Into<Seq>) -> Self {
        self.since = Some(seq.into());
        self
    }

    pub fn filter(mut self, filter: FilterRef) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn include_docs(mut self, include: bool) -> Self {
        self.include_docs = include;
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn heartbeat(mut self, heartbeat: Duration) -> Self {
        self.heartbeat = Some(heartbeat);
        self
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push(key, value);
        self
    }

    /// Query parameters for a request starting after `since`
    pub(crate) fn to_params(&self, since: Option<&Seq>, defaults: &FeedConfig) -> Params {
        let mut params = Params::new();
        params.push("feed", self.mode.as_str());
        if let Some(since) = since {
            params.push("since", since.to_param());
        }
        if let Some(filter) = &self.filter {
            params.push("filter", filter.to_string());
        }
        if self.include_docs {
            params.push("include_docs", "true");
        }
        if let Some(limit) = self.limit {
            params.push("limit", limit.to_string());
        }

        if self.mode != FeedMode::Normal {
            if let Some(timeout) = self.timeout.or(defaults.server_timeout) {
                params.push("timeout", timeout.as_millis().to_string());
            }
            if let Some(heartbeat) = self.heartbeat.or(defaults.heartbeat) {
                params.push("heartbeat", heartbeat.as_millis().to_string());
            }
        }

        params.extend(self.params.iter());
        params
    }
}

impl Default for ChangesSubscription {
    fn default() -> Self {
        Self::normal()
    }
}

impl Database {
    /// One normal or long-poll `_changes` query.
    ///
    /// A continuous subscription is answered as long-poll; use
    /// [`changes_feed`](Self::changes_feed) to follow a database.
    pub async fn changes(&self, subscription: &ChangesSubscription) -> Result<ChangesBatch> {
        let defaults = self.client().feed_config();
        let mut params = subscription.to_params(subscription.since.as_ref(), defaults);
        if subscription.mode == FeedMode::Continuous {
            params.set("feed", FeedMode::LongPoll.as_str());
        }
        let mode = match subscription.mode {
            FeedMode::Continuous => FeedMode::LongPoll,
            mode => mode,
        };
        self.changes_batch(params, mode).await
    }

    /// Like [`changes`](Self::changes), abandoned with [`Error::Cancelled`]
    /// once `cancel` fires. A long-poll can otherwise block until the
    /// server's timeout.
    pub async fn changes_until(
        &self,
        subscription: &ChangesSubscription,
        cancel: &CancellationToken,
    ) -> Result<ChangesBatch> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            batch = self.changes(subscription) => batch,
        }
    }

    /// One `_changes` request answered as a single batch
    pub(crate) async fn changes_batch(&self, params: Params, mode: FeedMode) -> Result<ChangesBatch> {
        let request = Request::changes(self.name(), params);
        match mode {
            FeedMode::Normal => self.client().execute_json(request).await,
            FeedMode::LongPoll | FeedMode::Continuous => self.client().execute_held(request).await,
        }
    }

    /// Follow the changes feed as a stream of events.
    ///
    /// Must be called within a tokio runtime; the feed runs on its own task.
    pub fn changes_feed(&self, subscription: ChangesSubscription) -> ChangesFeed {
        let config = self.client().feed_config().clone();
        ChangesFeed::spawn(self.clone(), subscription, config)
    }

    /// Like [`changes_feed`](Self::changes_feed) with feed settings other than the client's
    pub fn changes_feed_with(
        &self,
        subscription: ChangesSubscription,
        config: FeedConfig,
    ) -> ChangesFeed {
        ChangesFeed::spawn(self.clone(), subscription, config)
    }
}
