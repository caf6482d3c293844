//! `_changes` in all three feed modes

use crate::design::FilterFn;
use crate::error::{ServerError, ServerResult};
use crate::store::Store;
use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::json;
use sofa_core::{ChangeEvent, RevisionRef, Seq};
use sofa_protocol::{ChangesBatch, FeedMode, Params};
use sofa_transport::{TransportError, TransportResult};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Server-side default for `timeout`
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// How sequence numbers are rendered on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SeqStyle {
    /// Plain integers
    #[default]
    Integer,
    /// `"<n>-<opaque>"` strings
    Opaque,
}

impl SeqStyle {
    pub fn render(&self, n: u64) -> Seq {
        match self {
            SeqStyle::Integer => Seq::Number(n),
            SeqStyle::Opaque => Seq::Opaque(format!("{}-g1AAAAB{:08x}", n, n)),
        }
    }
}

/// A parsed `_changes` request
pub struct ChangesQuery {
    pub mode: FeedMode,
    /// Position to start after; `None` means "now"
    pub since: Option<u64>,
    pub filter: Option<FilterFn>,
    pub include_docs: bool,
    pub limit: Option<usize>,
    pub timeout: Duration,
    pub heartbeat: Option<Duration>,
    pub params: Params,
}

fn millis(params: &Params, name: &str) -> ServerResult<Option<Duration>> {
    params
        .get(name)
        .map(|raw| {
            raw.parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|_| ServerError::bad_request(format!("invalid {}: {}", name, raw)))
        })
        .transpose()
}

impl ChangesQuery {
    /// Parse request parameters; `filter` resolves `design/name` to a function
    pub fn parse(
        params: &Params,
        filter: impl FnOnce(&str, &str) -> ServerResult<FilterFn>,
    ) -> ServerResult<Self> {
        let mode = match params.get("feed") {
            Some(raw) => raw.parse().map_err(ServerError::from)?,
            None => FeedMode::Normal,
        };

        let since = match params.get("since") {
            None => Some(0),
            Some("now") => None,
            Some(raw) => Some(
                Seq::from(raw)
                    .position()
                    .ok_or_else(|| ServerError::bad_request(format!("invalid since: {}", raw)))?,
            ),
        };

        let filter = match params.get("filter") {
            None => None,
            Some(raw) => {
                let (design, name) = raw.split_once('/').ok_or_else(|| {
                    ServerError::bad_request(
                        "filter parameter must be of the form `designname/filtername`",
                    )
                })?;
                Some(filter(design, name)?)
            }
        };

        let limit = params
            .get("limit")
            .map(|raw| {
                raw.parse::<usize>()
                    .map_err(|_| ServerError::bad_request(format!("invalid limit: {}", raw)))
            })
            .transpose()?;

        Ok(Self {
            mode,
            since,
            filter,
            include_docs: params.get("include_docs") == Some("true"),
            limit,
            timeout: millis(params, "timeout")?.unwrap_or(DEFAULT_TIMEOUT),
            heartbeat: millis(params, "heartbeat")?,
            params: params.clone(),
        })
    }

    /// Collect changes after `since`.
    ///
    /// Returns the matching events and the position the scan reached, which
    /// moves past filtered-out changes too.
    pub fn scan(&self, store: &Store, since: u64, style: SeqStyle) -> (Vec<ChangeEvent>, u64) {
        let mut reached = since.max(store.update_seq());
        let mut events = Vec::new();

        for record in store.changes_since(since) {
            if self.limit.is_some_and(|limit| events.len() >= limit) {
                reached = record.seq - 1;
                break;
            }
            let doc = store.latest(&record.id);
            if let Some(filter) = &self.filter {
                match &doc {
                    Some(doc) if filter(doc, &self.params) => {}
                    _ => continue,
                }
            }
            events.push(ChangeEvent {
                seq: style.render(record.seq),
                id: record.id,
                changes: vec![RevisionRef { rev: record.rev }],
                deleted: record.deleted,
                doc: if self.include_docs { doc } else { None },
            });
        }
        (events, reached)
    }
}

/// Answer a normal or long-poll request
pub async fn batch(
    store: &Mutex<Store>,
    notify: &broadcast::Sender<u64>,
    query: &ChangesQuery,
    style: SeqStyle,
) -> ChangesBatch {
    // Subscribe before the first scan so no write slips between the two
    let mut rx = notify.subscribe();
    let deadline = Instant::now() + query.timeout;

    let mut since = match query.since {
        Some(since) => since,
        None => store.lock().update_seq(),
    };

    loop {
        let (results, reached) = query.scan(&store.lock(), since, style);
        since = reached;

        if query.mode != FeedMode::LongPoll || !results.is_empty() {
            let pending = query.limit.map(|_| store.lock().changes_since(reached).len() as u64);
            return ChangesBatch {
                results,
                last_seq: style.render(reached),
                pending,
            };
        }

        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => {
                return ChangesBatch {
                    results,
                    last_seq: style.render(reached),
                    pending: None,
                };
            }
            r = rx.recv() => {
                if let Err(broadcast::error::RecvError::Closed) = r {
                    return ChangesBatch {
                        results,
                        last_seq: style.render(reached),
                        pending: None,
                    };
                }
            }
        }
    }
}

/// Sending half of a continuous stream
pub struct LineSink {
    tx: mpsc::Sender<TransportResult<Bytes>>,
    chunk_size: Option<usize>,
    cancel: CancellationToken,
}

impl LineSink {
    pub fn new(
        tx: mpsc::Sender<TransportResult<Bytes>>,
        chunk_size: Option<usize>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            tx,
            chunk_size,
            cancel,
        }
    }

    async fn send(&self, item: TransportResult<Bytes>) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            r = self.tx.send(item) => r.is_ok(),
        }
    }

    /// Write one line, split into chunks when configured
    async fn line(&self, mut line: Vec<u8>) -> bool {
        line.push(b'\n');
        let bytes = Bytes::from(line);
        match self.chunk_size {
            Some(size) if size > 0 => {
                let mut offset = 0;
                while offset < bytes.len() {
                    let end = (offset + size).min(bytes.len());
                    if !self.send(Ok(bytes.slice(offset..end))).await {
                        return false;
                    }
                    offset = end;
                }
                true
            }
            _ => self.send(Ok(bytes)).await,
        }
    }
}

/// Drive a continuous feed until timeout, disconnect or severing
pub async fn continuous(
    store: Arc<Mutex<Store>>,
    notify: broadcast::Sender<u64>,
    query: ChangesQuery,
    style: SeqStyle,
    sink: LineSink,
) {
    stream_changes(store, notify, query, style, &sink).await;

    if sink.cancel.is_cancelled() {
        debug!("continuous feed severed");
        let reset = Err(TransportError::Disconnected("connection reset by server".into()));
        let _ = tokio::time::timeout(Duration::from_secs(1), sink.tx.send(reset)).await;
    }
}

async fn stream_changes(
    store: Arc<Mutex<Store>>,
    notify: broadcast::Sender<u64>,
    query: ChangesQuery,
    style: SeqStyle,
    sink: &LineSink,
) {
    let mut rx = notify.subscribe();
    let deadline = Instant::now() + query.timeout;
    let mut since = match query.since {
        Some(since) => since,
        None => store.lock().update_seq(),
    };
    let mut heartbeat = query
        .heartbeat
        .map(|period| tokio::time::interval_at(Instant::now() + period, period));

    debug!(since, "continuous feed started");

    loop {
        let (events, reached) = query.scan(&store.lock(), since, style);
        for event in events {
            let line = match serde_json::to_vec(&event) {
                Ok(line) => line,
                Err(_) => return,
            };
            trace!(id = %event.id, seq = %event.seq, "streaming change");
            if !sink.line(line).await {
                return;
            }
        }
        since = reached;

        tokio::select! {
            _ = sink.cancel.cancelled() => return,
            _ = sink.tx.closed() => {
                debug!("continuous feed reader went away");
                return;
            }
            _ = tokio::time::sleep_until(deadline) => {
                let last = json!({ "last_seq": style.render(since) });
                let _ = sink.line(last.to_string().into_bytes()).await;
                return;
            }
            _ = async {
                match heartbeat.as_mut() {
                    Some(interval) => { interval.tick().await; }
                    None => std::future::pending::<()>().await,
                }
            } => {
                if !sink.line(Vec::new()).await {
                    return;
                }
            }
            r = rx.recv() => {
                if let Err(broadcast::error::RecvError::Closed) = r {
                    return;
                }
            }
        }
    }
}
