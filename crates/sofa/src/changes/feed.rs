//! Feed task and consumer handle

use super::state::{FeedState, StateCell};
use super::ChangesSubscription;
use crate::config::FeedConfig;
use crate::database::Database;
use crate::error::{Error, Result};
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use sofa_core::{ChangeEvent, Seq};
use sofa_protocol::{ChangesParser, FeedLine, FeedMode, Request};
use sofa_transport::{BodyStream, TransportError, TransportResult};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::error::Elapsed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A running changes feed.
///
/// Yields events in sequence order. After an `Err` item or cancellation the
/// stream ends. Dropping the feed cancels it.
pub struct ChangesFeed {
    rx: mpsc::Receiver<Result<ChangeEvent>>,
    state: Arc<StateCell>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
    last_seq: Option<Seq>,
}

impl ChangesFeed {
    pub(crate) fn spawn(db: Database, subscription: ChangesSubscription, config: FeedConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
        let state = Arc::new(StateCell::new());
        let cancel = CancellationToken::new();
        let last_seq = subscription.since.clone();

        let task = FeedTask {
            since: subscription.since.clone(),
            db,
            subscription,
            config,
            tx,
            state: state.clone(),
            cancel: cancel.child_token(),
        };

        Self {
            rx,
            state,
            cancel,
            task: Some(tokio::spawn(task.run())),
            last_seq,
        }
    }

    /// Next event; `None` once the feed is closed
    pub async fn next(&mut self) -> Option<Result<ChangeEvent>> {
        StreamExt::next(self).await
    }

    pub fn state(&self) -> FeedState {
        self.state.get()
    }

    /// Watch lifecycle transitions
    pub fn state_changes(&self) -> watch::Receiver<FeedState> {
        self.state.subscribe()
    }

    /// Sequence of the last event handed to the consumer, or the starting
    /// checkpoint if none was
    pub fn last_seq(&self) -> Option<&Seq> {
        self.last_seq.as_ref()
    }

    /// Stop the feed. No further event is yielded, buffered ones included.
    pub fn cancel(&self) {
        self.cancel.cancel();
        self.state.set(FeedState::Closed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Cancel and wait until the feed task has released its connection
    pub async fn close(mut self) {
        self.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Stream for ChangesFeed {
    type Item = Result<ChangeEvent>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.cancel.is_cancelled() {
            return Poll::Ready(None);
        }
        match self.rx.poll_recv(cx) {
            Poll::Ready(Some(Ok(event))) => {
                self.last_seq = Some(event.seq.clone());
                Poll::Ready(Some(Ok(event)))
            }
            other => other,
        }
    }
}

impl Drop for ChangesFeed {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for ChangesFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangesFeed")
            .field("state", &self.state.get())
            .field("last_seq", &self.last_seq)
            .finish_non_exhaustive()
    }
}

/// Why a connection stopped delivering
#[derive(Debug)]
enum Interruption {
    Cancelled,
    /// The consumer dropped its receiver
    ConsumerGone,
    /// The server ended the stream with a final `last_seq`
    Finished,
    Failed(Error),
}

struct FeedTask {
    db: Database,
    subscription: ChangesSubscription,
    config: FeedConfig,
    tx: mpsc::Sender<Result<ChangeEvent>>,
    state: Arc<StateCell>,
    cancel: CancellationToken,
    /// Checkpoint: the last event pushed to the consumer
    since: Option<Seq>,
}

impl FeedTask {
    async fn run(mut self) {
        info!(db = %self.db.name(), mode = %self.subscription.mode, "changes feed started");

        match self.subscription.mode {
            FeedMode::Continuous => self.follow().await,
            FeedMode::Normal | FeedMode::LongPoll => self.once().await,
        }

        self.state.set(FeedState::Closed);
        info!(db = %self.db.name(), since = ?self.since, "changes feed closed");
    }

    /// Normal and long-poll: one request, one batch
    async fn once(&mut self) {
        self.state.set(FeedState::Connecting);
        let params = self.subscription.to_params(self.since.as_ref(), &self.config);

        let batch = tokio::select! {
            _ = self.cancel.cancelled() => return,
            batch = self.db.changes_batch(params, self.subscription.mode) => batch,
        };

        match batch {
            Ok(batch) => {
                self.state.set(FeedState::Delivering);
                for event in batch.results {
                    if let Err(stop) = self.deliver(event).await {
                        debug!(reason = ?stop, "changes delivery stopped");
                        return;
                    }
                }
                self.since = Some(batch.last_seq);
            }
            Err(e) => self.fail(e).await,
        }
    }

    /// Continuous: stream, and reopen from the checkpoint whenever the stream breaks
    async fn follow(&mut self) {
        let mut attempt: u32 = 0;

        loop {
            if !self.state.set(FeedState::Connecting) {
                return;
            }

            let interruption = match self.connect().await {
                Ok(body) => {
                    attempt = 0;
                    if !self.state.set(FeedState::Delivering) {
                        return;
                    }
                    debug!(db = %self.db.name(), since = ?self.since, "changes stream open");
                    self.pump(body).await
                }
                Err(interruption) => interruption,
            };

            let error = match interruption {
                Interruption::Cancelled | Interruption::ConsumerGone => return,
                Interruption::Finished => None,
                Interruption::Failed(e) if !e.is_retryable() => {
                    self.fail(e).await;
                    return;
                }
                Interruption::Failed(e) => Some(e),
            };

            if !self.state.set(FeedState::Reconnecting) {
                return;
            }

            let delay = match error {
                None => Duration::ZERO,
                Some(e) => {
                    attempt = attempt.saturating_add(1);
                    if !self.config.reconnect.allows(attempt) {
                        warn!(db = %self.db.name(), attempt, error = %e, "giving up on changes feed");
                        self.fail(e).await;
                        return;
                    }
                    let delay = self.config.reconnect.delay_for(attempt);
                    warn!(
                        db = %self.db.name(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "changes feed interrupted, reconnecting"
                    );
                    delay
                }
            };

            if !delay.is_zero() {
                tokio::select! {
                    _ = self.cancel.cancelled() => return,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }

    async fn connect(&self) -> std::result::Result<BodyStream, Interruption> {
        let params = self.subscription.to_params(self.since.as_ref(), &self.config);
        let request = Request::changes(self.db.name(), params);

        tokio::select! {
            _ = self.cancel.cancelled() => Err(Interruption::Cancelled),
            opened = self.db.client().open_stream(request) => match opened {
                Ok(response) => Ok(response.body),
                Err(e) => Err(Interruption::Failed(e)),
            },
        }
    }

    /// Read lines until the stream breaks; each event is pushed and then
    /// becomes the checkpoint
    async fn pump(&mut self, mut body: BodyStream) -> Interruption {
        let mut parser = ChangesParser::new();

        loop {
            let chunk = tokio::select! {
                _ = self.cancel.cancelled() => return Interruption::Cancelled,
                chunk = next_chunk(&mut body, self.config.idle_timeout) => chunk,
            };

            let bytes = match chunk {
                Err(_) => {
                    return Interruption::Failed(TransportError::Timeout.into());
                }
                Ok(None) => {
                    let dropped = parser.finish();
                    debug!(dropped, "changes stream ended without last_seq");
                    return Interruption::Failed(
                        TransportError::Disconnected("changes stream ended".into()).into(),
                    );
                }
                Ok(Some(Err(e))) => return Interruption::Failed(e.into()),
                Ok(Some(Ok(bytes))) => bytes,
            };

            parser.feed(&bytes);
            loop {
                match parser.next_line() {
                    Ok(None) => break,
                    Ok(Some(FeedLine::Change(event))) => {
                        if let Err(stop) = self.deliver(event).await {
                            return stop;
                        }
                    }
                    Ok(Some(FeedLine::Finished { last_seq, .. })) => {
                        debug!(%last_seq, "server closed changes stream");
                        self.since = Some(last_seq);
                        return Interruption::Finished;
                    }
                    Err(e) => return Interruption::Failed(Error::decode("changes line", e)),
                }
            }
        }
    }

    /// Push one event, waiting for channel capacity
    async fn deliver(&mut self, event: ChangeEvent) -> std::result::Result<(), Interruption> {
        let seq = event.seq.clone();
        let sent = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(Interruption::Cancelled),
            sent = self.tx.send(Ok(event)) => sent,
        };
        if sent.is_err() {
            return Err(Interruption::ConsumerGone);
        }
        self.since = Some(seq);
        Ok(())
    }

    /// Report a terminal error to the consumer
    async fn fail(&self, error: Error) {
        warn!(db = %self.db.name(), error = %error, "changes feed failed");
        tokio::select! {
            _ = self.cancel.cancelled() => {}
            _ = self.tx.send(Err(error)) => {}
        }
    }
}

type Chunk = Option<TransportResult<Bytes>>;

/// Next body chunk, or `Elapsed` if the connection stayed silent for `idle`
async fn next_chunk(
    body: &mut BodyStream,
    idle: Option<Duration>,
) -> std::result::Result<Chunk, Elapsed> {
    match idle {
        Some(idle) => tokio::time::timeout(idle, body.next()).await,
        None => Ok(body.next().await),
    }
}
