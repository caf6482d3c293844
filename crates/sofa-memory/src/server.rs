//! In-process server fake

use crate::changes::{self, ChangesQuery, LineSink, SeqStyle};
use crate::design::{self, ListReply, Reduce, Registry, RowQuery, ViewDef};
use crate::error::{ServerError, ServerResult};
use crate::store::{Store, Validator, WriteMode};
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use futures_util::stream::{self, StreamExt};
use parking_lot::Mutex;
use percent_encoding::percent_decode_str;
use serde_json::json;
use sofa_core::{Document, Revision, Value, ViewRow, ViewRows, DESIGN_PREFIX, LOCAL_PREFIX};
use sofa_protocol::{
    Body, DatabaseInfo, FeedMode, Method, Params, Request, Response, ServerInfo, UuidList,
};
use sofa_transport::{StreamingResponse, Transport, TransportError, TransportResult};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Version string reported by `GET /`
pub const SERVER_VERSION: &str = "3.3.3";

/// A failure to inject into upcoming requests
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// Answer with this status and an `{"error":"unavailable"}` body
    Status(u16),
    /// Fail before any response, as a refused connection would
    Refuse,
}

struct Db {
    store: Arc<Mutex<Store>>,
    notify: broadcast::Sender<u64>,
}

impl Db {
    fn new() -> Self {
        let (notify, _) = broadcast::channel(1024);
        Self {
            store: Arc::new(Mutex::new(Store::new())),
            notify,
        }
    }

    fn notify(&self) {
        let seq = self.store.lock().update_seq();
        let _ = self.notify.send(seq);
    }
}

#[derive(Default)]
struct Inner {
    databases: DashMap<String, Arc<Db>>,
    registry: Registry,
    seq_style: Mutex<SeqStyle>,
    chunk_size: Mutex<Option<usize>>,
    streams: Mutex<CancellationToken>,
    active_streams: Arc<AtomicUsize>,
    lines_streamed: Arc<AtomicUsize>,
    shut_down: AtomicBool,
    faults: Mutex<VecDeque<Fault>>,
    log: Mutex<Vec<Request>>,
}

/// An in-memory server speaking the database protocol.
///
/// Implements [`Transport`], so a client can be pointed at it directly.
/// Models what clients observe: revision checks and conflict branches,
/// sequence numbers, all three `_changes` modes, filters, views, list and
/// update functions. Design functions are Rust closures.
#[derive(Clone, Default)]
pub struct MemoryServer {
    inner: Arc<Inner>,
}

/// Decrements the live stream count when a stream task ends
struct StreamGuard(Arc<AtomicUsize>);

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn valid_db_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some('a'..='z'))
        && chars.all(|c| {
            matches!(c, 'a'..='z' | '0'..='9' | '_' | '$' | '(' | ')' | '+' | '-' | '/')
        })
}

fn new_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

fn ok_json(status: u16, value: serde_json::Value) -> Response {
    Response::new(status, Some("application/json".into()), value.to_string())
}

fn encode<T: serde::Serialize>(status: u16, value: &T) -> ServerResult<Response> {
    Response::json(status, value).map_err(ServerError::from)
}

fn write_ok(id: &str, rev: &Revision) -> serde_json::Value {
    json!({ "ok": true, "id": id, "rev": rev.to_string() })
}

fn parse_json<T: serde::de::DeserializeOwned>(body: &Body) -> ServerResult<T> {
    match body {
        Body::Json(bytes) => serde_json::from_slice(bytes)
            .map_err(|e| ServerError::bad_request(format!("invalid JSON: {}", e))),
        _ => Err(ServerError::bad_request("Request body must be JSON")),
    }
}

fn decode_segments(path: &str) -> Vec<String> {
    path.split('/')
        .filter(|s| !s.is_empty())
        .map(|s| percent_decode_str(s).decode_utf8_lossy().into_owned())
        .collect()
}

impl MemoryServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Render sequence markers as opaque `"<n>-<token>"` strings
    pub fn with_opaque_seqs(self) -> Self {
        *self.inner.seq_style.lock() = SeqStyle::Opaque;
        self
    }

    /// Split every streamed line into chunks of at most `size` bytes
    pub fn with_chunk_size(self, size: usize) -> Self {
        *self.inner.chunk_size.lock() = Some(size);
        self
    }

    /// Create a database directly; returns `false` if it already exists
    pub fn create_db(&self, name: &str) -> bool {
        let mut created = false;
        self.inner.databases.entry(name.to_string()).or_insert_with(|| {
            created = true;
            Arc::new(Db::new())
        });
        created
    }

    pub fn register_validator(
        &self,
        db: &str,
        f: impl Fn(&Document) -> Result<(), String> + Send + Sync + 'static,
    ) -> ServerResult<()> {
        let validator: Validator = Arc::new(f);
        self.db(db)?.store.lock().add_validator(validator);
        Ok(())
    }

    pub fn register_filter(
        &self,
        db: &str,
        design: &str,
        name: &str,
        f: impl Fn(&Document, &Params) -> bool + Send + Sync + 'static,
    ) {
        self.inner.registry.add_filter(db, design, name, Arc::new(f));
    }

    pub fn register_view(
        &self,
        db: &str,
        design: &str,
        name: &str,
        map: impl Fn(&Document) -> Vec<(Value, Value)> + Send + Sync + 'static,
        reduce: Option<Reduce>,
    ) {
        let view = ViewDef {
            map: Arc::new(map),
            reduce,
        };
        self.inner.registry.add_view(db, design, name, view);
    }

    pub fn register_list(
        &self,
        db: &str,
        design: &str,
        name: &str,
        f: impl Fn(&ViewRows, &Params) -> ListReply + Send + Sync + 'static,
    ) {
        self.inner.registry.add_list(db, design, name, Arc::new(f));
    }

    pub fn register_update(
        &self,
        db: &str,
        design: &str,
        name: &str,
        f: impl Fn(Option<Document>, &Params) -> Result<Document, String> + Send + Sync + 'static,
    ) {
        self.inner.registry.add_update(db, design, name, Arc::new(f));
    }

    /// Drop every open continuous stream, as a network failure would
    pub fn sever_streams(&self) {
        let old = std::mem::replace(&mut *self.inner.streams.lock(), CancellationToken::new());
        info!("severing open streams");
        old.cancel();
    }

    /// Stop serving: open streams are severed and every later request fails
    /// with [`TransportError::Closed`]
    pub fn shutdown(&self) {
        self.inner.shut_down.store(true, Ordering::SeqCst);
        self.sever_streams();
    }

    /// Number of continuous streams still being served
    pub fn active_streams(&self) -> usize {
        self.inner.active_streams.load(Ordering::SeqCst)
    }

    /// Lines, heartbeats included, that clients have read from continuous streams
    pub fn lines_streamed(&self) -> usize {
        self.inner.lines_streamed.load(Ordering::SeqCst)
    }

    /// Make the next `count` requests fail with `fault`
    pub fn inject(&self, fault: Fault, count: usize) {
        let mut faults = self.inner.faults.lock();
        faults.extend(std::iter::repeat(fault).take(count));
    }

    /// Every request received so far, in arrival order
    pub fn requests(&self) -> Vec<Request> {
        self.inner.log.lock().clone()
    }

    pub fn clear_requests(&self) {
        self.inner.log.lock().clear();
    }

    /// Leaf revisions of a document, for inspecting conflict branches
    pub fn leaves(&self, db: &str, id: &str) -> Vec<Revision> {
        let Ok(db) = self.db(db) else {
            return Vec::new();
        };
        let mut leaves = db.store.lock().leaves();
        leaves.remove(id).unwrap_or_default()
    }

    fn db(&self, name: &str) -> ServerResult<Arc<Db>> {
        self.inner
            .databases
            .get(name)
            .map(|db| db.value().clone())
            .ok_or_else(|| ServerError::not_found("Database does not exist."))
    }

    fn seq_style(&self) -> SeqStyle {
        *self.inner.seq_style.lock()
    }

    /// Record the request and pop any injected fault
    fn admit(&self, request: &Request) -> TransportResult<Option<Response>> {
        self.inner.log.lock().push(request.clone());
        if self.inner.shut_down.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        match self.inner.faults.lock().pop_front() {
            None => Ok(None),
            Some(Fault::Refuse) => Err(TransportError::Connect("connection refused".into())),
            Some(Fault::Status(status)) => Ok(Some(Response::error(
                status,
                "unavailable",
                "injected failure",
            ))),
        }
    }

    /// Answer a buffered request
    pub async fn handle(&self, request: &Request) -> Response {
        debug!(method = %request.method, path = %request.path, "memory request");
        let response = match self.route(request).await {
            Ok(response) => response,
            Err(e) => e.to_response(),
        };
        if request.method == Method::Head {
            Response::new(response.status, response.content_type, Bytes::new())
        } else {
            response
        }
    }

    async fn route(&self, request: &Request) -> ServerResult<Response> {
        let segments = decode_segments(&request.path);
        let parts: Vec<&str> = segments.iter().map(String::as_str).collect();
        let method = request.method;

        match parts.as_slice() {
            [] => match method {
                Method::Get | Method::Head => self.server_info(),
                _ => Err(ServerError::method_not_allowed()),
            },
            ["_all_dbs"] => {
                let mut names: Vec<String> =
                    self.inner.databases.iter().map(|e| e.key().clone()).collect();
                names.sort();
                encode(200, &names)
            }
            ["_uuids"] => {
                let count = match request.params.get("count") {
                    Some(raw) => raw
                        .parse::<usize>()
                        .map_err(|_| ServerError::bad_request("invalid count"))?,
                    None => 1,
                };
                let uuids = UuidList {
                    uuids: (0..count).map(|_| new_id()).collect(),
                };
                encode(200, &uuids)
            }
            [db] => self.database(method, db, request),
            [db, "_bulk_docs"] => self.bulk_docs(db, request),
            [db, "_all_docs"] => self.all_docs(db, &request.params),
            [db, "_changes"] => self.changes(db, &request.params).await,
            [db, "_design", design, "_view", view] => {
                let rows = self.query_view(db, design, view, &request.params)?;
                encode(200, &rows)
            }
            [db, "_design", design, "_list", list, view] => {
                let rows = self.query_view(db, design, view, &request.params)?;
                let f = self.inner.registry.list(db, design, list)?;
                let reply = f(&rows, &request.params);
                Ok(Response::new(200, Some(reply.content_type), reply.body))
            }
            [db, "_design", design, "_update", name] => {
                self.update(db, design, name, None, request)
            }
            [db, "_design", design, "_update", name, id] => {
                self.update(db, design, name, Some(*id), request)
            }
            [db, "_design", name] => {
                self.document(method, db, &format!("{}{}", DESIGN_PREFIX, name), request)
            }
            [db, "_local", name] => {
                self.document(method, db, &format!("{}{}", LOCAL_PREFIX, name), request)
            }
            [db, id] => self.document(method, db, id, request),
            _ => Err(ServerError::not_found("missing")),
        }
    }

    fn server_info(&self) -> ServerResult<Response> {
        let mut extra = sofa_core::Fields::new();
        extra.insert("vendor".into(), Value::from(json!({ "name": "sofa-memory" })));
        encode(
            200,
            &ServerInfo {
                couchdb: "Welcome".into(),
                version: SERVER_VERSION.into(),
                extra,
            },
        )
    }

    fn database(&self, method: Method, name: &str, request: &Request) -> ServerResult<Response> {
        match method {
            Method::Get | Method::Head => {
                let db = self.db(name)?;
                let store = db.store.lock();
                let (doc_count, doc_del_count) = store.counts();
                encode(
                    200,
                    &DatabaseInfo {
                        db_name: name.to_string(),
                        doc_count,
                        doc_del_count,
                        update_seq: self.seq_style().render(store.update_seq()),
                        extra: Default::default(),
                    },
                )
            }
            Method::Put => {
                if !valid_db_name(name) {
                    return Err(ServerError::new(
                        400,
                        "illegal_database_name",
                        format!("Name: '{}'. Only lowercase characters (a-z), digits (0-9), and any of the characters _, $, (, ), +, -, and / are allowed. Must begin with a letter.", name),
                    ));
                }
                if !self.create_db(name) {
                    return Err(ServerError::new(
                        412,
                        "file_exists",
                        "The database could not be created, the file already exists.",
                    ));
                }
                info!(db = name, "database created");
                Ok(ok_json(201, json!({ "ok": true })))
            }
            Method::Delete => {
                if self.inner.databases.remove(name).is_none() {
                    return Err(ServerError::not_found("Database does not exist."));
                }
                self.inner.registry.drop_db(name);
                info!(db = name, "database deleted");
                Ok(ok_json(200, json!({ "ok": true })))
            }
            Method::Post => {
                let doc: Document = parse_json(&request.body)?;
                self.put(name, doc, 201)
            }
        }
    }

    fn put(&self, db_name: &str, doc: Document, status: u16) -> ServerResult<Response> {
        let db = self.db(db_name)?;
        let (id, rev) = db.store.lock().write(doc, WriteMode::Checked)?;
        db.notify();
        Ok(ok_json(status, write_ok(&id, &rev)))
    }

    fn document(
        &self,
        method: Method,
        db_name: &str,
        id: &str,
        request: &Request,
    ) -> ServerResult<Response> {
        let params = &request.params;
        match method {
            Method::Get | Method::Head => {
                let rev = params.get("rev").map(Revision::parse).transpose()?;
                let conflicts = params.get("conflicts") == Some("true");
                let db = self.db(db_name)?;
                let doc = db.store.lock().get(id, rev.as_ref(), conflicts)?;
                encode(200, &doc)
            }
            Method::Put => {
                let mut doc: Document = parse_json(&request.body)?;
                doc.id = Some(id.to_string());
                if doc.rev.is_none() {
                    doc.rev = params.get("rev").map(Revision::parse).transpose()?;
                }
                self.put(db_name, doc, 201)
            }
            Method::Delete => {
                let db = self.db(db_name)?;
                let rev = params
                    .get("rev")
                    .map(Revision::parse)
                    .transpose()?
                    .ok_or_else(ServerError::conflict)?;
                {
                    let store = db.store.lock();
                    if !store.contains(id) {
                        return Err(ServerError::not_found("missing"));
                    }
                    if !store.is_live(id) {
                        return Err(ServerError::not_found("deleted"));
                    }
                }
                let mut tombstone = Document::with_id(id).revision(rev);
                tombstone.deleted = true;
                self.put(db_name, tombstone, 200)
            }
            Method::Post => Err(ServerError::method_not_allowed()),
        }
    }

    fn bulk_docs(&self, db_name: &str, request: &Request) -> ServerResult<Response> {
        if request.method != Method::Post {
            return Err(ServerError::method_not_allowed());
        }
        let body: serde_json::Value = parse_json(&request.body)?;
        let docs = body
            .get("docs")
            .cloned()
            .ok_or_else(|| ServerError::bad_request("POST body must include `docs` parameter."))?;
        let mut docs: Vec<Document> = serde_json::from_value(docs)
            .map_err(|e| ServerError::bad_request(format!("invalid docs: {}", e)))?;
        let all_or_nothing = body
            .get("all_or_nothing")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        for doc in &mut docs {
            doc.id.get_or_insert_with(new_id);
        }

        let db = self.db(db_name)?;
        let mut results = Vec::with_capacity(docs.len());
        {
            let mut store = db.store.lock();

            if all_or_nothing {
                let failures: Vec<serde_json::Value> = docs
                    .iter()
                    .filter_map(|doc| {
                        store.check(doc, WriteMode::Branch).err().map(|e| {
                            json!({ "id": doc.id, "error": e.error, "reason": e.reason })
                        })
                    })
                    .collect();
                if !failures.is_empty() {
                    return Ok(ok_json(
                        417,
                        json!({ "error": "expectation_failed", "reason": serde_json::Value::from(failures).to_string() }),
                    ));
                }
            }

            let mode = if all_or_nothing {
                WriteMode::Branch
            } else {
                WriteMode::Checked
            };
            for doc in docs {
                let id = doc.id.clone().unwrap_or_default();
                results.push(match store.write(doc, mode) {
                    Ok((id, rev)) => json!({ "ok": true, "id": id, "rev": rev.to_string() }),
                    Err(e) => json!({ "id": id, "error": e.error, "reason": e.reason }),
                });
            }
        }
        db.notify();
        debug!(db = db_name, count = results.len(), all_or_nothing, "bulk write");
        Ok(ok_json(201, serde_json::Value::Array(results)))
    }

    fn all_docs(&self, db_name: &str, params: &Params) -> ServerResult<Response> {
        let db = self.db(db_name)?;
        let query = RowQuery::from_params(params)?;
        let docs = db.store.lock().live_docs(query.conflicts);
        let total = docs.len() as u64;

        let rows: Vec<ViewRow> = docs
            .into_iter()
            .map(|doc| {
                let id = doc.id.clone().unwrap_or_default();
                let rev = doc.rev.as_ref().map(|r| r.to_string()).unwrap_or_default();
                let mut value = sofa_core::Fields::new();
                value.insert("rev".into(), Value::from(rev));
                ViewRow {
                    id: Some(id.clone()),
                    key: Value::from(id),
                    value: Value::Object(value),
                    doc: if query.include_docs { Some(doc) } else { None },
                    error: None,
                }
            })
            .collect();

        let (offset, rows) = query.select(rows);
        encode(
            200,
            &ViewRows {
                total_rows: Some(total),
                offset: Some(offset),
                rows,
            },
        )
    }

    fn query_view(
        &self,
        db_name: &str,
        design: &str,
        name: &str,
        params: &Params,
    ) -> ServerResult<ViewRows> {
        let db = self.db(db_name)?;
        let view = self.inner.registry.view(db_name, design, name)?;
        let store = db.store.lock();
        let docs = store.live_docs(false);
        design::query_view(&view, &docs, params, |id, conflicts| {
            store.winner(id, conflicts)
        })
    }

    fn update(
        &self,
        db_name: &str,
        design: &str,
        name: &str,
        id: Option<&str>,
        request: &Request,
    ) -> ServerResult<Response> {
        let expected = if id.is_some() { Method::Put } else { Method::Post };
        if request.method != expected && request.method != Method::Post {
            return Err(ServerError::method_not_allowed());
        }

        let mut form = match &request.body {
            Body::Form(bytes) => Params::parse(bytes),
            _ => Params::new(),
        };
        form.extend(request.params.iter());

        let db = self.db(db_name)?;
        let handler = self.inner.registry.update(db_name, design, name)?;

        let saved = {
            let mut store = db.store.lock();
            let existing = id.and_then(|id| store.winner(id, false));
            let mut doc = handler(existing, &form).map_err(ServerError::bad_request)?;

            let id = doc
                .id
                .clone()
                .or_else(|| id.map(str::to_string))
                .unwrap_or_else(new_id);
            doc.rev = store.winner(&id, false).and_then(|current| current.rev);
            doc.id = Some(id);
            doc.conflicts.clear();

            let (id, rev) = store.write(doc.clone(), WriteMode::Checked)?;
            doc.id = Some(id);
            doc.rev = Some(rev);
            doc
        };
        db.notify();
        encode(201, &saved)
    }

    async fn changes(&self, db_name: &str, params: &Params) -> ServerResult<Response> {
        let db = self.db(db_name)?;
        let query = ChangesQuery::parse(params, |design, name| {
            self.inner.registry.filter(db_name, design, name)
        })?;

        if query.mode == FeedMode::Continuous {
            let stream = self.continuous(db, query);
            let response = stream
                .collect()
                .await
                .map_err(|e| ServerError::new(500, "stream_failed", e.to_string()))?;
            return Ok(response);
        }

        let batch = changes::batch(&db.store, &db.notify, &query, self.seq_style()).await;
        encode(200, &batch)
    }

    fn continuous(&self, db: Arc<Db>, query: ChangesQuery) -> StreamingResponse {
        let (tx, rx) = mpsc::channel(16);
        let cancel = self.inner.streams.lock().child_token();
        let sink = LineSink::new(tx, *self.inner.chunk_size.lock(), cancel);
        let style = self.seq_style();

        self.inner.active_streams.fetch_add(1, Ordering::SeqCst);
        let guard = StreamGuard(self.inner.active_streams.clone());
        let store = db.store.clone();
        let notify = db.notify.clone();
        tokio::spawn(async move {
            let _guard = guard;
            changes::continuous(store, notify, query, style, sink).await;
        });

        let streamed = self.inner.lines_streamed.clone();
        let body = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })
        .inspect(move |item| {
            if let Ok(bytes) = item {
                let lines = bytes.iter().filter(|b| **b == b'\n').count();
                streamed.fetch_add(lines, Ordering::SeqCst);
            }
        })
        .boxed();

        StreamingResponse {
            status: 200,
            content_type: Some("application/json".into()),
            body,
        }
    }

    /// Open a request as a stream; continuous `_changes` streams for real
    async fn stream(&self, request: &Request) -> StreamingResponse {
        let segments = decode_segments(&request.path);
        let continuous = request.params.get("feed") == Some("continuous");

        if let [db_name, changes] = segments.as_slice() {
            if changes == "_changes" && continuous {
                let opened = self.db(db_name).and_then(|db| {
                    let query = ChangesQuery::parse(&request.params, |design, name| {
                        self.inner.registry.filter(db_name, design, name)
                    })?;
                    Ok((db, query))
                });
                match opened {
                    Ok((db, query)) => return self.continuous(db, query),
                    Err(e) => return buffered(e.to_response()),
                }
            }
        }

        buffered(self.handle(request).await)
    }
}

fn buffered(response: Response) -> StreamingResponse {
    let body = response.body;
    StreamingResponse {
        status: response.status,
        content_type: response.content_type,
        body: stream::once(async move { Ok::<_, TransportError>(body) }).boxed(),
    }
}

#[async_trait]
impl Transport for MemoryServer {
    async fn execute(&self, request: Request) -> TransportResult<Response> {
        if let Some(response) = self.admit(&request)? {
            return Ok(response);
        }
        Ok(self.handle(&request).await)
    }

    async fn open_stream(&self, request: Request) -> TransportResult<StreamingResponse> {
        if let Some(response) = self.admit(&request)? {
            return Ok(buffered(response));
        }
        Ok(self.stream(&request).await)
    }
}
