//! Sofa - async client for CouchDB-style document databases
//!
//! ```ignore
//! use sofa::{Client, ChangesSubscription, Document};
//!
//! let client = Client::connect("http://localhost:5984")?;
//! let db = client.create_database("orders").await?;
//!
//! let written = db.insert(Document::new().field("total", 42)).await?;
//! let doc = db.get(&written.id).await?;
//!
//! let mut feed = db.changes_feed(ChangesSubscription::continuous());
//! while let Some(event) = feed.next().await {
//!     let event = event?;
//!     println!("{} {}", event.seq, event.id);
//! }
//! ```
//!
//! ## Modules
//! - [`client`] / [`database`]: request execution and document operations
//! - [`bulk`]: `_bulk_docs` with ordered per-document outcomes
//! - [`changes`]: normal, long-poll and continuous changes feeds
//! - [`view`]: views, list functions and update handlers

pub mod bulk;
pub mod changes;
pub mod client;
pub mod config;
pub mod database;
pub mod error;
pub mod view;

pub use bulk::BulkSummary;
pub use changes::{ChangesFeed, ChangesSubscription, FeedState, FilterRef};
pub use client::Client;
pub use config::{ClientConfig, FeedConfig, ReconnectPolicy};
pub use database::{generate_id, Database, GetOptions};
pub use error::{Error, Result, StatusError, StatusKind};
pub use view::{ListOutput, ViewParams};

pub use sofa_core::{
    BulkWriteOutcome, ChangeEvent, Document, Fields, Revision, Seq, Value, ViewRow, ViewRows,
};
pub use sofa_protocol::{ChangesBatch, DatabaseInfo, FeedMode, Params, ServerInfo, WriteResult};
pub use sofa_transport::{HttpTransport, Transport, TransportError};
pub use tokio_util::sync::CancellationToken;
