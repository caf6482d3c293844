//! Sofa wire protocol
//!
//! Request descriptors and response bodies for a CouchDB-style HTTP/JSON API.
//!
//! ## Request Shape
//! ```text
//! <METHOD> /<db>/<doc or endpoint>?<ordered params>
//! Content-Type: application/json | application/x-www-form-urlencoded
//! ```
//!
//! ## Continuous Changes Framing
//! ```text
//! {"seq":1,"id":"a","changes":[{"rev":"1-x"}]}\n   # one change per line
//! \n                                               # heartbeat
//! {"last_seq":1}\n                                 # server timeout, stream ends
//! ```

pub mod body;
pub mod error;
pub mod parser;
pub mod request;
pub mod response;

pub use body::{
    decode_bulk_results, BulkDocsBody, BulkResultEntry, ChangesBatch, DatabaseInfo, FeedLine,
    ServerInfo, UuidList, WriteResult,
};
pub use error::{ProtocolError, ProtocolResult};
pub use parser::{ChangesParser, LineParser, MAX_LINE_SIZE};
pub use request::{Body, FeedMode, Method, Params, Request};
pub use response::{ErrorBody, Response};
