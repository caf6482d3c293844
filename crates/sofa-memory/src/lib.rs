//! Sofa Memory - In-Process Server Fake
//!
//! A [`MemoryServer`] answers protocol requests from memory and implements
//! the client's `Transport` trait, so tests and demos run without a real
//! database:
//! - Revision trees with conflict branches and tombstones
//! - `_bulk_docs` in normal and all-or-nothing mode
//! - `_changes` as normal, long-poll and continuous feeds
//! - Filters, views, list and update functions as Rust closures
//! - Fault injection and stream severing for resilience tests

pub mod changes;
pub mod design;
pub mod error;
pub mod server;
pub mod store;

pub use design::{ListReply, Reduce};
pub use error::{ServerError, ServerResult};
pub use server::{Fault, MemoryServer};
