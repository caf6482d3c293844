//! Sofa Core - Document and Revision Model
//!
//! This crate provides the shared data types for the sofa client:
//! - Schema-less JSON values with insertion-ordered objects
//! - Documents with typed reserved members (`_id`, `_rev`, `_deleted`, `_conflicts`)
//! - Revision ids and their winner ordering
//! - Change events and sequence markers for the changes feed
//! - View rows and bulk write outcomes

pub mod bulk;
pub mod change;
pub mod document;
pub mod error;
pub mod revision;
pub mod value;
pub mod view;

pub use bulk::BulkWriteOutcome;
pub use change::{ChangeEvent, RevisionRef, Seq};
pub use document::{Document, DESIGN_PREFIX, LOCAL_PREFIX};
pub use error::{Error, Result};
pub use revision::Revision;
pub use value::{Fields, Number, Value};
pub use view::{ViewRow, ViewRows};
