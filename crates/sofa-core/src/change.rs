//! Change events and sequence markers

use crate::document::Document;
use crate::revision::Revision;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// A changes-feed checkpoint.
///
/// Older servers use plain integers; clustered servers use opaque strings
/// whose numeric prefix (`"<n>-<opaque>"`) is the position. The marker is
/// sent back to the server exactly as it was received.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Seq {
    Number(u64),
    Opaque(String),
}

impl Seq {
    /// Start of the database history
    pub fn zero() -> Self {
        Seq::Number(0)
    }

    /// The special checkpoint meaning "only changes from now on"
    pub fn now() -> Self {
        Seq::Opaque("now".to_string())
    }

    /// Numeric position of the marker, if it has one
    pub fn position(&self) -> Option<u64> {
        match self {
            Seq::Number(n) => Some(*n),
            Seq::Opaque(s) => {
                let prefix = s.split_once('-').map(|(p, _)| p).unwrap_or(s);
                prefix.parse().ok()
            }
        }
    }

    /// Compare two markers by position
    pub fn cmp_position(&self, other: &Seq) -> Option<Ordering> {
        Some(self.position()?.cmp(&other.position()?))
    }

    /// Query parameter form of the marker
    pub fn to_param(&self) -> String {
        self.to_string()
    }
}

impl std::fmt::Display for Seq {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Seq::Number(n) => write!(f, "{}", n),
            Seq::Opaque(s) => f.write_str(s),
        }
    }
}

impl From<u64> for Seq {
    fn from(n: u64) -> Self {
        Seq::Number(n)
    }
}

impl From<&str> for Seq {
    fn from(s: &str) -> Self {
        match s.parse::<u64>() {
            Ok(n) => Seq::Number(n),
            Err(_) => Seq::Opaque(s.to_string()),
        }
    }
}

/// One entry of a change's `changes` list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionRef {
    pub rev: Revision,
}

/// A single change reported by the changes feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub seq: Seq,
    pub id: String,
    pub changes: Vec<RevisionRef>,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub deleted: bool,

    /// Embedded document body, only with `include_docs=true`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc: Option<Document>,
}

impl ChangeEvent {
    /// Revisions listed for this change
    pub fn revisions(&self) -> impl Iterator<Item = &Revision> {
        self.changes.iter().map(|c| &c.rev)
    }

    /// Highest listed revision
    pub fn latest_rev(&self) -> Option<&Revision> {
        self.revisions().max()
    }
}
