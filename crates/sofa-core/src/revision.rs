//! Revision identifiers

use crate::error::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;

/// A revision id of the form `<generation>-<hash>`.
///
/// The generation counts edits along one branch of a document's history; the
/// hash is an opaque content fingerprint assigned by the server. Revisions are
/// ordered by generation, then by hash, which is the order the server uses to
/// pick a deterministic winner among conflicting leaves.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Revision {
    generation: u64,
    hash: String,
}

impl Revision {
    /// Create a revision, validating both parts
    pub fn new(generation: u64, hash: impl Into<String>) -> Result<Self> {
        let hash = hash.into();

        if generation == 0 {
            return Err(Error::InvalidRevision("generation must be positive".into()));
        }

        if hash.is_empty() || hash.chars().any(|c| c.is_whitespace()) {
            return Err(Error::InvalidRevision(format!("invalid hash: {:?}", hash)));
        }

        Ok(Self { generation, hash })
    }

    /// Parse the `<generation>-<hash>` wire form
    pub fn parse(s: &str) -> Result<Self> {
        let (generation, hash) = s
            .split_once('-')
            .ok_or_else(|| Error::InvalidRevision(s.to_string()))?;

        let generation: u64 = generation
            .parse()
            .map_err(|_| Error::InvalidRevision(s.to_string()))?;

        Self::new(generation, hash).map_err(|_| Error::InvalidRevision(s.to_string()))
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// The revision a successful edit on top of this one would carry
    pub fn successor(&self, hash: impl Into<String>) -> Result<Self> {
        let generation = self.generation.checked_add(1).ok_or_else(|| {
            Error::InvalidRevision(format!("generation overflow after {}", self))
        })?;
        Self::new(generation, hash)
    }
}

impl Ord for Revision {
    fn cmp(&self, other: &Self) -> Ordering {
        self.generation
            .cmp(&other.generation)
            .then_with(|| self.hash.cmp(&other.hash))
    }
}

impl PartialOrd for Revision {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl std::fmt::Display for Revision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.generation, self.hash)
    }
}

impl std::str::FromStr for Revision {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for Revision {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Revision {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Revision::parse(&s).map_err(serde::de::Error::custom)
    }
}
