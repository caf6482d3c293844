//! Document types

use crate::error::{Error, Result};
use crate::revision::Revision;
use crate::value::{Fields, Value};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Id prefix of design documents
pub const DESIGN_PREFIX: &str = "_design/";

/// Id prefix of local (non-replicated) documents
pub const LOCAL_PREFIX: &str = "_local/";

/// A database document.
///
/// The protocol-reserved members are typed fields; every other member of the
/// JSON object lives in `fields`, in the order the server sent it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(rename = "_rev", default, skip_serializing_if = "Option::is_none")]
    pub rev: Option<Revision>,

    #[serde(rename = "_deleted", default, skip_serializing_if = "is_false")]
    pub deleted: bool,

    /// Conflicting leaf revisions, only present when explicitly requested
    #[serde(rename = "_conflicts", default, skip_serializing_if = "Vec::is_empty")]
    pub conflicts: Vec<Revision>,

    #[serde(flatten)]
    pub fields: Fields,
}

fn is_false(b: &bool) -> bool {
    !*b
}

impl Document {
    /// Create an empty document without id or revision
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty document with the given id
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Self::default()
        }
    }

    /// Builder-style field setter
    pub fn field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Builder-style revision setter
    pub fn revision(mut self, rev: Revision) -> Self {
        self.rev = Some(rev);
        self
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn rev(&self) -> Option<&Revision> {
        self.rev.as_ref()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.fields.insert(key.into(), value.into())
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.fields.shift_remove(key)
    }

    /// Get a value at a dotted path inside the body
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let (head, rest) = match path.find(|c| c == '.' || c == '[') {
            Some(pos) => (&path[..pos], &path[pos..]),
            None => (path, ""),
        };
        self.fields.get(head)?.get_path(rest)
    }

    /// Whether this is a design document
    pub fn is_design(&self) -> bool {
        self.id.as_deref().is_some_and(|id| id.starts_with(DESIGN_PREFIX))
    }

    /// Whether the document has unresolved conflicting revisions
    pub fn has_conflicts(&self) -> bool {
        !self.conflicts.is_empty()
    }

    /// Build a document from any serializable type.
    ///
    /// The type must serialize to a JSON object; `_id` and `_rev` members are
    /// picked up as the reserved fields.
    pub fn from_serialize<T: Serialize>(value: &T) -> Result<Self> {
        let json = serde_json::to_value(value)?;
        if !json.is_object() {
            return Err(Error::InvalidDocument("document body must be a JSON object".into()));
        }
        Ok(serde_json::from_value(json)?)
    }

    /// Decode the whole document (reserved members included) into a typed value
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        let json = serde_json::to_value(self)?;
        Ok(serde_json::from_value(json)?)
    }

    /// Body fields only, as an object value
    pub fn body(&self) -> Value {
        Value::Object(self.fields.clone())
    }

    /// Encode to JSON bytes
    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode from JSON bytes
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Whether an id falls in the server-reserved namespace.
///
/// Ids starting with `_` are rejected by the server unless they are design
/// or local document ids.
pub fn is_reserved_id(id: &str) -> bool {
    id.starts_with('_') && !id.starts_with(DESIGN_PREFIX) && !id.starts_with(LOCAL_PREFIX)
}
