//! View result rows and their projections

use crate::document::Document;
use crate::error::Result;
use crate::value::Value;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// One row of a view, `_all_docs` or list source
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ViewRow {
    /// Source document id; absent on reduced rows
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default)]
    pub key: Value,

    #[serde(default)]
    pub value: Value,

    /// Embedded document, only with `include_docs=true`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc: Option<Document>,

    /// Per-row error, e.g. `not_found` for a missing key in a keyed query
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Decoded result of a view query.
///
/// This is the single canonical row type; the projection methods below
/// replace per-shape accessor variants.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ViewRows {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_rows: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,

    pub rows: Vec<ViewRow>,
}

impl ViewRows {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &Value> {
        self.rows.iter().map(|r| &r.key)
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.rows.iter().map(|r| &r.value)
    }

    /// Key/value pairs in row order
    pub fn items(&self) -> impl Iterator<Item = (&Value, &Value)> {
        self.rows.iter().map(|r| (&r.key, &r.value))
    }

    /// Source document ids of rows that have one
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.rows.iter().filter_map(|r| r.id.as_deref())
    }

    /// Embedded documents of rows that have one
    pub fn docs(&self) -> impl Iterator<Item = &Document> {
        self.rows.iter().filter_map(|r| r.doc.as_ref())
    }

    pub fn decode_keys<T: DeserializeOwned>(&self) -> Result<Vec<T>> {
        self.keys().map(Value::deserialize_into).collect()
    }

    pub fn decode_values<T: DeserializeOwned>(&self) -> Result<Vec<T>> {
        self.values().map(Value::deserialize_into).collect()
    }

    pub fn decode_docs<T: DeserializeOwned>(&self) -> Result<Vec<T>> {
        self.docs().map(Document::decode).collect()
    }
}

impl IntoIterator for ViewRows {
    type Item = ViewRow;
    type IntoIter = std::vec::IntoIter<ViewRow>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.into_iter()
    }
}
