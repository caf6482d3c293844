//! JSON value types for schema-less document bodies

use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Insertion-ordered field map of a JSON object
pub type Fields = IndexMap<String, Value>;

/// A JSON value as stored in a document body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    Array(Vec<Value>),
    Object(Fields),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Number(Number::Integer(n)) => Some(*n),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(Number::Float(n)) => Some(*n),
            Value::Number(Number::Integer(n)) => Some(*n as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Vec<Value>> {
        match self {
            Value::Array(arr) => Some(arr),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Fields> {
        match self {
            Value::Object(obj) => Some(obj),
            _ => None,
        }
    }

    /// Member lookup on an object value
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_object()?.get(key)
    }

    /// Get a value at a path (e.g., "items[0].name")
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        if path.is_empty() {
            return Some(self);
        }

        let mut current = self;
        for segment in PathSegment::parse(path) {
            match segment {
                PathSegment::Key(key) => {
                    current = current.as_object()?.get(key)?;
                }
                PathSegment::Index(idx) => {
                    current = current.as_array()?.get(idx)?;
                }
            }
        }
        Some(current)
    }

    /// Set a value at a path, creating intermediate objects/arrays as needed
    pub fn set_path(&mut self, path: &str, value: Value) -> crate::Result<()> {
        if path.is_empty() {
            *self = value;
            return Ok(());
        }

        let segments: Vec<PathSegment> = PathSegment::parse(path).collect();
        if segments.is_empty() {
            return Err(crate::Error::InvalidPath(path.to_string()));
        }
        let mut current = self;

        for (i, segment) in segments.iter().enumerate() {
            let is_last = i == segments.len() - 1;

            match segment {
                PathSegment::Key(key) => {
                    if !matches!(current, Value::Object(_)) {
                        *current = Value::Object(Fields::new());
                    }

                    if let Value::Object(map) = current {
                        if is_last {
                            map.insert(key.to_string(), value);
                            return Ok(());
                        }
                        current = map.entry(key.to_string()).or_insert(Value::Null);
                    }
                }
                PathSegment::Index(idx) => {
                    if !matches!(current, Value::Array(_)) {
                        *current = Value::Array(Vec::new());
                    }

                    if let Value::Array(arr) = current {
                        while arr.len() <= *idx {
                            arr.push(Value::Null);
                        }
                        if is_last {
                            arr[*idx] = value;
                            return Ok(());
                        }
                        current = &mut arr[*idx];
                    }
                }
            }
        }

        Ok(())
    }

    /// Convert any serializable type into a value
    pub fn from_serialize<T: Serialize>(value: &T) -> crate::Result<Value> {
        let json = serde_json::to_value(value)?;
        Ok(json.into())
    }

    /// Decode this value into a typed projection
    pub fn deserialize_into<T: DeserializeOwned>(&self) -> crate::Result<T> {
        let json: serde_json::Value = self.clone().into();
        Ok(serde_json::from_value(json)?)
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Null
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let json = serde_json::to_string(self).map_err(|_| std::fmt::Error)?;
        f.write_str(&json)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Number(Number::Integer(v))
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Number(Number::Integer(v as i64))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Number(Number::Float(v))
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::Array(v.into_iter().map(Into::into).collect())
    }
}

impl From<Fields> for Value {
    fn from(v: Fields) -> Self {
        Value::Object(v)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Number(Number::Integer(i)),
                None => Value::Number(Number::Float(n.as_f64().unwrap_or(f64::NAN))),
            },
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(arr) => {
                Value::Array(arr.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(obj) => {
                Value::Object(obj.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<Value> for serde_json::Value {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(b),
            Value::Number(Number::Integer(i)) => serde_json::Value::from(i),
            Value::Number(Number::Float(f)) => serde_json::Number::from_f64(f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s),
            Value::Array(arr) => {
                serde_json::Value::Array(arr.into_iter().map(Into::into).collect())
            }
            Value::Object(obj) => serde_json::Value::Object(
                obj.into_iter().map(|(k, v)| (k, v.into())).collect(),
            ),
        }
    }
}

/// Number type supporting both integers and floats
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Number {
    Integer(i64),
    Float(f64),
}

/// Path segment for navigating document structure
#[derive(Debug, Clone)]
pub enum PathSegment<'a> {
    Key(&'a str),
    Index(usize),
}

impl<'a> PathSegment<'a> {
    /// Parse a path string into segments
    /// Examples: "foo.bar", "items[0]", "users[0].name"
    pub fn parse(path: &'a str) -> impl Iterator<Item = PathSegment<'a>> {
        PathParser { path, pos: 0 }
    }
}

struct PathParser<'a> {
    path: &'a str,
    pos: usize,
}

impl<'a> Iterator for PathParser<'a> {
    type Item = PathSegment<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.path.len() {
            return None;
        }

        let remaining = &self.path[self.pos..];
        let remaining = remaining.strip_prefix('.').unwrap_or(remaining);
        if remaining.is_empty() {
            return None;
        }
        self.pos = self.path.len() - remaining.len();

        if remaining.starts_with('[') {
            if let Some(end) = remaining.find(']') {
                let idx_str = &remaining[1..end];
                self.pos += end + 1;
                if let Ok(idx) = idx_str.parse::<usize>() {
                    return Some(PathSegment::Index(idx));
                }
            }
        }

        let end = remaining
            .find(|c| c == '.' || c == '[')
            .unwrap_or(remaining.len());

        let key = &remaining[..end];
        self.pos += end;

        if key.is_empty() {
            self.next()
        } else {
            Some(PathSegment::Key(key))
        }
    }
}
