//! Request descriptors

use crate::error::ProtocolResult;
use bytes::Bytes;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::Serialize;
use sofa_core::{DESIGN_PREFIX, LOCAL_PREFIX};

/// Characters left untouched inside a single path segment
const SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// HTTP method of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Changes feed delivery mode (`feed=` parameter)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FeedMode {
    /// Point-in-time list of changes
    #[default]
    Normal,
    /// Held open until at least one change exists or the timeout elapses
    LongPoll,
    /// Indefinite newline-delimited stream
    Continuous,
}

impl FeedMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedMode::Normal => "normal",
            FeedMode::LongPoll => "longpoll",
            FeedMode::Continuous => "continuous",
        }
    }
}

impl std::fmt::Display for FeedMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for FeedMode {
    type Err = crate::ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "normal" => Ok(FeedMode::Normal),
            "longpoll" | "long-poll" => Ok(FeedMode::LongPoll),
            "continuous" => Ok(FeedMode::Continuous),
            _ => Err(crate::ProtocolError::InvalidArgument(format!("Unknown feed mode: {}", s))),
        }
    }
}

/// Ordered query parameters.
///
/// Kept as a list of pairs rather than a map: the protocol allows repeated
/// keys and some endpoints are sensitive to parameter order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params(Vec<(String, String)>);

impl Params {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Append a pair, keeping any existing pairs with the same key
    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.0.push((key.into(), value.into()));
        self
    }

    /// Builder-style `push`
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.push(key, value);
        self
    }

    /// Append a JSON-encoded value (for `key`, `startkey`, `endkey`, ...)
    pub fn push_json<T: Serialize + ?Sized>(
        &mut self,
        key: impl Into<String>,
        value: &T,
    ) -> ProtocolResult<&mut Self> {
        let encoded = serde_json::to_string(value)?;
        Ok(self.push(key, encoded))
    }

    /// Replace every pair with this key by a single pair at the first
    /// occurrence's position (or at the end if absent)
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        let key = key.into();
        let value = value.into();
        match self.0.iter().position(|(k, _)| *k == key) {
            Some(pos) => {
                self.0[pos].1 = value;
                let mut i = pos + 1;
                while i < self.0.len() {
                    if self.0[i].0 == key {
                        self.0.remove(i);
                    } else {
                        i += 1;
                    }
                }
            }
            None => self.0.push((key, value)),
        }
        self
    }

    /// First value for a key
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    pub fn get_all<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.0.iter().filter(move |(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.iter().any(|(k, _)| k == key)
    }

    pub fn remove(&mut self, key: &str) {
        self.0.retain(|(k, _)| k != key);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// `application/x-www-form-urlencoded` encoding, order preserved
    pub fn to_query_string(&self) -> String {
        let mut serializer = form_urlencoded::Serializer::new(String::new());
        for (k, v) in &self.0 {
            serializer.append_pair(k, v);
        }
        serializer.finish()
    }

    /// Decode a query string or form body
    pub fn parse(input: &[u8]) -> Self {
        form_urlencoded::parse(input)
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Params {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

impl<K: Into<String>, V: Into<String>> Extend<(K, V)> for Params {
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        self.0.extend(iter.into_iter().map(|(k, v)| (k.into(), v.into())));
    }
}

impl IntoIterator for Params {
    type Item = (String, String);
    type IntoIter = std::vec::IntoIter<(String, String)>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Request body
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Body {
    #[default]
    Empty,
    Json(Bytes),
    Form(Bytes),
}

impl Body {
    pub fn json<T: Serialize + ?Sized>(value: &T) -> ProtocolResult<Self> {
        Ok(Body::Json(Bytes::from(serde_json::to_vec(value)?)))
    }

    pub fn form(params: &Params) -> Self {
        Body::Form(Bytes::from(params.to_query_string()))
    }

    pub fn content_type(&self) -> Option<&'static str> {
        match self {
            Body::Empty => None,
            Body::Json(_) => Some("application/json"),
            Body::Form(_) => Some("application/x-www-form-urlencoded"),
        }
    }

    pub fn bytes(&self) -> Bytes {
        match self {
            Body::Empty => Bytes::new(),
            Body::Json(b) | Body::Form(b) => b.clone(),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Body::Empty)
    }
}

/// A fully described request, independent of any HTTP library
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: Method,
    /// Percent-encoded absolute path, e.g. `/db/_design/app/_view/by_name`
    pub path: String,
    pub params: Params,
    pub body: Body,
}

impl Request {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            params: Params::new(),
            body: Body::Empty,
        }
    }

    pub fn with_params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push(key, value);
        self
    }

    pub fn with_body(mut self, body: Body) -> Self {
        self.body = body;
        self
    }

    /// Path plus encoded query string
    pub fn path_and_query(&self) -> String {
        if self.params.is_empty() {
            self.path.clone()
        } else {
            format!("{}?{}", self.path, self.params.to_query_string())
        }
    }

    /// `GET /`
    pub fn server_info() -> Self {
        Request::new(Method::Get, "/")
    }

    /// `GET /_all_dbs`
    pub fn all_dbs() -> Self {
        Request::new(Method::Get, "/_all_dbs")
    }

    /// `GET /_uuids?count=n`
    pub fn uuids(count: usize) -> Self {
        Request::new(Method::Get, "/_uuids").with_param("count", count.to_string())
    }

    /// `PUT /db`
    pub fn create_db(db: &str) -> Self {
        Request::new(Method::Put, db_path(db))
    }

    /// `DELETE /db`
    pub fn delete_db(db: &str) -> Self {
        Request::new(Method::Delete, db_path(db))
    }

    /// `GET /db`
    pub fn db_info(db: &str) -> Self {
        Request::new(Method::Get, db_path(db))
    }

    /// `GET /db/id`
    pub fn get_doc(db: &str, id: &str, params: Params) -> Self {
        Request::new(Method::Get, doc_path(db, id)).with_params(params)
    }

    /// `PUT /db/id` with a JSON document body
    pub fn put_doc(db: &str, id: &str, body: Body) -> Self {
        Request::new(Method::Put, doc_path(db, id)).with_body(body)
    }

    /// `DELETE /db/id?rev=...`
    pub fn delete_doc(db: &str, id: &str, rev: &str) -> Self {
        Request::new(Method::Delete, doc_path(db, id)).with_param("rev", rev)
    }

    /// `POST /db/_bulk_docs`
    pub fn bulk_docs(db: &str, body: Body) -> Self {
        Request::new(Method::Post, format!("{}/_bulk_docs", db_path(db))).with_body(body)
    }

    /// `GET /db/_all_docs`
    pub fn all_docs(db: &str, params: Params) -> Self {
        Request::new(Method::Get, format!("{}/_all_docs", db_path(db))).with_params(params)
    }

    /// `GET /db/_changes`
    pub fn changes(db: &str, params: Params) -> Self {
        Request::new(Method::Get, format!("{}/_changes", db_path(db))).with_params(params)
    }

    /// `GET /db/_design/d/_view/v`
    pub fn view(db: &str, design: &str, view: &str, params: Params) -> Self {
        let path = format!(
            "{}/_view/{}",
            design_path(db, design),
            encode_segment(view)
        );
        Request::new(Method::Get, path).with_params(params)
    }

    /// `GET /db/_design/d/_list/l/v`
    pub fn list(db: &str, design: &str, list: &str, view: &str, params: Params) -> Self {
        let path = format!(
            "{}/_list/{}/{}",
            design_path(db, design),
            encode_segment(list),
            encode_segment(view)
        );
        Request::new(Method::Get, path).with_params(params)
    }

    /// `POST /db/_design/d/_update/f` or `PUT /db/_design/d/_update/f/id`
    pub fn update(db: &str, design: &str, handler: &str, id: Option<&str>, form: &Params) -> Self {
        let base = format!("{}/_update/{}", design_path(db, design), encode_segment(handler));
        let (method, path) = match id {
            Some(id) => (Method::Put, format!("{}/{}", base, encode_segment(id))),
            None => (Method::Post, base),
        };
        Request::new(method, path).with_body(Body::form(form))
    }
}

/// Percent-encode one path segment
pub fn encode_segment(segment: &str) -> String {
    utf8_percent_encode(segment, SEGMENT).to_string()
}

/// `/db`
pub fn db_path(db: &str) -> String {
    format!("/{}", encode_segment(db))
}

/// `/db/id`, keeping the literal slash of design and local document ids
pub fn doc_path(db: &str, id: &str) -> String {
    for prefix in [DESIGN_PREFIX, LOCAL_PREFIX] {
        if let Some(rest) = id.strip_prefix(prefix) {
            return format!("{}/{}{}", db_path(db), prefix, encode_segment(rest));
        }
    }
    format!("{}/{}", db_path(db), encode_segment(id))
}

/// `/db/_design/name`; accepts the name with or without its prefix
pub fn design_path(db: &str, design: &str) -> String {
    let name = design.strip_prefix(DESIGN_PREFIX).unwrap_or(design);
    format!("{}/{}{}", db_path(db), DESIGN_PREFIX, encode_segment(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_keep_order_and_duplicates() {
        let mut params = Params::new();
        params.push("b", "2").push("a", "1").push("b", "3");

        assert_eq!(params.to_query_string(), "b=2&a=1&b=3");
        assert_eq!(params.get("b"), Some("2"));
        assert_eq!(params.get_all("b").collect::<Vec<_>>(), vec!["2", "3"]);
    }

    #[test]
    fn test_params_set_replaces_in_place() {
        let mut params: Params = vec![("reduce", "true"), ("limit", "5"), ("reduce", "x")]
            .into_iter()
            .collect();
        params.set("reduce", "false");
        assert_eq!(params.to_query_string(), "reduce=false&limit=5");

        params.set("skip", "2");
        assert_eq!(params.to_query_string(), "reduce=false&limit=5&skip=2");
    }

    #[test]
    fn test_params_json_values() {
        let mut params = Params::new();
        params.push_json("key", &vec!["a", "b"]).unwrap();
        params.push_json("startkey", "x y").unwrap();
        assert_eq!(params.get("key"), Some(r#"["a","b"]"#));
        assert_eq!(
            params.to_query_string(),
            "key=%5B%22a%22%2C%22b%22%5D&startkey=%22x+y%22"
        );
    }

    #[test]
    fn test_params_parse_round_trip() {
        let params = Params::parse(b"name=foo+bar&n=1&n=2");
        assert_eq!(params.get("name"), Some("foo bar"));
        assert_eq!(params.get_all("n").count(), 2);
    }

    #[test]
    fn test_doc_paths() {
        assert_eq!(doc_path("db", "plain"), "/db/plain");
        assert_eq!(doc_path("db", "a/b c"), "/db/a%2Fb%20c");
        assert_eq!(doc_path("db", "_design/app"), "/db/_design/app");
        assert_eq!(doc_path("db", "_local/x/y"), "/db/_local/x%2Fy");
        assert_eq!(db_path("my/db"), "/my%2Fdb");
    }

    #[test]
    fn test_design_endpoints() {
        let req = Request::view("db", "app", "by_name", Params::new().with("reduce", "false"));
        assert_eq!(req.method, Method::Get);
        assert_eq!(req.path_and_query(), "/db/_design/app/_view/by_name?reduce=false");

        let req = Request::list("db", "_design/app", "html", "by_name", Params::new());
        assert_eq!(req.path, "/db/_design/app/_list/html/by_name");

        let form = Params::new().with("field", "title").with("value", "hi there");
        let req = Request::update("db", "app", "set", Some("doc 1"), &form);
        assert_eq!(req.method, Method::Put);
        assert_eq!(req.path, "/db/_design/app/_update/set/doc%201");
        assert_eq!(req.body.content_type(), Some("application/x-www-form-urlencoded"));
        assert_eq!(req.body.bytes().as_ref(), b"field=title&value=hi+there");

        let req = Request::update("db", "app", "create", None, &form);
        assert_eq!(req.method, Method::Post);
        assert_eq!(req.path, "/db/_design/app/_update/create");
    }

    #[test]
    fn test_feed_mode_parse() {
        assert_eq!("continuous".parse::<FeedMode>().unwrap(), FeedMode::Continuous);
        assert_eq!("LONGPOLL".parse::<FeedMode>().unwrap(), FeedMode::LongPoll);
        assert!("sometimes".parse::<FeedMode>().is_err());
        assert_eq!(FeedMode::default().as_str(), "normal");
    }
}
