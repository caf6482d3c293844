//! View queries, list functions and update handlers

use crate::client::decode;
use crate::database::Database;
use crate::error::Result;
use bytes::Bytes;
use sofa_core::{Document, Value, ViewRows};
use sofa_protocol::{Params, Request};
use tracing::debug;

/// Ordered view query parameters.
///
/// JSON-valued parameters (`key`, `startkey`, `endkey`) are encoded here;
/// anything else can be passed through with [`param`](Self::param).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewParams(Params);

impl ViewParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key(self, key: impl Into<Value>) -> Self {
        self.json("key", key.into())
    }

    pub fn start_key(self, key: impl Into<Value>) -> Self {
        self.json("startkey", key.into())
    }

    pub fn end_key(self, key: impl Into<Value>) -> Self {
        self.json("endkey", key.into())
    }

    pub fn inclusive_end(self, inclusive: bool) -> Self {
        self.param("inclusive_end", inclusive.to_string())
    }

    pub fn reduce(self, reduce: bool) -> Self {
        self.set("reduce", reduce.to_string())
    }

    pub fn group(self, group: bool) -> Self {
        self.param("group", group.to_string())
    }

    pub fn group_level(self, level: u32) -> Self {
        self.param("group_level", level.to_string())
    }

    pub fn include_docs(self, include: bool) -> Self {
        self.param("include_docs", include.to_string())
    }

    pub fn conflicts(self, conflicts: bool) -> Self {
        self.param("conflicts", conflicts.to_string())
    }

    pub fn limit(self, limit: u64) -> Self {
        self.param("limit", limit.to_string())
    }

    pub fn skip(self, skip: u64) -> Self {
        self.param("skip", skip.to_string())
    }

    pub fn descending(self, descending: bool) -> Self {
        self.param("descending", descending.to_string())
    }

    /// Append an arbitrary parameter, verbatim
    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.push(key, value);
        self
    }

    fn set(mut self, key: &str, value: String) -> Self {
        self.0.set(key, value);
        self
    }

    fn json(self, key: &str, value: Value) -> Self {
        let encoded = value.to_string();
        self.param(key, encoded)
    }

    pub fn as_params(&self) -> &Params {
        &self.0
    }
}

impl From<ViewParams> for Params {
    fn from(params: ViewParams) -> Self {
        params.0
    }
}

impl From<Params> for ViewParams {
    fn from(params: Params) -> Self {
        Self(params)
    }
}

/// Raw output of a list function
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListOutput {
    pub content_type: Option<String>,
    pub body: Bytes,
}

impl ListOutput {
    /// Body as text, replacing invalid UTF-8
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

impl Database {
    /// Query a view. A reducing view returns reduced rows unless `reduce=false`.
    pub async fn view(
        &self,
        design: &str,
        name: &str,
        params: impl Into<Params>,
    ) -> Result<ViewRows> {
        let request = Request::view(self.name(), design, name, params.into());
        let response = self.client().execute(request).await?;
        let rows: ViewRows = decode(&response)?;
        debug!(db = %self.name(), design, view = name, rows = rows.len(), "view query");
        Ok(rows)
    }

    /// Query a view's map rows, skipping any reduce function
    pub async fn map_only(
        &self,
        design: &str,
        name: &str,
        params: impl Into<Params>,
    ) -> Result<ViewRows> {
        let params = ViewParams::from(params.into()).reduce(false);
        self.view(design, name, params).await
    }

    /// Render a view through a list function; the body is returned as-is
    pub async fn list(
        &self,
        design: &str,
        list: &str,
        view: &str,
        params: impl Into<Params>,
    ) -> Result<ListOutput> {
        let request = Request::list(self.name(), design, list, view, params.into());
        let response = self.client().execute(request).await?;
        Ok(ListOutput {
            content_type: response.content_type,
            body: response.body,
        })
    }

    /// Invoke an update handler with a form body.
    ///
    /// Without `id` the handler is called with no document (`POST`); with
    /// one it receives the current document (`PUT`). The returned document
    /// may lack `_rev` when the handler did not save.
    pub async fn update(
        &self,
        design: &str,
        handler: &str,
        id: Option<&str>,
        form: &Params,
    ) -> Result<Document> {
        let request = Request::update(self.name(), design, handler, id, form);
        let doc: Document = self.client().execute_json(request).await?;
        debug!(db = %self.name(), design, handler, id = ?doc.id(), "update handler");
        Ok(doc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_view_params_encoding() {
        let params: Params = ViewParams::new()
            .start_key(vec!["a", "b"])
            .end_key("z")
            .group_level(1)
            .param("stale", "ok")
            .into();

        assert_eq!(params.get("startkey"), Some(r#"["a","b"]"#));
        assert_eq!(params.get("endkey"), Some(r#""z""#));
        assert_eq!(
            params.iter().map(|(k, _)| k).collect::<Vec<_>>(),
            vec!["startkey", "endkey", "group_level", "stale"]
        );
    }

    #[test]
    fn test_reduce_is_replaced() {
        let params: Params = ViewParams::new().reduce(true).limit(5).reduce(false).into();
        assert_eq!(params.to_query_string(), "reduce=false&limit=5");
    }

    #[test]
    fn test_list_output_text() {
        let output = ListOutput {
            content_type: Some("text/csv".into()),
            body: Bytes::from_static(b"id,name\n1,a\n"),
        };
        assert_eq!(output.text(), "id,name\n1,a\n");
    }
}
