//! Document-level operations on one database

use crate::client::{decode, Client};
use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use sofa_core::{Document, Revision, ViewRows};
use sofa_protocol::request::db_path;
use sofa_protocol::{Body, DatabaseInfo, Method, Params, Request, WriteResult};
use tracing::debug;
use uuid::Uuid;

/// Options for fetching a single document
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetOptions {
    /// Fetch this revision instead of the winner
    pub rev: Option<Revision>,
    /// Ask for `_conflicts`
    pub conflicts: bool,
}

impl GetOptions {
    pub fn rev(mut self, rev: Revision) -> Self {
        self.rev = Some(rev);
        self
    }

    pub fn conflicts(mut self, conflicts: bool) -> Self {
        self.conflicts = conflicts;
        self
    }

    fn to_params(&self) -> Params {
        let mut params = Params::new();
        if let Some(rev) = &self.rev {
            params.push("rev", rev.to_string());
        }
        if self.conflicts {
            params.push("conflicts", "true");
        }
        params
    }
}

/// Handle to a database.
///
/// Creating a handle makes no request; the database may not exist.
#[derive(Debug, Clone)]
pub struct Database {
    client: Client,
    name: String,
}

/// Fresh document id: 32 lowercase hex characters from a random UUID
pub fn generate_id() -> String {
    Uuid::new_v4().simple().to_string()
}

impl Database {
    pub(crate) fn new(client: Client, name: &str) -> Self {
        Self {
            client,
            name: name.to_string(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub async fn info(&self) -> Result<DatabaseInfo> {
        self.client.execute_json(Request::db_info(&self.name)).await
    }

    pub async fn exists(&self) -> Result<bool> {
        match self
            .client
            .execute(Request::new(Method::Head, db_path(&self.name)))
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Fetch the winning revision of a document
    pub async fn get(&self, id: &str) -> Result<Document> {
        self.get_with(id, &GetOptions::default()).await
    }

    pub async fn get_with(&self, id: &str, options: &GetOptions) -> Result<Document> {
        self.client
            .execute_json(Request::get_doc(&self.name, id, options.to_params()))
            .await
    }

    /// Fetch a document and decode it into `T`
    pub async fn get_as<T: DeserializeOwned>(&self, id: &str) -> Result<T> {
        let doc = self.get(id).await?;
        Ok(doc.decode()?)
    }

    /// Create a document.
    ///
    /// A document without `_id` gets a generated one; the write is always a
    /// `PUT` to the final id, so a retried insert cannot create a duplicate.
    pub async fn insert(&self, mut doc: Document) -> Result<WriteResult> {
        let id = match doc.id.clone() {
            Some(id) => id,
            None => {
                let id = generate_id();
                doc.id = Some(id.clone());
                id
            }
        };
        self.put(&id, &doc).await
    }

    /// Create or update a document that carries its own `_id` (and `_rev`
    /// when updating)
    pub async fn save(&self, doc: &Document) -> Result<WriteResult> {
        let id = doc
            .id()
            .ok_or_else(|| sofa_core::Error::InvalidDocument("save requires _id".into()))?;
        self.put(id, doc).await
    }

    /// Write a tombstone for `rev`
    pub async fn delete(&self, id: &str, rev: &Revision) -> Result<WriteResult> {
        let result = self
            .client
            .execute_json(Request::delete_doc(&self.name, id, &rev.to_string()))
            .await?;
        debug!(db = %self.name, id, %rev, "document deleted");
        Ok(result)
    }

    /// `_all_docs`, with the same parameters a view takes
    pub async fn all_docs(&self, params: impl Into<Params>) -> Result<ViewRows> {
        let response = self
            .client
            .execute(Request::all_docs(&self.name, params.into()))
            .await?;
        decode(&response)
    }

    async fn put(&self, id: &str, doc: &Document) -> Result<WriteResult> {
        let body = Body::json(doc)?;
        let result: WriteResult = self
            .client
            .execute_json(Request::put_doc(&self.name, id, body))
            .await?;
        if result.id != id {
            return Err(Error::Decode(format!(
                "write of '{}' acknowledged as '{}'",
                id, result.id
            )));
        }
        debug!(db = %self.name, id, rev = %result.rev, "document written");
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids() {
        let a = generate_id();
        let b = generate_id();
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_ne!(a, b);
    }

    #[test]
    fn test_get_options_params() {
        let rev = Revision::parse("2-abc").unwrap();
        let params = GetOptions::default().rev(rev).conflicts(true).to_params();
        assert_eq!(params.to_query_string(), "rev=2-abc&conflicts=true");
        assert!(GetOptions::default().to_params().is_empty());
    }
}
