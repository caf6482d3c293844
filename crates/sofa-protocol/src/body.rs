//! Request and response bodies

use crate::error::{ProtocolError, ProtocolResult};
use serde::{Deserialize, Serialize};
use sofa_core::{BulkWriteOutcome, ChangeEvent, Document, Fields, Revision, Seq};

/// `POST /db/_bulk_docs` body
#[derive(Debug, Clone, Serialize)]
pub struct BulkDocsBody<'a> {
    pub docs: &'a [Document],

    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub all_or_nothing: bool,
}

/// One element of the `_bulk_docs` response array
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkResultEntry {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub rev: Option<Revision>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Match response entries to the submitted batch.
///
/// `submitted` holds the id of each submitted document, `None` for documents
/// the server names itself. Entries are matched by position; a length or id
/// mismatch means the response cannot be trusted and is rejected whole.
pub fn decode_bulk_results(
    submitted: &[Option<&str>],
    entries: Vec<BulkResultEntry>,
) -> ProtocolResult<Vec<BulkWriteOutcome>> {
    if entries.len() != submitted.len() {
        return Err(ProtocolError::UnexpectedShape(format!(
            "bulk response has {} entries for {} documents",
            entries.len(),
            submitted.len()
        )));
    }

    submitted
        .iter()
        .zip(entries)
        .enumerate()
        .map(|(index, (expected, entry))| {
            let id = match (entry.id, expected) {
                (Some(id), Some(expected)) if id != *expected => {
                    return Err(ProtocolError::UnexpectedShape(format!(
                        "bulk entry {} is for '{}', expected '{}'",
                        index, id, expected
                    )));
                }
                (Some(id), _) => id,
                (None, Some(expected)) => expected.to_string(),
                (None, None) => {
                    return Err(ProtocolError::UnexpectedShape(format!(
                        "bulk entry {} has no id",
                        index
                    )));
                }
            };

            match (entry.error, entry.rev) {
                (Some(error), _) if error == "conflict" => Ok(BulkWriteOutcome::Conflict { id }),
                (Some(error), _) => Ok(BulkWriteOutcome::Rejected {
                    id,
                    error,
                    reason: entry.reason.unwrap_or_default(),
                }),
                (None, Some(rev)) => Ok(BulkWriteOutcome::Accepted { id, rev }),
                (None, None) => Err(ProtocolError::UnexpectedShape(format!(
                    "bulk entry {} has neither rev nor error",
                    index
                ))),
            }
        })
        .collect()
}

/// Response of a single-document write
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteResult {
    pub id: String,
    pub rev: Revision,
}

/// Normal and long-poll `_changes` response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangesBatch {
    pub results: Vec<ChangeEvent>,
    pub last_seq: Seq,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending: Option<u64>,
}

/// One non-blank line of a continuous `_changes` stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeedLine {
    Change(ChangeEvent),
    /// Sent once when the server ends the stream (its `timeout` elapsed)
    Finished {
        last_seq: Seq,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pending: Option<u64>,
    },
}

/// `GET /db`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseInfo {
    pub db_name: String,
    #[serde(default)]
    pub doc_count: u64,
    #[serde(default)]
    pub doc_del_count: u64,
    pub update_seq: Seq,
    #[serde(flatten)]
    pub extra: Fields,
}

/// `GET /`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerInfo {
    #[serde(default)]
    pub couchdb: String,
    pub version: String,
    #[serde(flatten)]
    pub extra: Fields,
}

/// `GET /_uuids`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UuidList {
    pub uuids: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(json: &str) -> Vec<BulkResultEntry> {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_bulk_body_omits_false_flag() {
        let docs = vec![Document::with_id("a")];
        let body = BulkDocsBody { docs: &docs, all_or_nothing: false };
        assert_eq!(serde_json::to_string(&body).unwrap(), r#"{"docs":[{"_id":"a"}]}"#);

        let body = BulkDocsBody { docs: &docs, all_or_nothing: true };
        assert_eq!(
            serde_json::to_string(&body).unwrap(),
            r#"{"docs":[{"_id":"a"}],"all_or_nothing":true}"#
        );
    }

    #[test]
    fn test_decode_mixed_outcomes_in_order() {
        let outcomes = decode_bulk_results(
            &[Some("a"), Some("a"), Some("b"), None],
            entries(
                r#"[
                {"id":"a","rev":"1-x"},
                {"id":"a","error":"conflict","reason":"Document update conflict."},
                {"id":"b","error":"forbidden","reason":"no"},
                {"id":"generated","rev":"1-y"}
            ]"#,
            ),
        )
        .unwrap();

        assert_eq!(outcomes.len(), 4);
        assert!(outcomes[0].is_accepted());
        assert_eq!(outcomes[1], BulkWriteOutcome::Conflict { id: "a".into() });
        assert_eq!(
            outcomes[2],
            BulkWriteOutcome::Rejected {
                id: "b".into(),
                error: "forbidden".into(),
                reason: "no".into()
            }
        );
        assert_eq!(outcomes[3].id(), "generated");
    }

    #[test]
    fn test_decode_rejects_length_mismatch() {
        let err = decode_bulk_results(&[Some("a"), Some("b")], entries(r#"[{"id":"a","rev":"1-x"}]"#))
            .unwrap_err();
        assert!(matches!(err, ProtocolError::UnexpectedShape(_)));
    }

    #[test]
    fn test_decode_rejects_id_mismatch() {
        let err = decode_bulk_results(
            &[Some("a"), Some("b")],
            entries(r#"[{"id":"b","rev":"1-x"},{"id":"a","rev":"1-y"}]"#),
        )
        .unwrap_err();
        assert!(matches!(err, ProtocolError::UnexpectedShape(msg) if msg.contains("entry 0")));
    }

    #[test]
    fn test_feed_lines() {
        let line: FeedLine =
            serde_json::from_str(r#"{"seq":"3-a","id":"x","changes":[{"rev":"1-q"}]}"#).unwrap();
        assert!(matches!(line, FeedLine::Change(ref e) if e.id == "x"));

        let line: FeedLine = serde_json::from_str(r#"{"last_seq":"9-z","pending":0}"#).unwrap();
        assert_eq!(
            line,
            FeedLine::Finished { last_seq: Seq::from("9-z"), pending: Some(0) }
        );
    }

    #[test]
    fn test_changes_batch() {
        let batch: ChangesBatch = serde_json::from_str(
            r#"{"results":[{"seq":1,"id":"a","changes":[{"rev":"1-x"}]}],"last_seq":1,"pending":0}"#,
        )
        .unwrap();
        assert_eq!(batch.results.len(), 1);
        assert_eq!(batch.last_seq, Seq::Number(1));

        let empty: ChangesBatch = serde_json::from_str(r#"{"results":[],"last_seq":"5-g"}"#).unwrap();
        assert!(empty.results.is_empty());
        assert!(empty.pending.is_none());
    }

    #[test]
    fn test_info_bodies() {
        let info: DatabaseInfo = serde_json::from_str(
            r#"{"db_name":"d","doc_count":2,"doc_del_count":1,"update_seq":7,"disk_size":100}"#,
        )
        .unwrap();
        assert_eq!(info.doc_count, 2);
        assert_eq!(info.update_seq, Seq::Number(7));
        assert!(info.extra.contains_key("disk_size"));

        let server: ServerInfo =
            serde_json::from_str(r#"{"couchdb":"Welcome","version":"3.3.2","vendor":{}}"#).unwrap();
        assert_eq!(server.version, "3.3.2");
    }
}
