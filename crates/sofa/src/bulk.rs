//! Bulk writes through `_bulk_docs`

use crate::client::decode;
use crate::database::Database;
use crate::error::{Error, Result};
use sofa_core::{BulkWriteOutcome, Document};
use sofa_protocol::{decode_bulk_results, Body, BulkDocsBody, BulkResultEntry, ProtocolError, Request};
use tracing::{debug, info};

/// Per-batch tallies of a bulk write
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BulkSummary {
    pub accepted: usize,
    pub conflicts: usize,
    pub rejected: usize,
}

impl BulkSummary {
    pub fn of(outcomes: &[BulkWriteOutcome]) -> Self {
        outcomes.iter().fold(Self::default(), |mut summary, outcome| {
            match outcome {
                BulkWriteOutcome::Accepted { .. } => summary.accepted += 1,
                BulkWriteOutcome::Conflict { .. } => summary.conflicts += 1,
                BulkWriteOutcome::Rejected { .. } => summary.rejected += 1,
            }
            summary
        })
    }

    pub fn all_accepted(&self) -> bool {
        self.conflicts == 0 && self.rejected == 0
    }
}

impl Database {
    /// Write a batch of documents in one request.
    ///
    /// Returns one outcome per submitted document, in submission order.
    /// Per-document conflicts and rejections are reported as outcomes; only
    /// request-level failures are errors.
    ///
    /// With `all_or_nothing` the server applies the whole batch or none of
    /// it, and concurrent edits become conflicting revision branches rather
    /// than `Conflict` outcomes.
    pub async fn bulk_write(
        &self,
        docs: &[Document],
        all_or_nothing: bool,
    ) -> Result<Vec<BulkWriteOutcome>> {
        let body = Body::json(&BulkDocsBody {
            docs,
            all_or_nothing,
        })?;
        let response = self
            .client()
            .execute(Request::bulk_docs(self.name(), body))
            .await?;

        let entries: Vec<BulkResultEntry> = decode(&response)?;
        let submitted: Vec<Option<&str>> = docs.iter().map(Document::id).collect();
        let outcomes = decode_bulk_results(&submitted, entries).map_err(|e| match e {
            ProtocolError::UnexpectedShape(msg) => Error::Decode(msg),
            other => Error::Protocol(other),
        })?;

        let summary = BulkSummary::of(&outcomes);
        if summary.all_accepted() {
            debug!(db = %self.name(), docs = docs.len(), all_or_nothing, "bulk write");
        } else {
            info!(
                db = %self.name(),
                docs = docs.len(),
                all_or_nothing,
                conflicts = summary.conflicts,
                rejected = summary.rejected,
                "bulk write with failures"
            );
        }
        Ok(outcomes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sofa_core::Revision;

    #[test]
    fn test_summary() {
        let outcomes = vec![
            BulkWriteOutcome::Accepted {
                id: "a".into(),
                rev: Revision::parse("1-x").unwrap(),
            },
            BulkWriteOutcome::Conflict { id: "a".into() },
            BulkWriteOutcome::Rejected {
                id: "b".into(),
                error: "forbidden".into(),
                reason: "no".into(),
            },
            BulkWriteOutcome::Conflict { id: "c".into() },
        ];

        let summary = BulkSummary::of(&outcomes);
        assert_eq!(
            summary,
            BulkSummary {
                accepted: 1,
                conflicts: 2,
                rejected: 1
            }
        );
        assert!(!summary.all_accepted());
        assert!(BulkSummary::of(&[]).all_accepted());
    }
}
