//! Per-document outcomes of a bulk write

use crate::revision::Revision;

/// What the server did with one entry of a bulk write batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BulkWriteOutcome {
    /// Stored; `rev` is the new revision
    Accepted { id: String, rev: Revision },
    /// Not stored because the document's current revision did not match
    Conflict { id: String },
    /// Not stored for any other reason (validation, forbidden, ...)
    Rejected {
        id: String,
        error: String,
        reason: String,
    },
}

impl BulkWriteOutcome {
    pub fn id(&self) -> &str {
        match self {
            BulkWriteOutcome::Accepted { id, .. }
            | BulkWriteOutcome::Conflict { id }
            | BulkWriteOutcome::Rejected { id, .. } => id,
        }
    }

    /// New revision of an accepted write
    pub fn rev(&self) -> Option<&Revision> {
        match self {
            BulkWriteOutcome::Accepted { rev, .. } => Some(rev),
            _ => None,
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, BulkWriteOutcome::Accepted { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, BulkWriteOutcome::Conflict { .. })
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, BulkWriteOutcome::Rejected { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accessors() {
        let accepted = BulkWriteOutcome::Accepted {
            id: "a".into(),
            rev: Revision::parse("1-x").unwrap(),
        };
        let conflict = BulkWriteOutcome::Conflict { id: "b".into() };
        let rejected = BulkWriteOutcome::Rejected {
            id: "c".into(),
            error: "forbidden".into(),
            reason: "nope".into(),
        };

        assert_eq!(accepted.id(), "a");
        assert!(accepted.is_accepted());
        assert_eq!(accepted.rev().unwrap().generation(), 1);

        assert_eq!(conflict.id(), "b");
        assert!(conflict.is_conflict());
        assert!(conflict.rev().is_none());

        assert_eq!(rejected.id(), "c");
        assert!(rejected.is_rejected());
    }
}
