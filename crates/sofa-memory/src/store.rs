//! Per-database document storage with revision trees

use crate::error::{ServerError, ServerResult};
use sofa_core::document::is_reserved_id;
use sofa_core::{Document, Fields, Revision, LOCAL_PREFIX};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Document validation hook; `Err` carries the rejection reason
pub type Validator = Arc<dyn Fn(&Document) -> Result<(), String> + Send + Sync>;

/// How a write treats an id that already has a live revision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// The write must name a current leaf revision, otherwise it conflicts
    Checked,
    /// The write always succeeds, adding a new branch when it collides
    Branch,
}

#[derive(Debug, Clone)]
struct RevEntry {
    rev: Revision,
    deleted: bool,
    body: Fields,
}

/// Every revision the store knows for one id
#[derive(Debug, Clone)]
struct DocRecord {
    /// Current leaf revisions; never empty
    leaves: Vec<RevEntry>,
    /// Superseded revisions, kept for `?rev=` reads
    history: Vec<RevEntry>,
    seq: u64,
}

impl DocRecord {
    /// Deterministic winner: highest live leaf, else highest tombstone
    fn winner(&self) -> Option<&RevEntry> {
        self.leaves
            .iter()
            .filter(|l| !l.deleted)
            .max_by(|a, b| a.rev.cmp(&b.rev))
            .or_else(|| self.leaves.iter().max_by(|a, b| a.rev.cmp(&b.rev)))
    }

    fn is_deleted(&self) -> bool {
        self.winner().map_or(true, |w| w.deleted)
    }

    /// Live leaves other than the winner, highest first
    fn conflicts(&self) -> Vec<Revision> {
        let winner = self.winner().map(|w| &w.rev);
        let mut revs: Vec<Revision> = self
            .leaves
            .iter()
            .filter(|l| !l.deleted && Some(&l.rev) != winner)
            .map(|l| l.rev.clone())
            .collect();
        revs.sort_by(|a, b| b.cmp(a));
        revs
    }

    fn find(&self, rev: &Revision) -> Option<&RevEntry> {
        self.leaves
            .iter()
            .chain(self.history.iter())
            .find(|e| &e.rev == rev)
    }

    fn live_leaf(&self, rev: &Revision) -> Option<usize> {
        self.leaves.iter().position(|l| &l.rev == rev && !l.deleted)
    }

    fn leaf(&self, rev: &Revision) -> Option<usize> {
        self.leaves.iter().position(|l| &l.rev == rev)
    }
}

/// A change as recorded in the sequence index
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeRecord {
    pub seq: u64,
    pub id: String,
    pub rev: Revision,
    pub deleted: bool,
}

/// State of one database
#[derive(Default)]
pub struct Store {
    docs: BTreeMap<String, DocRecord>,
    by_seq: BTreeMap<u64, String>,
    update_seq: u64,
    validators: Vec<Validator>,
}

fn new_hash() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

fn to_document(id: &str, entry: &RevEntry) -> Document {
    Document {
        id: Some(id.to_string()),
        rev: Some(entry.rev.clone()),
        deleted: entry.deleted,
        conflicts: Vec::new(),
        fields: entry.body.clone(),
    }
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update_seq(&self) -> u64 {
        self.update_seq
    }

    pub fn add_validator(&mut self, validator: Validator) {
        self.validators.push(validator);
    }

    /// Number of live and deleted documents, local documents excluded
    pub fn counts(&self) -> (u64, u64) {
        self.docs
            .iter()
            .filter(|(id, _)| !id.starts_with(LOCAL_PREFIX))
            .fold((0, 0), |(live, deleted), (_, rec)| {
                if rec.is_deleted() {
                    (live, deleted + 1)
                } else {
                    (live + 1, deleted)
                }
            })
    }

    /// Whether the id has a live winning revision
    pub fn is_live(&self, id: &str) -> bool {
        self.docs.get(id).is_some_and(|rec| !rec.is_deleted())
    }

    /// Whether the id exists at all, tombstones included
    pub fn contains(&self, id: &str) -> bool {
        self.docs.contains_key(id)
    }

    /// Validate without storing; used by all-or-nothing batches
    pub fn check(&self, doc: &Document, mode: WriteMode) -> ServerResult<()> {
        if let Some(id) = doc.id() {
            if is_reserved_id(id) {
                return Err(ServerError::illegal_docid());
            }
        }
        for validator in &self.validators {
            validator(doc).map_err(ServerError::forbidden)?;
        }
        if mode == WriteMode::Checked {
            let existing = doc.id().and_then(|id| self.docs.get(id));
            match (existing, doc.rev()) {
                (None, None) => {}
                (None, Some(_)) => return Err(ServerError::conflict()),
                (Some(rec), None) if !rec.is_deleted() => return Err(ServerError::conflict()),
                (Some(_), None) => {}
                (Some(rec), Some(rev)) => {
                    if rec.live_leaf(rev).is_none() {
                        return Err(ServerError::conflict());
                    }
                }
            }
        }
        Ok(())
    }

    /// Store one document, returning its id and new revision
    pub fn write(&mut self, mut doc: Document, mode: WriteMode) -> ServerResult<(String, Revision)> {
        let id = match doc.id.take() {
            Some(id) => id,
            None => new_hash(),
        };
        doc.id = Some(id.clone());
        self.check(&doc, mode)?;

        let entry = RevEntry {
            rev: Revision::new(1, new_hash())?,
            deleted: doc.deleted,
            body: std::mem::take(&mut doc.fields),
        };

        if !self.docs.contains_key(&id) {
            let rev = entry.rev.clone();
            let record = DocRecord {
                leaves: vec![entry],
                history: Vec::new(),
                seq: 0,
            };
            self.docs.insert(id.clone(), record);
            self.bump(&id);
            return Ok((id, rev));
        }
        let record = self
            .docs
            .get_mut(&id)
            .ok_or_else(|| ServerError::not_found("missing"))?;

        // Parent leaf the new revision extends, if any
        let parent = match &doc.rev {
            Some(rev) => match record.leaf(rev) {
                Some(index) => Some(index),
                // Branching off a non-leaf revision
                None => {
                    let rev = rev.successor(new_hash())?;
                    let new = RevEntry { rev: rev.clone(), ..entry };
                    record.leaves.push(new);
                    self.bump(&id);
                    return Ok((id, rev));
                }
            },
            None if record.is_deleted() => record
                .winner()
                .and_then(|w| record.leaf(&w.rev)),
            None => None,
        };

        let rev = match parent {
            Some(index) => {
                let old = record.leaves.remove(index);
                let rev = old.rev.successor(new_hash())?;
                record.history.push(old);
                record.leaves.push(RevEntry { rev: rev.clone(), ..entry });
                rev
            }
            None => {
                // Colliding create in branch mode: a new generation-1 leaf
                let rev = entry.rev.clone();
                record.leaves.push(entry);
                rev
            }
        };

        self.bump(&id);
        Ok((id, rev))
    }

    fn bump(&mut self, id: &str) {
        if id.starts_with(LOCAL_PREFIX) {
            return;
        }
        self.update_seq += 1;
        let seq = self.update_seq;
        if let Some(record) = self.docs.get_mut(id) {
            if record.seq != 0 {
                self.by_seq.remove(&record.seq);
            }
            record.seq = seq;
        }
        self.by_seq.insert(seq, id.to_string());
    }

    /// Read a document.
    ///
    /// Without `rev` the winner is returned, and a deleted winner reads as
    /// not found. With `rev` any known revision is returned, tombstones
    /// included.
    pub fn get(&self, id: &str, rev: Option<&Revision>, conflicts: bool) -> ServerResult<Document> {
        let record = self
            .docs
            .get(id)
            .ok_or_else(|| ServerError::not_found("missing"))?;

        let entry = match rev {
            Some(rev) => record
                .find(rev)
                .ok_or_else(|| ServerError::not_found("missing"))?,
            None => {
                let winner = record
                    .winner()
                    .ok_or_else(|| ServerError::not_found("missing"))?;
                if winner.deleted {
                    return Err(ServerError::not_found("deleted"));
                }
                winner
            }
        };

        let mut doc = to_document(id, entry);
        if conflicts {
            doc.conflicts = record.conflicts();
        }
        Ok(doc)
    }

    /// Current winner of a live document, if any
    pub fn winner(&self, id: &str, conflicts: bool) -> Option<Document> {
        self.get(id, None, conflicts).ok()
    }

    /// Winner including tombstones, as the changes feed reports it
    pub fn latest(&self, id: &str) -> Option<Document> {
        let record = self.docs.get(id)?;
        record.winner().map(|w| to_document(id, w))
    }

    /// Changes with a sequence strictly after `since`, in sequence order
    pub fn changes_since(&self, since: u64) -> Vec<ChangeRecord> {
        self.by_seq
            .range(since + 1..)
            .filter_map(|(seq, id)| {
                let winner = self.docs.get(id)?.winner()?;
                Some(ChangeRecord {
                    seq: *seq,
                    id: id.clone(),
                    rev: winner.rev.clone(),
                    deleted: winner.deleted,
                })
            })
            .collect()
    }

    /// Live documents in id order, local documents excluded
    pub fn live_docs(&self, conflicts: bool) -> Vec<Document> {
        self.docs
            .keys()
            .filter(|id| !id.starts_with(LOCAL_PREFIX))
            .filter_map(|id| self.winner(id, conflicts))
            .collect()
    }

    /// Leaf revisions per id, for diagnostics
    pub fn leaves(&self) -> HashMap<String, Vec<Revision>> {
        self.docs
            .iter()
            .map(|(id, rec)| (id.clone(), rec.leaves.iter().map(|l| l.rev.clone()).collect()))
            .collect()
    }
}
