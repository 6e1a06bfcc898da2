//! The in-memory collection and its metadata (§3, §3.1).

use crate::core::types::{DocId, Document};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Lifecycle state of a collection's in-memory document map (§3.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CollectionState {
    Unloaded,
    Loading,
    Loaded,
    Dirty,
}

/// Metadata tracked for every known collection, independent of whether its
/// documents are currently resident in the cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionInfo {
    pub name: String,
    pub document_count: usize,
    pub size_bytes: u64,
    pub last_modified: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub access_count: u64,
    pub state: CollectionState,
}

impl CollectionInfo {
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        CollectionInfo {
            name: name.into(),
            document_count: 0,
            size_bytes: 0,
            last_modified: now,
            last_accessed: now,
            access_count: 0,
            state: CollectionState::Loaded,
        }
    }

    pub fn touch_access(&mut self) {
        self.last_accessed = Utc::now();
        self.access_count += 1;
    }

    pub fn touch_modified(&mut self) {
        self.last_modified = Utc::now();
    }
}

/// The in-memory document map for one collection, plus its id counter. Index
/// state lives alongside this in [`crate::concurrency::CollectionHandle`]
/// rather than here, since a collection can be present-but-unindexed only
/// transiently during load.
///
/// The id counter is a plain field rather than an independent atomic: §4.6
/// requires batch insert's reserve → validate → write → commit sequence to
/// be race-free against a concurrent single insert, so counter allocation
/// must happen under the same write lock ([`crate::concurrency::
/// CollectionHandle::collection_mut`]) that guards the document map it
/// allocates ids into.
#[derive(Debug, Clone, Default)]
pub struct Collection {
    pub documents: HashMap<DocId, Document>,
    pub id_counter: u64,
}

impl Collection {
    pub fn new() -> Self {
        Collection {
            documents: HashMap::new(),
            id_counter: 0,
        }
    }

    /// Largest numeric id present, or `None` for an empty collection. Used
    /// to restore the id counter on load: the counter must end up strictly
    /// greater than this, which `None` (counter starts at zero) already
    /// guarantees, and `Some(max)` does not — a document with id 0 is a
    /// valid collection member, so "no documents" and "max id is 0" must be
    /// distinguishable here.
    pub fn max_numeric_id(&self) -> Option<u64> {
        self.documents.keys().map(|id| id.value()).max()
    }

    /// Allocates the next id for a single-document insert. Callers must hold
    /// this collection's write lock for the duration of the insert it backs.
    pub fn next_id(&mut self) -> DocId {
        let id = DocId::new(self.id_counter);
        self.id_counter += 1;
        id
    }

    /// Reserves `n` consecutive ids for a batch insert without committing
    /// the advance. The caller validates none collide and writes every
    /// document while still holding the same write lock, then calls
    /// [`Collection::commit_reserved`] — the whole sequence is one critical
    /// section, so no concurrent `next_id`/`reserve_ids` can land inside the
    /// reserved-but-uncommitted range.
    pub fn reserve_ids(&self, n: u64) -> (u64, u64) {
        let start = self.id_counter;
        (start, start + n)
    }

    pub fn commit_reserved(&mut self, n: u64) {
        self.id_counter += n;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::set_doc_id;

    #[test]
    fn max_numeric_id_is_none_for_empty_collection() {
        assert_eq!(Collection::new().max_numeric_id(), None);
    }

    #[test]
    fn max_numeric_id_tracks_largest_inserted_id() {
        let mut coll = Collection::new();
        for n in [3u64, 1, 7, 2] {
            let mut doc = Document::new();
            set_doc_id(&mut doc, DocId::new(n));
            coll.documents.insert(DocId::new(n), doc);
        }
        assert_eq!(coll.max_numeric_id(), Some(7));
    }

    #[test]
    fn next_id_increments_monotonically() {
        let mut coll = Collection::new();
        assert_eq!(coll.next_id(), DocId::new(0));
        assert_eq!(coll.next_id(), DocId::new(1));
    }

    #[test]
    fn reserve_ids_does_not_advance_counter_until_committed() {
        let mut coll = Collection::new();
        let (start, end) = coll.reserve_ids(5);
        assert_eq!((start, end), (0, 5));
        assert_eq!(coll.id_counter, 0);
        coll.commit_reserved(5);
        assert_eq!(coll.id_counter, 5);
    }
}
