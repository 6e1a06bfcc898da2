//! The lock hierarchy (§4.6): an engine-level lock (owned by
//! [`crate::engine::StorageEngine`]), a per-collection lock bundled into
//! [`CollectionHandle`], and a per-document lock table inside the handle.
//! Lock order when more than one is held: engine → per-collection →
//! per-document.

use crate::collection::Collection;
use crate::core::types::DocId;
use crate::index::IndexSet;
use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::collections::HashMap;
use std::sync::Arc;

/// Everything needed to serve reads and writes against one loaded
/// collection: its documents (and, inside [`Collection`], the id counter
/// backing single-document and batch inserts), its indexes, and a
/// per-document lock table for fine-grained concurrency.
///
/// The id counter lives inside the `collection` lock rather than as a
/// free-standing atomic: §4.6 requires a batch insert's reserve → validate →
/// write → commit sequence to be race-free against a concurrent
/// single-document insert, which means counter allocation and the document
/// write it guards must serialize under the same lock. Callers hold
/// `collection_mut()` for the whole critical section instead of taking the
/// lock piecemeal.
pub struct CollectionHandle {
    collection: RwLock<Collection>,
    indexes: RwLock<IndexSet>,
    doc_locks: Mutex<HashMap<DocId, Arc<RwLock<()>>>>,
}

impl CollectionHandle {
    pub fn new(collection: Collection) -> Self {
        CollectionHandle {
            collection: RwLock::new(collection),
            indexes: RwLock::new(IndexSet::with_id_index()),
            doc_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn collection(&self) -> RwLockReadGuard<'_, Collection> {
        self.collection.read()
    }

    pub fn collection_mut(&self) -> RwLockWriteGuard<'_, Collection> {
        self.collection.write()
    }

    pub fn indexes(&self) -> RwLockReadGuard<'_, IndexSet> {
        self.indexes.read()
    }

    pub fn indexes_mut(&self) -> RwLockWriteGuard<'_, IndexSet> {
        self.indexes.write()
    }

    /// Gets or creates the fine-grained lock for one document id. Callers
    /// hold this (not the collection lock) for the duration of a
    /// single-document critical section so concurrent writes to different
    /// documents in the same collection can proceed in parallel.
    pub fn doc_lock(&self, id: DocId) -> Arc<RwLock<()>> {
        self.doc_locks
            .lock()
            .entry(id)
            .or_insert_with(|| Arc::new(RwLock::new(())))
            .clone()
    }

    /// Drops the lock entry for a deleted document; harmless to skip since
    /// it would just sit unused, but keeps the table from growing unbounded
    /// under heavy delete churn.
    pub fn forget_doc_lock(&self, id: DocId) {
        self.doc_locks.lock().remove(&id);
    }
}

/// A single-shot, idempotent shutdown broadcast observed by background
/// workers and long-running streams (§4.6, §5). Cloning a `crossbeam_channel`
/// receiver and dropping the sender once gives every clone a simultaneous,
/// lock-free "stop" notification.
#[derive(Clone)]
pub struct ShutdownSignal {
    receiver: crossbeam::channel::Receiver<()>,
    sender: Arc<Mutex<Option<crossbeam::channel::Sender<()>>>>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (sender, receiver) = crossbeam::channel::bounded(0);
        ShutdownSignal {
            receiver,
            sender: Arc::new(Mutex::new(Some(sender))),
        }
    }

    pub fn is_triggered(&self) -> bool {
        matches!(
            self.receiver.try_recv(),
            Err(crossbeam::channel::TryRecvError::Disconnected)
        )
    }

    pub fn receiver(&self) -> crossbeam::channel::Receiver<()> {
        self.receiver.clone()
    }

    /// Idempotent: calling this more than once is a no-op after the first.
    pub fn trigger(&self) {
        self.sender.lock().take();
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        ShutdownSignal::new()
    }
}
