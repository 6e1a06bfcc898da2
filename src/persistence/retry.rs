//! The bounded dual-write retry queue (§4.5.3): when a synchronous flush
//! fails, the mutation still succeeds in memory and the affected collection
//! is handed off here for the background worker to retry with exponential
//! backoff.

use crate::core::error::{Error, Result};
use crate::core::types::{DocId, Document};
use std::time::Instant;

pub const MAX_RETRY_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone)]
pub struct RetryEntry {
    pub collection: String,
    pub id: DocId,
    pub doc: Document,
    pub retry_count: u32,
    pub enqueued_at: Instant,
}

impl RetryEntry {
    pub fn new(collection: impl Into<String>, id: DocId, doc: Document) -> Self {
        RetryEntry {
            collection: collection.into(),
            id,
            doc,
            retry_count: 0,
            enqueued_at: Instant::now(),
        }
    }

    /// Backoff before the next attempt: `(retry_count + 1) * 1s`.
    pub fn backoff(&self) -> std::time::Duration {
        std::time::Duration::from_secs((self.retry_count + 1) as u64)
    }
}

/// A bounded channel of pending flushes. Enqueue is best-effort: a full
/// queue is reported as `Unavailable` and the entry is dropped rather than
/// blocking the caller's mutation (§7).
pub struct RetryQueue {
    sender: crossbeam::channel::Sender<RetryEntry>,
    receiver: crossbeam::channel::Receiver<RetryEntry>,
}

impl RetryQueue {
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = crossbeam::channel::bounded(capacity.max(1));
        RetryQueue { sender, receiver }
    }

    pub fn enqueue(&self, entry: RetryEntry) -> Result<()> {
        self.sender
            .try_send(entry)
            .map_err(|_| Error::unavailable("retry queue is full, dual-write retry dropped"))
    }

    pub fn receiver(&self) -> crossbeam::channel::Receiver<RetryEntry> {
        self.receiver.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Document;

    #[test]
    fn backoff_scales_with_retry_count() {
        let mut entry = RetryEntry::new("users", DocId::new(1), Document::new());
        assert_eq!(entry.backoff(), std::time::Duration::from_secs(1));
        entry.retry_count = 2;
        assert_eq!(entry.backoff(), std::time::Duration::from_secs(3));
    }

    #[test]
    fn enqueue_past_capacity_is_unavailable() {
        let queue = RetryQueue::new(1);
        queue
            .enqueue(RetryEntry::new("users", DocId::new(1), Document::new()))
            .unwrap();
        let err = queue
            .enqueue(RetryEntry::new("users", DocId::new(2), Document::new()))
            .unwrap_err();
        assert_eq!(err.kind, crate::core::error::ErrorKind::Unavailable);
    }
}
