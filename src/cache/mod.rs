//! The bounded collection cache (§4.3): a mapping from collection name to a
//! loaded [`CollectionHandle`], evicting least-recently-used entries once
//! capacity is exceeded. Metadata survives eviction in the engine's separate
//! metadata map (§3); this cache only governs document residency.

use crate::concurrency::CollectionHandle;
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::Arc;

/// Wraps `lru::LruCache`, which requires a nonzero capacity, to also support
/// the two degenerate capacities the spec calls out: zero (every insert is
/// immediately evicted) and negative (practically unbounded).
pub struct Cache {
    immediately_evicts: bool,
    inner: Mutex<LruCache<String, Arc<CollectionHandle>>>,
}

impl Cache {
    /// `capacity` mirrors [`crate::core::config::Config::cache_capacity`]'s
    /// signed convention: `<= 0` is negative-or-zero degenerate input from a
    /// misconfigured memory budget. Zero evicts everything immediately;
    /// negative is treated as unbounded.
    pub fn new(capacity: i64) -> Self {
        let immediately_evicts = capacity == 0;
        let nonzero = if capacity <= 0 {
            NonZeroUsize::new(usize::MAX).unwrap()
        } else {
            NonZeroUsize::new(capacity as usize).unwrap_or(NonZeroUsize::new(1).unwrap())
        };
        Cache {
            immediately_evicts,
            inner: Mutex::new(LruCache::new(nonzero)),
        }
    }

    /// Returns the handle for `key` if resident, marking it
    /// most-recently-used. Access-count/timestamp bookkeeping lives on
    /// [`crate::collection::CollectionInfo`], updated by the caller.
    pub fn get(&self, key: &str) -> Option<Arc<CollectionHandle>> {
        self.inner.lock().get(key).cloned()
    }

    /// Inserts or replaces `key`. Returns the evicted `(name, handle)` pair
    /// if capacity was exceeded by this insert, so the caller can transition
    /// that collection's metadata state back to `Unloaded`.
    pub fn put(&self, key: String, handle: Arc<CollectionHandle>) -> Option<(String, Arc<CollectionHandle>)> {
        if self.immediately_evicts {
            return Some((key, handle));
        }
        self.inner.lock().push(key, handle)
    }

    pub fn remove(&self, key: &str) -> Option<Arc<CollectionHandle>> {
        self.inner.lock().pop(key)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
