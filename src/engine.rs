//! The storage engine façade (§4.7): the public surface every CRUD, batch,
//! query, pagination, and streaming operation goes through, plus lifecycle
//! (background workers, whole-database save/load).

use crate::cache::Cache;
use crate::collection::{Collection, CollectionInfo, CollectionState};
use crate::concurrency::{CollectionHandle, ShutdownSignal};
use crate::core::config::{Config, SaveMode};
use crate::core::error::{Error, Result};
use crate::core::filter::{matches, Filter};
use crate::core::stats::{
    estimate_document_size, EngineStats, HealthCheck, HealthCheckResult, HealthStatus, MemoryStats,
};
use crate::core::types::{doc_id_of, set_doc_id, DocId, Document, Value, ID_FIELD};
use crate::pagination::{paginate, PaginationOptions, PaginationResult};
use crate::persistence::retry::MAX_RETRY_ATTEMPTS;
use crate::persistence::{PersistenceManager, RetryEntry, RetryQueue};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

pub const MAX_BATCH_SIZE: usize = 1000;
pub const STREAM_CHANNEL_CAPACITY: usize = 100;

struct EngineInner {
    config: Config,
    metadata: RwLock<HashMap<String, CollectionInfo>>,
    cache: Cache,
    persistence: PersistenceManager,
    retry_queue: RetryQueue,
    shutdown: ShutdownSignal,
    start_time: Instant,
    workers: Mutex<Workers>,
}

#[derive(Default)]
struct Workers {
    background_save: Option<JoinHandle<()>>,
    retry: Option<JoinHandle<()>>,
}

/// The in-memory document database's storage engine: CRUD, batch, query,
/// pagination, streaming, index management, and the background workers that
/// keep the on-disk files current (§2, §4.7, §4.8).
pub struct StorageEngine {
    inner: Arc<EngineInner>,
}

impl StorageEngine {
    pub fn new(config: Config) -> Self {
        let persistence = PersistenceManager::new(config.data_dir.clone());
        let cache_capacity = config.cache_capacity() as i64;
        let retry_capacity = config.retry_queue_capacity;

        // Rediscover collections a prior process already persisted, so a
        // fresh engine pointed at the same data_dir sees them as `Unloaded`
        // without requiring an explicit `load_metadata` call.
        let mut metadata = HashMap::new();
        if let Ok(names) = persistence.list_collections() {
            for name in names {
                let mut info = CollectionInfo::new(&name);
                info.state = CollectionState::Unloaded;
                metadata.insert(name, info);
            }
        }

        let inner = Arc::new(EngineInner {
            cache: Cache::new(cache_capacity),
            retry_queue: RetryQueue::new(retry_capacity),
            persistence,
            config,
            metadata: RwLock::new(metadata),
            shutdown: ShutdownSignal::new(),
            start_time: Instant::now(),
            workers: Mutex::new(Workers::default()),
        });
        StorageEngine { inner }
    }

    // ---- collection resolution -------------------------------------------------

    /// Resolves `name` to its loaded handle, creating or loading it if
    /// necessary.
    ///
    /// §4.6 requires the engine lock to be "acquired as writer for any
    /// operation that mutates the set of known collections or replaces
    /// cache entries" — so once the fast-path cache hit misses, the entire
    /// check-then-install decision (re-checking the cache, checking
    /// metadata, and installing the resulting handle) runs under one
    /// `metadata.write()` guard. Without that, two concurrent resolves for
    /// the same not-yet-cached name could each observe a miss and install
    /// independent handles into the cache, silently orphaning whichever
    /// handle loses the race along with any document written to it.
    fn resolve_handle(&self, name: &str, create_if_absent: bool) -> Result<Arc<CollectionHandle>> {
        if name.is_empty() {
            return Err(Error::invalid_argument("collection name must not be empty"));
        }
        if let Some(handle) = self.inner.cache.get(name) {
            return Ok(handle);
        }

        let mut meta = self.inner.metadata.write();
        if let Some(handle) = self.inner.cache.get(name) {
            return Ok(handle);
        }
        if meta.contains_key(name) {
            return self.load_collection_handle_locked(name, &mut meta);
        }
        if !create_if_absent {
            return Err(Error::not_found(format!("collection '{name}' does not exist")));
        }
        meta.insert(name.to_string(), CollectionInfo::new(name));
        let handle = Arc::new(CollectionHandle::new(Collection::new()));
        self.install_in_cache_locked(name.to_string(), handle.clone(), &mut meta);
        Ok(handle)
    }

    /// Loads `name` from disk and installs it, assuming the caller already
    /// holds `self.inner.metadata`'s write guard.
    fn load_collection_handle_locked(
        &self,
        name: &str,
        meta: &mut HashMap<String, CollectionInfo>,
    ) -> Result<Arc<CollectionHandle>> {
        let loaded = self.inner.persistence.load_collection(name)?;
        let handle = Arc::new(CollectionHandle::new(Collection::new()));

        let (document_count, size_bytes) = match loaded {
            Some((mut collection, indexes, size)) => {
                collection.id_counter = collection.max_numeric_id().map(|m| m + 1).unwrap_or(0);
                let count = collection.documents.len();
                *handle.collection_mut() = collection;
                *handle.indexes_mut() = indexes;
                (count, size)
            }
            None => (0, 0),
        };

        let info = meta.entry(name.to_string()).or_insert_with(|| CollectionInfo::new(name));
        info.document_count = document_count;
        info.size_bytes = size_bytes;
        info.state = CollectionState::Loaded;

        self.install_in_cache_locked(name.to_string(), handle.clone(), meta);
        Ok(handle)
    }

    /// Installs `handle` in the cache, downgrading any evicted collection's
    /// metadata state back to `Unloaded` (§3: metadata survives eviction,
    /// only the document map is released). Assumes the caller already holds
    /// `self.inner.metadata`'s write guard, keeping the cache replacement and
    /// the metadata state transition it triggers in one critical section.
    fn install_in_cache_locked(
        &self,
        name: String,
        handle: Arc<CollectionHandle>,
        meta: &mut HashMap<String, CollectionInfo>,
    ) {
        if let Some((evicted_name, _evicted_handle)) = self.inner.cache.put(name, handle) {
            if let Some(info) = meta.get_mut(&evicted_name) {
                if info.state == CollectionState::Loaded {
                    info.state = CollectionState::Unloaded;
                }
            }
        }
    }

    fn touch_access(&self, name: &str) {
        if let Some(info) = self.inner.metadata.write().get_mut(name) {
            info.touch_access();
        }
    }

    fn finish_write(&self, name: &str, doc_count: usize, trigger: Option<(DocId, Document)>) {
        {
            let mut meta = self.inner.metadata.write();
            let info = meta
                .entry(name.to_string())
                .or_insert_with(|| CollectionInfo::new(name));
            info.document_count = doc_count;
            info.touch_modified();
            info.state = CollectionState::Dirty;
        }

        if self.inner.config.save_mode == SaveMode::TransactionSave {
            if let Err(e) = flush_collection(&self.inner, name) {
                eprintln!("[persistence] dual-write flush failed for '{name}': {e}; queuing retry");
                if let Some((id, doc)) = trigger {
                    if let Err(queue_err) = self.inner.retry_queue.enqueue(RetryEntry::new(name, id, doc)) {
                        eprintln!("[persistence] {queue_err}");
                    }
                }
            }
        }
    }

    // ---- façade: collections ----------------------------------------------------

    pub fn create_collection(&self, name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(Error::invalid_argument("collection name must not be empty"));
        }
        let mut meta = self.inner.metadata.write();
        if meta.contains_key(name) {
            return Err(Error::already_exists(format!("collection '{name}' already exists")));
        }
        meta.insert(name.to_string(), CollectionInfo::new(name));
        let handle = Arc::new(CollectionHandle::new(Collection::new()));
        self.install_in_cache_locked(name.to_string(), handle, &mut meta);
        Ok(())
    }

    pub fn get_collection(&self, name: &str) -> Result<Vec<Document>> {
        let handle = self.resolve_handle(name, false)?;
        let docs = handle.collection().documents.values().cloned().collect();
        self.touch_access(name);
        Ok(docs)
    }

    // ---- façade: single-document CRUD ------------------------------------------

    pub fn insert(&self, coll: &str, mut doc: Document) -> Result<Document> {
        if coll.is_empty() {
            return Err(Error::invalid_argument("collection name must not be empty"));
        }
        let handle = self.resolve_handle(coll, true)?;

        // Allocate the id and write the document under the same collection
        // write lock: §4.6 requires id allocation to be race-free against a
        // concurrent batch insert's reserve/validate/commit sequence, which
        // means the allocation can't be a free-standing atomic op that
        // finishes before the document it backs is written.
        let (id, doc_count) = {
            let mut collection = handle.collection_mut();
            let mut indexes = handle.indexes_mut();
            let id = collection.next_id();
            set_doc_id(&mut doc, id);
            indexes.update_for_document(id, None, Some(&doc));
            collection.documents.insert(id, doc.clone());
            (id, collection.documents.len())
        };

        self.finish_write(coll, doc_count, Some((id, doc.clone())));
        Ok(doc)
    }

    pub fn get_by_id(&self, coll: &str, id: &str) -> Result<Document> {
        let doc_id = parse_doc_id(id)?;
        let handle = self.resolve_handle(coll, false)?;
        let doc_lock = handle.doc_lock(doc_id);
        let _guard = doc_lock.read();

        let doc = handle
            .collection()
            .documents
            .get(&doc_id)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("document '{id}' not found in '{coll}'")))?;
        self.touch_access(coll);
        Ok(doc)
    }

    pub fn update_by_id(&self, coll: &str, id: &str, patch: Document) -> Result<Document> {
        let doc_id = parse_doc_id(id)?;
        let handle = self.resolve_handle(coll, false)?;
        let doc_lock = handle.doc_lock(doc_id);
        let _guard = doc_lock.write();

        let existing = handle
            .collection()
            .documents
            .get(&doc_id)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("document '{id}' not found in '{coll}'")))?;

        let mut updated = existing.clone();
        for (field, value) in patch {
            if field == ID_FIELD {
                continue;
            }
            if value.is_null() {
                updated.remove(&field);
            } else {
                updated.insert(field, value);
            }
        }

        {
            let mut collection = handle.collection_mut();
            let mut indexes = handle.indexes_mut();
            collection.documents.insert(doc_id, updated.clone());
            indexes.update_for_document(doc_id, Some(&existing), Some(&updated));
        }

        let doc_count = handle.collection().documents.len();
        self.finish_write(coll, doc_count, Some((doc_id, updated.clone())));
        Ok(updated)
    }

    pub fn replace_by_id(&self, coll: &str, id: &str, mut doc: Document) -> Result<Document> {
        let doc_id = parse_doc_id(id)?;
        let handle = self.resolve_handle(coll, false)?;
        let doc_lock = handle.doc_lock(doc_id);
        let _guard = doc_lock.write();

        let existing = handle
            .collection()
            .documents
            .get(&doc_id)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("document '{id}' not found in '{coll}'")))?;
        set_doc_id(&mut doc, doc_id);

        {
            let mut collection = handle.collection_mut();
            let mut indexes = handle.indexes_mut();
            collection.documents.insert(doc_id, doc.clone());
            indexes.update_for_document(doc_id, Some(&existing), Some(&doc));
        }

        let doc_count = handle.collection().documents.len();
        self.finish_write(coll, doc_count, Some((doc_id, doc.clone())));
        Ok(doc)
    }

    pub fn delete_by_id(&self, coll: &str, id: &str) -> Result<()> {
        let doc_id = parse_doc_id(id)?;
        let handle = self.resolve_handle(coll, false)?;
        let doc_lock = handle.doc_lock(doc_id);
        let _guard = doc_lock.write();

        {
            let mut collection = handle.collection_mut();
            let mut indexes = handle.indexes_mut();
            let removed = collection
                .documents
                .remove(&doc_id)
                .ok_or_else(|| Error::not_found(format!("document '{id}' not found in '{coll}'")))?;
            indexes.update_for_document(doc_id, Some(&removed), None);
        }
        handle.forget_doc_lock(doc_id);

        let doc_count = handle.collection().documents.len();
        self.finish_write(coll, doc_count, None);
        Ok(())
    }

    // ---- façade: batch operations ------------------------------------------------

    pub fn batch_insert(&self, coll: &str, mut docs: Vec<Document>) -> Result<Vec<Document>> {
        if docs.is_empty() || docs.len() > MAX_BATCH_SIZE {
            return Err(Error::invalid_argument(format!(
                "batch_insert requires between 1 and {MAX_BATCH_SIZE} documents, got {}",
                docs.len()
            )));
        }
        let handle = self.resolve_handle(coll, true)?;
        let n = docs.len() as u64;

        // The whole reserve → validate → write → commit sequence runs under
        // one collection write-lock acquisition (§4.6): otherwise a
        // concurrent single-document `insert` could allocate and commit an
        // id inside this batch's reserved-but-uncommitted range between the
        // collision check and the writes below, and silently clobber it.
        let doc_count = {
            let mut collection = handle.collection_mut();
            let mut indexes = handle.indexes_mut();

            let (start, _end) = collection.reserve_ids(n);
            for offset in 0..n {
                if collection.documents.contains_key(&DocId::new(start + offset)) {
                    return Err(Error::already_exists(format!(
                        "id collision reserving batch ids for '{coll}' (counter corrupted?)"
                    )));
                }
            }

            for (offset, doc) in docs.iter_mut().enumerate() {
                set_doc_id(doc, DocId::new(start + offset as u64));
            }
            for doc in &docs {
                let id = doc_id_of(doc).expect("id was just assigned");
                indexes.update_for_document(id, None, Some(doc));
                collection.documents.insert(id, doc.clone());
            }
            collection.commit_reserved(n);
            collection.documents.len()
        };

        let trigger = docs.last().cloned().and_then(|d| doc_id_of(&d).map(|id| (id, d)));
        self.finish_write(coll, doc_count, trigger);
        Ok(docs)
    }

    pub fn batch_update(&self, coll: &str, ops: Vec<(String, Document)>) -> Result<Vec<Document>> {
        if ops.is_empty() || ops.len() > MAX_BATCH_SIZE {
            return Err(Error::invalid_argument(format!(
                "batch_update requires between 1 and {MAX_BATCH_SIZE} operations, got {}",
                ops.len()
            )));
        }
        let handle = self.resolve_handle(coll, false)?;

        let mut parsed = Vec::with_capacity(ops.len());
        for (id, patch) in ops {
            if id.is_empty() {
                return Err(Error::invalid_argument("batch_update op id must not be empty"));
            }
            parsed.push((parse_doc_id(&id)?, patch));
        }

        let prepared: Vec<(DocId, Document, Document)> = {
            let collection = handle.collection();
            let mut out = Vec::with_capacity(parsed.len());
            for (doc_id, patch) in parsed {
                let existing = collection.documents.get(&doc_id).cloned().ok_or_else(|| {
                    Error::not_found(format!("document '{doc_id}' not found in '{coll}'"))
                })?;
                let mut updated = existing.clone();
                for (field, value) in patch {
                    if field == ID_FIELD {
                        continue;
                    }
                    if value.is_null() {
                        updated.remove(&field);
                    } else {
                        updated.insert(field, value);
                    }
                }
                out.push((doc_id, existing, updated));
            }
            out
        };

        {
            let mut collection = handle.collection_mut();
            let mut indexes = handle.indexes_mut();
            for (doc_id, old_doc, new_doc) in &prepared {
                collection.documents.insert(*doc_id, new_doc.clone());
                indexes.update_for_document(*doc_id, Some(old_doc), Some(new_doc));
            }
        }

        let doc_count = handle.collection().documents.len();
        let trigger = prepared.last().map(|(id, _, doc)| (*id, doc.clone()));
        self.finish_write(coll, doc_count, trigger);

        Ok(prepared.into_iter().map(|(_, _, doc)| doc).collect())
    }

    // ---- façade: query, pagination, streaming ------------------------------------

    pub fn find_all(&self, coll: &str, filter: Filter, pagination: PaginationOptions) -> Result<PaginationResult> {
        let handle = self.resolve_handle(coll, false)?;
        let matched: Vec<Document> = {
            let collection = handle.collection();
            let indexes = handle.indexes();
            match indexes.plan(&filter) {
                Some(candidates) => candidates
                    .iter()
                    .filter_map(|id| collection.documents.get(&DocId::new(id)))
                    .filter(|doc| matches(doc, &filter))
                    .cloned()
                    .collect(),
                None => collection
                    .documents
                    .values()
                    .filter(|doc| matches(doc, &filter))
                    .cloned()
                    .collect(),
            }
        };
        self.touch_access(coll);
        paginate(matched, &pagination)
    }

    /// A snapshot-streaming read (§4.6, §5): the background thread holds the
    /// collection's read lock for the lifetime of the stream, so the id set
    /// is fixed at the point the stream starts and a slow consumer applies
    /// backpressure to that lock rather than to the rest of the engine.
    pub fn find_all_stream(&self, coll: &str, filter: Filter) -> Result<crossbeam::channel::Receiver<Document>> {
        let handle = self.resolve_handle(coll, false)?;
        let (sender, receiver) = crossbeam::channel::bounded(STREAM_CHANNEL_CAPACITY);
        let shutdown = self.inner.shutdown.clone();

        std::thread::spawn(move || {
            let collection = handle.collection();
            for doc in collection.documents.values() {
                if shutdown.is_triggered() {
                    break;
                }
                if matches(doc, &filter) && sender.send(doc.clone()).is_err() {
                    break;
                }
            }
        });

        Ok(receiver)
    }

    // ---- façade: indexes ----------------------------------------------------------

    pub fn create_index(&self, coll: &str, field: &str) -> Result<()> {
        let handle = self.resolve_handle(coll, false)?;
        let collection = handle.collection();
        handle.indexes_mut().create_index(field, &collection.documents);
        Ok(())
    }

    pub fn drop_index(&self, coll: &str, field: &str) -> Result<()> {
        let handle = self.resolve_handle(coll, false)?;
        handle.indexes_mut().drop_index(field)
    }

    pub fn find_by_index(&self, coll: &str, field: &str, value: Value) -> Result<Vec<Document>> {
        let handle = self.resolve_handle(coll, false)?;
        let docs = {
            let collection = handle.collection();
            let indexes = handle.indexes();
            indexes
                .query(field, &value)
                .iter()
                .filter_map(|id| collection.documents.get(&DocId::new(id)).cloned())
                .collect()
        };
        self.touch_access(coll);
        Ok(docs)
    }

    pub fn get_indexes(&self, coll: &str) -> Result<Vec<String>> {
        let handle = self.resolve_handle(coll, false)?;
        Ok(handle.indexes().get_indexes())
    }

    pub fn update_index(&self, coll: &str, field: &str) -> Result<()> {
        let handle = self.resolve_handle(coll, false)?;
        let collection = handle.collection();
        handle.indexes_mut().build(field, &collection.documents);
        Ok(())
    }

    // ---- façade: diagnostics --------------------------------------------------------

    fn active_worker_count(&self) -> usize {
        let workers = self.inner.workers.lock();
        [&workers.background_save, &workers.retry]
            .iter()
            .filter(|w| w.is_some())
            .count()
    }

    pub fn memory_stats(&self) -> MemoryStats {
        let names: Vec<String> = self.inner.metadata.read().keys().cloned().collect();
        let collection_count = names.len();
        let system_bytes: u64 = {
            let meta = self.inner.metadata.read();
            meta.values().map(|info| info.size_bytes).sum()
        };
        let alloc_bytes: u64 = names
            .iter()
            .filter_map(|name| self.inner.cache.get(name))
            .map(|handle| {
                handle
                    .collection()
                    .documents
                    .values()
                    .map(estimate_document_size)
                    .sum::<usize>() as u64
            })
            .sum();

        MemoryStats {
            alloc_bytes,
            total_alloc_bytes: alloc_bytes,
            system_bytes,
            active_worker_count: self.active_worker_count(),
            cache_size: self.inner.cache.len(),
            collection_count,
        }
    }

    pub fn engine_stats(&self) -> EngineStats {
        let meta = self.inner.metadata.read();
        EngineStats {
            uptime_secs: self.inner.start_time.elapsed().as_secs(),
            collection_count: meta.len(),
            total_documents: meta.values().map(|info| info.document_count).sum(),
            cache_size: self.inner.cache.len(),
            active_worker_count: self.active_worker_count(),
        }
    }

    pub fn health_check(&self) -> HealthCheckResult {
        let mut checks = Vec::new();

        let metadata_start = Instant::now();
        let _ = self.inner.metadata.read();
        checks.push(HealthCheck {
            name: "metadata_lock".to_string(),
            status: HealthStatus::Healthy,
            message: None,
            latency_ms: metadata_start.elapsed().as_millis() as u64,
        });

        let worker_start = Instant::now();
        let worker_status = if self.inner.config.save_mode == SaveMode::BackgroundSave
            && self.inner.workers.lock().background_save.is_none()
        {
            HealthStatus::Degraded("background save enabled but worker is not running".to_string())
        } else {
            HealthStatus::Healthy
        };
        checks.push(HealthCheck {
            name: "background_worker".to_string(),
            status: worker_status,
            message: None,
            latency_ms: worker_start.elapsed().as_millis() as u64,
        });

        let overall = if checks.iter().all(|c| c.status.is_healthy()) {
            HealthStatus::Healthy
        } else if checks
            .iter()
            .any(|c| matches!(c.status, HealthStatus::Unhealthy(_)))
        {
            HealthStatus::Unhealthy("one or more health checks failed".to_string())
        } else {
            HealthStatus::Degraded("one or more health checks degraded".to_string())
        };

        HealthCheckResult {
            status: overall,
            checks,
            timestamp: chrono::Utc::now(),
        }
    }

    // ---- façade: whole-database save/load ---------------------------------------

    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let names: Vec<String> = self.inner.metadata.read().keys().cloned().collect();
        let mut collections = HashMap::new();
        for name in names {
            if let Some(handle) = self.inner.cache.get(&name) {
                let docs = handle.collection().documents.clone();
                let fields = handle.indexes().get_indexes();
                collections.insert(name, (docs, fields));
            }
        }
        self.inner.persistence.save_whole_db(path.as_ref(), &collections)
    }

    pub fn load_metadata(&self, path: impl AsRef<Path>) -> Result<()> {
        let infos = self.inner.persistence.load_metadata(path.as_ref())?;
        let mut meta = self.inner.metadata.write();
        for info in infos {
            meta.entry(info.name.clone()).or_insert(info);
        }
        Ok(())
    }

    // ---- façade: lifecycle ---------------------------------------------------------

    pub fn start_background_workers(&self) {
        let mut workers = self.inner.workers.lock();
        if workers.retry.is_none() {
            let inner = self.inner.clone();
            workers.retry = Some(std::thread::spawn(move || retry_worker_loop(&inner)));
            println!("[worker] retry worker started");
        }
        if self.inner.config.save_mode == SaveMode::BackgroundSave && workers.background_save.is_none() {
            let inner = self.inner.clone();
            let interval = self.inner.config.background_save_interval;
            workers.background_save = Some(std::thread::spawn(move || background_save_loop(&inner, interval)));
            println!("[worker] background-save worker started (interval={interval:?})");
        }
    }

    /// Idempotent (§4.6, §8): a second call after workers have already
    /// stopped is a no-op.
    pub fn stop_background_workers(&self) {
        self.inner.shutdown.trigger();
        let mut workers = self.inner.workers.lock();
        if let Some(handle) = workers.background_save.take() {
            let _ = handle.join();
        }
        if let Some(handle) = workers.retry.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for StorageEngine {
    fn drop(&mut self) {
        self.stop_background_workers();
    }
}

fn parse_doc_id(id: &str) -> Result<DocId> {
    if id.is_empty() {
        return Err(Error::invalid_argument("document id must not be empty"));
    }
    DocId::parse(id).ok_or_else(|| Error::invalid_argument(format!("invalid document id '{id}'")))
}

fn flush_collection(inner: &EngineInner, name: &str) -> Result<()> {
    let handle = match inner.cache.get(name) {
        Some(handle) => handle,
        None => return Ok(()),
    };
    let (documents, fields) = {
        let collection = handle.collection();
        let indexes = handle.indexes();
        (collection.documents.clone(), indexes.get_indexes())
    };
    let size = inner.persistence.save_collection(name, &documents, &fields)?;
    if let Some(info) = inner.metadata.write().get_mut(name) {
        info.size_bytes = size;
        info.state = CollectionState::Loaded;
    }
    Ok(())
}

fn retry_worker_loop(inner: &EngineInner) {
    let receiver = inner.retry_queue.receiver();
    let shutdown_recv = inner.shutdown.receiver();
    loop {
        let entry = crossbeam::channel::select! {
            recv(receiver) -> msg => match msg {
                Ok(entry) => entry,
                Err(_) => break,
            },
            recv(shutdown_recv) -> _ => break,
        };
        if retry_until_done_or_shutdown(inner, entry, &shutdown_recv) {
            break;
        }
    }
}

/// Retries one entry with `(retry_count + 1) x 1s` backoff up to
/// [`MAX_RETRY_ATTEMPTS`], then drops it. Returns `true` if the shutdown
/// signal interrupted the retry (the caller should stop the worker loop).
fn retry_until_done_or_shutdown(
    inner: &EngineInner,
    mut entry: RetryEntry,
    shutdown_recv: &crossbeam::channel::Receiver<()>,
) -> bool {
    loop {
        match flush_collection(inner, &entry.collection) {
            Ok(()) => return false,
            Err(e) => {
                if entry.retry_count + 1 >= MAX_RETRY_ATTEMPTS {
                    eprintln!(
                        "[persistence] dropping retry for '{}' doc '{}' after {} attempts: {e}",
                        entry.collection, entry.id, MAX_RETRY_ATTEMPTS
                    );
                    return false;
                }
                entry.retry_count += 1;
                let backoff = entry.backoff();
                let interrupted = crossbeam::channel::select! {
                    recv(shutdown_recv) -> _ => true,
                    default(backoff) => false,
                };
                if interrupted {
                    return true;
                }
            }
        }
    }
}

fn background_save_loop(inner: &EngineInner, interval: Duration) {
    let ticker = crossbeam::channel::tick(interval);
    let shutdown_recv = inner.shutdown.receiver();
    loop {
        crossbeam::channel::select! {
            recv(ticker) -> _ => {
                let dirty: Vec<String> = inner
                    .metadata
                    .read()
                    .iter()
                    .filter(|(_, info)| info.state == CollectionState::Dirty)
                    .map(|(name, _)| name.clone())
                    .collect();
                for name in dirty {
                    if let Err(e) = flush_collection(inner, &name) {
                        eprintln!("[worker] background save failed for '{name}': {e}");
                    }
                }
            }
            recv(shutdown_recv) -> _ => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::Config;
    use crate::core::types::Value;

    fn doc(fields: &[(&str, Value)]) -> Document {
        let mut d = Document::new();
        for (k, v) in fields {
            d.insert(k.to_string(), v.clone());
        }
        d
    }

    fn engine(dir: &tempfile::TempDir) -> StorageEngine {
        StorageEngine::new(Config::new(dir.path()).no_saves(true))
    }

    #[test]
    fn insert_assigns_sequential_ids_and_find_all_paginates() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(&dir);

        engine
            .insert("users", doc(&[("name", Value::String("Alice".into())), ("age", Value::Int(25))]))
            .unwrap();
        engine
            .insert("users", doc(&[("name", Value::String("Bob".into())), ("age", Value::Int(30))]))
            .unwrap();
        engine
            .insert(
                "users",
                doc(&[("name", Value::String("Charlie".into())), ("age", Value::Int(25))]),
            )
            .unwrap();

        let mut filter = Filter::new();
        filter.insert("age".into(), Value::Int(25));
        let result = engine
            .find_all("users", filter, PaginationOptions { limit: Some(10), ..Default::default() })
            .unwrap();

        assert_eq!(result.documents.len(), 2);
        assert!(!result.has_next);
        assert_eq!(result.total, Some(2));
        let names: Vec<_> = result
            .documents
            .iter()
            .map(|d| d.get("name").unwrap().as_str().unwrap().to_string())
            .collect();
        assert!(names.contains(&"Alice".to_string()));
        assert!(names.contains(&"Charlie".to_string()));
    }

    #[test]
    fn find_by_index_matches_indexed_field() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(&dir);

        for i in 1..=10i64 {
            engine
                .insert(
                    "users",
                    doc(&[
                        ("name", Value::String(format!("user{i}"))),
                        ("age", Value::Int(i * 10)),
                    ]),
                )
                .unwrap();
        }
        engine.create_index("users", "age").unwrap();

        let results = engine.find_by_index("users", "age", Value::Int(30)).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(
            results[0].get("name"),
            Some(&Value::String("user3".to_string()))
        );
    }

    #[test]
    fn case_insensitive_filter_with_index_intersection() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(&dir);

        engine
            .insert(
                "users",
                doc(&[
                    ("name", Value::String("Alice".into())),
                    ("age", Value::Int(25)),
                    ("city", Value::String("NY".into())),
                ]),
            )
            .unwrap();
        engine
            .insert(
                "users",
                doc(&[
                    ("name", Value::String("Bob".into())),
                    ("age", Value::Int(30)),
                    ("city", Value::String("Boston".into())),
                ]),
            )
            .unwrap();
        engine
            .insert(
                "users",
                doc(&[
                    ("name", Value::String("Charlie".into())),
                    ("age", Value::Int(25)),
                    ("city", Value::String("NY".into())),
                ]),
            )
            .unwrap();

        engine.create_index("users", "age").unwrap();
        engine.create_index("users", "city").unwrap();

        let mut filter = Filter::new();
        filter.insert("age".into(), Value::Int(25));
        filter.insert("city".into(), Value::String("ny".into()));
        let result = engine
            .find_all("users", filter, PaginationOptions::default())
            .unwrap();

        let names: Vec<_> = result
            .documents
            .iter()
            .map(|d| d.get("name").unwrap().as_str().unwrap().to_string())
            .collect();
        assert_eq!(names.len(), 2);
        assert!(names.contains(&"Alice".to_string()));
        assert!(names.contains(&"Charlie".to_string()));
    }

    #[test]
    fn save_and_reload_collection_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        {
            let engine = StorageEngine::new(Config::new(dir.path()));
            engine
                .insert("users", doc(&[("name", Value::String("Alice".into()))]))
                .unwrap();
            engine
                .insert("users", doc(&[("name", Value::String("Bob".into()))]))
                .unwrap();
        }

        let engine = StorageEngine::new(Config::new(dir.path()));
        engine.load_metadata(dir.path().join("db.godb")).unwrap();
        let docs = engine.get_collection("users").unwrap();
        assert_eq!(docs.len(), 2);

        let inserted = engine
            .insert("users", doc(&[("name", Value::String("Charlie".into()))]))
            .unwrap();
        assert_eq!(inserted.get(ID_FIELD), Some(&Value::String("2".to_string())));
    }

    #[test]
    fn batch_update_is_atomic_on_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(&dir);
        engine.insert("users", doc(&[("x", Value::Int(1))])).unwrap();
        engine.insert("users", doc(&[("x", Value::Int(2))])).unwrap();

        let before_1 = engine.get_by_id("users", "0").unwrap();
        let before_2 = engine.get_by_id("users", "1").unwrap();

        let err = engine
            .batch_update(
                "users",
                vec![
                    ("0".into(), doc(&[("x", Value::Int(100))])),
                    ("999".into(), doc(&[("x", Value::Int(200))])),
                    ("1".into(), doc(&[("x", Value::Int(300))])),
                ],
            )
            .unwrap_err();
        assert_eq!(err.kind, crate::core::error::ErrorKind::NotFound);

        assert_eq!(engine.get_by_id("users", "0").unwrap(), before_1);
        assert_eq!(engine.get_by_id("users", "1").unwrap(), before_2);
    }

    #[test]
    fn batch_insert_rejects_over_max_size_without_creating_collection() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(&dir);
        let docs: Vec<Document> = (0..1001).map(|_| Document::new()).collect();
        assert!(engine.batch_insert("ghost", docs).is_err());
        assert!(engine.get_collection("ghost").is_err());
    }

    #[test]
    fn batch_insert_exactly_at_max_size_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(&dir);
        let docs: Vec<Document> = (0..1000).map(|_| Document::new()).collect();
        assert_eq!(engine.batch_insert("users", docs).unwrap().len(), 1000);
    }

    #[test]
    fn streaming_empty_collection_closes_with_no_emissions() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(&dir);
        engine.create_collection("empty").unwrap();
        let receiver = engine.find_all_stream("empty", Filter::new()).unwrap();
        assert!(receiver.iter().next().is_none());
    }

    #[test]
    fn update_by_id_with_empty_patch_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(&dir);
        let inserted = engine
            .insert("users", doc(&[("name", Value::String("Alice".into()))]))
            .unwrap();
        let id = doc_id_of(&inserted).unwrap().to_string();

        let updated = engine.update_by_id("users", &id, Document::new()).unwrap();
        assert_eq!(updated, inserted);
    }

    #[test]
    fn stop_background_workers_twice_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(&dir);
        engine.start_background_workers();
        engine.stop_background_workers();
        engine.stop_background_workers();
    }

    #[test]
    fn create_collection_rejects_duplicate_name() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(&dir);
        engine.create_collection("users").unwrap();
        let err = engine.create_collection("users").unwrap_err();
        assert_eq!(err.kind, crate::core::error::ErrorKind::AlreadyExists);
    }

    /// A failed synchronous flush (here, `collections/` can't be created
    /// because a plain file already occupies that path) must not fail the
    /// mutation: the insert succeeds in memory and the write is handed to the
    /// retry queue. Once the obstruction is cleared, replaying the queued
    /// entry through `flush_collection` succeeds and the document is on disk.
    #[test]
    fn dual_write_failure_falls_back_to_retry_queue() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("collections"), b"not a directory").unwrap();

        let engine = StorageEngine::new(Config::new(dir.path()));
        let inserted = engine
            .insert("users", doc(&[("name", Value::String("Alice".into()))]))
            .unwrap();

        let receiver = engine.inner.retry_queue.receiver();
        let entry = receiver.try_recv().expect("flush failure must queue a retry");
        assert_eq!(entry.collection, "users");
        assert_eq!(entry.doc.get("name"), inserted.get("name"));

        std::fs::remove_file(dir.path().join("collections")).unwrap();
        flush_collection(&engine.inner, "users").unwrap();

        let reloaded = PersistenceManager::new(dir.path())
            .load_collection("users")
            .unwrap()
            .expect("collection should now be on disk");
        assert_eq!(reloaded.0.documents.len(), 1);
    }
}
