//! The inverted index set maintained for one collection, plus the
//! intersection planner used by `find_all` (§4.4).
//!
//! Every collection carries an implicit `_id` index so id lookups never fall
//! back to a full scan. Indexes key on a normalized form of the value so
//! that lookups honor the §4.1 match rules (case-insensitive strings,
//! numeric widening) rather than requiring byte-identical values.

use crate::core::error::{Error, Result};
use crate::core::filter::Filter;
use crate::core::types::{DocId, Document, Value, ID_FIELD};
use roaring::RoaringTreemap;
use std::collections::HashMap;

/// Normalized, hashable form of a [`Value`] used as an index bucket key.
///
/// `Array`/`Document` values fall back to a debug-format key: two
/// structurally-equal documents built with different field insertion order
/// may hash differently since `Document` is a `HashMap`, so indexing on a
/// nested-value field can under-match. This is a known, narrow limitation —
/// every lookup's candidate set is re-checked against the full filter via
/// [`crate::core::filter::matches`], so it can only cause an indexed lookup
/// to miss a value it should have found, never a false positive.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IndexKey {
    Null,
    Bool(bool),
    Number(u64),
    String(String),
    Other(String),
}

pub fn index_key(value: &Value) -> IndexKey {
    match value {
        Value::Null => IndexKey::Null,
        Value::Bool(b) => IndexKey::Bool(*b),
        Value::Int(i) => IndexKey::Number((*i as f64).to_bits()),
        Value::Float(f) => {
            let normalized = if *f == 0.0 { 0.0 } else { *f };
            IndexKey::Number(normalized.to_bits())
        }
        Value::String(s) => {
            IndexKey::String(s.chars().flat_map(char::to_lowercase).collect())
        }
        other => IndexKey::Other(format!("{other:?}")),
    }
}

/// All indexes maintained for one collection: field name -> (value key ->
/// matching ids).
#[derive(Debug, Clone, Default)]
pub struct IndexSet {
    fields: HashMap<String, HashMap<IndexKey, RoaringTreemap>>,
}

impl IndexSet {
    pub fn new() -> Self {
        IndexSet::default()
    }

    /// Seeds a fresh index set with the implicit `_id` index, matching
    /// "every collection has an implicit `_id` index" (§3).
    pub fn with_id_index() -> Self {
        let mut set = IndexSet::new();
        set.fields.insert(ID_FIELD.to_string(), HashMap::new());
        set
    }

    pub fn has_index(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    pub fn get_indexes(&self) -> Vec<String> {
        self.fields.keys().cloned().collect()
    }

    /// Allocates an empty index for `field` and populates it from the
    /// current documents. `_id` is always present already; re-requesting it
    /// is a no-op. A user field that already has an index is rebuilt.
    pub fn create_index(&mut self, field: &str, documents: &HashMap<DocId, Document>) {
        if field == ID_FIELD && self.fields.contains_key(ID_FIELD) {
            return;
        }
        self.fields.insert(field.to_string(), HashMap::new());
        self.build(field, documents);
    }

    /// Rebuilds `field`'s index from the current documents, discarding any
    /// prior contents. Used by `create_index`, `update_index`, and on
    /// collection load (§4.5's "rebuild on load").
    pub fn build(&mut self, field: &str, documents: &HashMap<DocId, Document>) {
        let bucket = self.fields.entry(field.to_string()).or_default();
        bucket.clear();
        for (id, doc) in documents {
            if let Some(value) = doc.get(field) {
                bucket.entry(index_key(value)).or_default().insert(id.value());
            }
        }
    }

    pub fn drop_index(&mut self, field: &str) -> Result<()> {
        if self.fields.remove(field).is_none() {
            return Err(Error::not_found(format!("no index on field '{field}'")));
        }
        Ok(())
    }

    /// Returns the ids currently mapped under `value` for `field`, or an
    /// empty set if the field has no index or no document has that value.
    pub fn query(&self, field: &str, value: &Value) -> RoaringTreemap {
        self.fields
            .get(field)
            .and_then(|bucket| bucket.get(&index_key(value)))
            .cloned()
            .unwrap_or_default()
    }

    /// Synchronously maintains every index on this collection for one
    /// document mutation. `old_doc` absent means insert; `new_doc` absent
    /// means delete.
    pub fn update_for_document(
        &mut self,
        id: DocId,
        old_doc: Option<&Document>,
        new_doc: Option<&Document>,
    ) {
        for (field, bucket) in self.fields.iter_mut() {
            if let Some(old) = old_doc {
                if let Some(value) = old.get(field) {
                    let key = index_key(value);
                    if let Some(ids) = bucket.get_mut(&key) {
                        ids.remove(id.value());
                        if ids.is_empty() {
                            bucket.remove(&key);
                        }
                    }
                }
            }
            if let Some(new) = new_doc {
                if let Some(value) = new.get(field) {
                    bucket.entry(index_key(value)).or_default().insert(id.value());
                }
            }
        }
    }

    /// Plans a filter over this index set: intersects the id-sets of every
    /// filter field that has an index. Returns `None` ("no index usable")
    /// when no filter field is indexed, signaling the caller to fall back
    /// to a full scan.
    pub fn plan(&self, filter: &Filter) -> Option<RoaringTreemap> {
        let sets: Vec<RoaringTreemap> = filter
            .iter()
            .filter(|(field, _)| self.fields.contains_key(*field))
            .map(|(field, value)| self.query(field, value))
            .collect();
        if sets.is_empty() {
            return None;
        }
        Some(crate::core::filter::intersect(&sets))
    }
}
