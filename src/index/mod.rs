//! Per-collection, per-field inverted indexes and the intersection-based
//! query planner (§4.4).

pub mod manager;

pub use manager::{index_key, IndexKey, IndexSet};
