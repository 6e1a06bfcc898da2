//! `godb`: an in-memory document database with durable, per-collection
//! on-disk persistence.
//!
//! Documents are schemaless field maps grouped into named collections
//! ([`collection`]). The [`engine::StorageEngine`] façade is the crate's
//! single public entry point: CRUD and batch operations, equality-filtered
//! queries accelerated by the per-field [`index`] subsystem, pagination
//! ([`pagination`]), and snapshot streaming. Durability is handled by
//! [`persistence`] against the compressed binary [`codec`]; concurrency is
//! coordinated by the three-level lock hierarchy in [`concurrency`] and the
//! bounded LRU [`cache`] of loaded collections.
//!
//! The HTTP surface, CLI entry point, and load-test client that would sit in
//! front of this engine are out of scope for this crate — it exposes the
//! library surface they would bind to.

pub mod cache;
pub mod codec;
pub mod collection;
pub mod concurrency;
pub mod core;
pub mod engine;
pub mod index;
pub mod pagination;
pub mod persistence;

pub use collection::{Collection, CollectionInfo, CollectionState};
pub use core::config::{Config, SaveMode};
pub use core::error::{Error, ErrorKind, Result};
pub use core::filter::Filter;
pub use core::types::{DocId, Document, FieldMap, Value, ID_FIELD};
pub use engine::StorageEngine;
pub use pagination::{Cursor, PaginationOptions, PaginationResult};
