//! The structured record carried inside every `.godb` file's compressed
//! block (§4.2). The same shape serves per-collection files and the
//! monolithic whole-database file; only how many collections populate
//! `collections` differs.
//!
//! Per the design note in §9, the on-disk `indexes` entry records only the
//! set of indexed field names per collection, not the value→ids maps
//! themselves — those are redundant with the documents and are rebuilt by
//! [`crate::index::manager::IndexSet::build`] on load.

use crate::codec::header::Header;
use crate::core::error::{Error, Result};
use crate::core::types::{DocId, Document, Value};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Payload {
    pub collections: HashMap<String, HashMap<DocId, Document>>,
    pub indexes: HashMap<String, Vec<String>>,
    pub metadata: HashMap<String, Value>,
}

impl Payload {
    pub fn new() -> Self {
        Payload::default()
    }

    /// Encodes this payload as a complete file: header followed by a single
    /// LZ4 block-compressed frame of the bincode-serialized record.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let raw = bincode::serialize(self)?;
        let compressed = lz4_flex::block::compress(&raw);

        let mut out = Vec::with_capacity(crate::codec::header::HEADER_LEN + compressed.len());
        Header::current().write(&mut out)?;
        out.extend_from_slice(&compressed);
        Ok(out)
    }

    /// Decodes a complete file produced by [`Payload::encode`]. Validates
    /// the header, then decompresses the remainder of the file as a single
    /// LZ4 block. The compressed size is simply "everything after the
    /// header"; decompression allocates a generous upper bound (10x the
    /// compressed size) and the decompressor itself returns a buffer
    /// truncated to the real uncompressed length.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut cursor = bytes;
        let _header = Header::read(&mut cursor)?;
        let compressed = &bytes[crate::codec::header::HEADER_LEN..];

        let upper_bound = (compressed.len() * 10).max(4096);
        let raw = lz4_flex::block::decompress(compressed, upper_bound)
            .map_err(|e| Error::invalid_format(format!("lz4 decompress failed: {e}")))?;

        let payload: Payload = bincode::deserialize(&raw)?;
        Ok(payload)
    }
}
