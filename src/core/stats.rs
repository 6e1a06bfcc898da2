//! Diagnostic snapshots: the `memory_stats()`/`health_check()` surface named
//! in §6 and supplemented in SPEC_FULL §10, grounded in the teacher's
//! `DatabaseStats`/`HealthCheckResult` shape but scoped to what this engine
//! actually tracks (no WAL, no query cache — this engine has neither).

use crate::core::types::{Document, Value};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Rough per-document byte estimate: field name lengths plus a per-variant
/// payload estimate plus fixed overhead. Used only for the coarse
/// `memory_stats()` allocation figure, not for anything that affects
/// correctness — mirrors the estimate the teacher computes inline in
/// `Database::add_document` before deciding whether to trigger reclamation.
pub fn estimate_document_size(doc: &Document) -> usize {
    doc.iter()
        .map(|(key, value)| key.len() + estimate_value_size(value))
        .sum::<usize>()
        + 100
}

fn estimate_value_size(value: &Value) -> usize {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Int(_) | Value::Float(_) => 8,
        Value::String(s) => s.len(),
        Value::Array(items) => items.iter().map(estimate_value_size).sum(),
        Value::Document(fields) => fields
            .iter()
            .map(|(k, v)| k.len() + estimate_value_size(v))
            .sum(),
    }
}

/// Memory/worker/cache snapshot exposed by `StorageEngine::memory_stats()` (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryStats {
    pub alloc_bytes: u64,
    pub total_alloc_bytes: u64,
    pub system_bytes: u64,
    pub active_worker_count: usize,
    pub cache_size: usize,
    pub collection_count: usize,
}

/// A point-in-time snapshot of engine-level counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineStats {
    pub uptime_secs: u64,
    pub collection_count: usize,
    pub total_documents: usize,
    pub cache_size: usize,
    pub active_worker_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum HealthStatus {
    Healthy,
    Degraded(String),
    Unhealthy(String),
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheck {
    pub name: String,
    pub status: HealthStatus,
    pub message: Option<String>,
    pub latency_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub status: HealthStatus,
    pub checks: Vec<HealthCheck>,
    pub timestamp: DateTime<Utc>,
}
