// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Memory Domain Model
//!
//! Shared facts and per-worker episodic records flow through the memory
//! router, never directly to a store. [`MemoryEntry`] carries the owner
//! scope, a provenance stamp, and the version number used for
//! optimistic-concurrency writes to shared memory.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::domain::task::TaskId;
use crate::domain::worker::WorkerId;

/// Owner scope of a memory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum MemoryScope {
    /// Shared structured knowledge: entities, relationships, task
    /// history. Written only through the router's integration path.
    Shared,
    /// One worker's private episodic record.
    Episodic { worker_id: WorkerId },
}

/// Who/what produced a memory entry, kept for audit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MemoryProvenance {
    #[serde(default)]
    pub task_id: Option<TaskId>,
    #[serde(default)]
    pub worker_id: Option<WorkerId>,
    pub recorded_at: DateTime<Utc>,
}

impl MemoryProvenance {
    pub fn integration(task_id: TaskId) -> Self {
        Self {
            task_id: Some(task_id),
            worker_id: None,
            recorded_at: Utc::now(),
        }
    }

    pub fn worker(worker_id: WorkerId) -> Self {
        Self {
            task_id: None,
            worker_id: Some(worker_id),
            recorded_at: Utc::now(),
        }
    }
}

/// One fact or episodic record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    /// Entity key the entry describes; the unit of optimistic
    /// concurrency and of eager cache invalidation.
    pub entity_key: String,

    pub scope: MemoryScope,
    pub content: serde_json::Value,
    pub provenance: MemoryProvenance,

    /// Version/sequence number; shared writes must present the current
    /// value or be rejected with a conflict.
    pub version: u64,
}

/// Explicit classification hint supplied by memory-router callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryKind {
    Shared,
    Episodic,
}

/// A read request routed between the shared store, episodic stores, and
/// the cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryQuery {
    pub text: String,

    /// Caller classification hint; a keyword heuristic applies when
    /// absent.
    #[serde(default)]
    pub hint: Option<QueryKind>,

    /// Episodic reads are scoped to one worker.
    #[serde(default)]
    pub worker_id: Option<WorkerId>,

    pub limit: usize,
}

impl MemoryQuery {
    pub fn shared(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            hint: Some(QueryKind::Shared),
            worker_id: None,
            limit: 10,
        }
    }

    pub fn episodic(text: impl Into<String>, worker_id: WorkerId) -> Self {
        Self {
            text: text.into(),
            hint: Some(QueryKind::Episodic),
            worker_id: Some(worker_id),
            limit: 10,
        }
    }
}

/// Deterministic fingerprint of a normalized goal + constraints pair.
///
/// Normalization trims and lowercases the goal; constraints are already
/// order-stable (`BTreeMap`). The digest keys the result cache and
/// deduplicates identical requests inside the validity window.
pub fn task_fingerprint(goal: &str, constraints: &BTreeMap<String, serde_json::Value>) -> String {
    let normalized_goal = goal.trim().to_lowercase();
    let mut hasher = Sha256::new();
    hasher.update(normalized_goal.as_bytes());
    for (key, value) in constraints {
        hasher.update(b"\x1f");
        hasher.update(key.as_bytes());
        hasher.update(b"\x1e");
        hasher.update(value.to_string().as_bytes());
    }
    let digest = format!("{:x}", hasher.finalize());
    format!("kraken:task:{}", &digest[..32])
}

/// Fingerprint for an arbitrary read query, used as the cache key on
/// the memory router's read path.
pub fn query_fingerprint(namespace: &str, text: &str) -> String {
    let normalized = text.trim().to_lowercase();
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    format!("kraken:{}:{}", namespace, &digest[..32])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn fingerprint_is_deterministic_and_normalized() {
        let constraints = BTreeMap::new();
        let a = task_fingerprint("  Summarize THIS  ", &constraints);
        let b = task_fingerprint("summarize this", &constraints);
        assert_eq!(a, b);
        assert!(a.starts_with("kraken:task:"));
    }

    #[test]
    fn fingerprint_varies_with_constraints() {
        let empty = BTreeMap::new();
        let mut constrained = BTreeMap::new();
        constrained.insert("max_words".to_string(), json!(100));
        assert_ne!(
            task_fingerprint("summarize", &empty),
            task_fingerprint("summarize", &constrained)
        );
    }

    #[test]
    fn constraint_order_does_not_matter() {
        let mut ab = BTreeMap::new();
        ab.insert("a".to_string(), json!(1));
        ab.insert("b".to_string(), json!(2));
        let mut ba = BTreeMap::new();
        ba.insert("b".to_string(), json!(2));
        ba.insert("a".to_string(), json!(1));
        assert_eq!(task_fingerprint("g", &ab), task_fingerprint("g", &ba));
    }

    #[test]
    fn query_fingerprint_is_namespaced() {
        let a = query_fingerprint("shared", "who owns service-x");
        let b = query_fingerprint("episodic", "who owns service-x");
        assert_ne!(a, b);
        assert!(a.starts_with("kraken:shared:"));
    }
}
