// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Store Interfaces
//!
//! Abstract contracts over the shared structured store, the per-worker
//! episodic store, and the fast cache. The backing store is the sole
//! source of truth; the cache is a best-effort accelerator and any miss
//! must be resolvable by falling through to the store. In-memory
//! implementations live in `infrastructure/`; real engines are out of
//! scope.

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::errors::KrakenError;
use crate::domain::memory::MemoryEntry;
use crate::domain::worker::WorkerId;

/// Shared structured knowledge with per-entity optimistic-concurrency
/// versioning.
#[async_trait]
pub trait SharedStore: Send + Sync {
    /// Fetch one entity's current entry, if present.
    async fn get(&self, entity_key: &str) -> Result<Option<MemoryEntry>, KrakenError>;

    /// Search entries whose content matches the query text; plain
    /// relevance order, bounded by `limit`.
    async fn search(&self, text: &str, limit: usize) -> Result<Vec<MemoryEntry>, KrakenError>;

    /// Write `entry` if the entity's current version equals
    /// `expected_version` (0 for a fresh entity). Returns the new
    /// version, or `ConcurrentWriteConflict` carrying the version
    /// actually found.
    async fn compare_and_swap(
        &self,
        expected_version: u64,
        entry: MemoryEntry,
    ) -> Result<u64, KrakenError>;
}

/// Per-worker episodic records, read by similarity query and written
/// append-only within one worker's scope.
#[async_trait]
pub trait EpisodicStore: Send + Sync {
    async fn append(&self, worker_id: WorkerId, entry: MemoryEntry) -> Result<(), KrakenError>;

    async fn search(
        &self,
        worker_id: WorkerId,
        text: &str,
        limit: usize,
    ) -> Result<Vec<MemoryEntry>, KrakenError>;
}

/// Fast fingerprint-keyed cache with TTL expiry and event-based
/// invalidation by entity.
#[async_trait]
pub trait TtlCache: Send + Sync {
    async fn get(&self, fingerprint: &str) -> Option<serde_json::Value>;

    /// Store a value under `fingerprint` for `ttl`, recording the
    /// entity keys whose writes must eagerly invalidate it.
    async fn set_with_ttl(
        &self,
        fingerprint: &str,
        value: serde_json::Value,
        ttl: Duration,
        entity_keys: &[String],
    );

    async fn invalidate_fingerprint(&self, fingerprint: &str);

    /// Eager invalidation: drop every cached fingerprint that depends
    /// on the written entity.
    async fn invalidate_entity(&self, entity_key: &str);
}
