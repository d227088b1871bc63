// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! In-Memory Store Implementations
//!
//! Reference implementations of the store interfaces for in-process
//! deployments and tests. Real engines (Postgres, a vector store,
//! Redis) plug in behind the same traits.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;

use crate::domain::errors::KrakenError;
use crate::domain::memory::MemoryEntry;
use crate::domain::stores::{EpisodicStore, SharedStore, TtlCache};
use crate::domain::worker::WorkerId;

// ============================================================================
// Shared store
// ============================================================================

/// Versioned entity arena behind the shared-knowledge interface.
#[derive(Default)]
pub struct InMemorySharedStore {
    entries: tokio::sync::RwLock<HashMap<String, MemoryEntry>>,
}

impl InMemorySharedStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SharedStore for InMemorySharedStore {
    async fn get(&self, entity_key: &str) -> Result<Option<MemoryEntry>, KrakenError> {
        Ok(self.entries.read().await.get(entity_key).cloned())
    }

    async fn search(&self, text: &str, limit: usize) -> Result<Vec<MemoryEntry>, KrakenError> {
        let entries = self.entries.read().await;
        let mut scored: Vec<(usize, MemoryEntry)> = entries
            .values()
            .filter_map(|entry| {
                let score = token_overlap(text, &entry_text(entry));
                (score > 0).then(|| (score, entry.clone()))
            })
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0));
        scored.truncate(limit);
        Ok(scored.into_iter().map(|(_, e)| e).collect())
    }

    async fn compare_and_swap(
        &self,
        expected_version: u64,
        entry: MemoryEntry,
    ) -> Result<u64, KrakenError> {
        let mut entries = self.entries.write().await;
        let found = entries
            .get(&entry.entity_key)
            .map(|existing| existing.version)
            .unwrap_or(0);
        if found != expected_version {
            return Err(KrakenError::ConcurrentWriteConflict {
                entity_key: entry.entity_key.clone(),
                expected: expected_version,
                found,
            });
        }
        let new_version = expected_version + 1;
        let mut committed = entry;
        committed.version = new_version;
        entries.insert(committed.entity_key.clone(), committed);
        Ok(new_version)
    }
}

// ============================================================================
// Episodic store
// ============================================================================

/// Append-only per-worker episodic records with naive similarity
/// search (token overlap stands in for an embedding distance).
#[derive(Default)]
pub struct InMemoryEpisodicStore {
    records: tokio::sync::RwLock<HashMap<WorkerId, Vec<MemoryEntry>>>,
}

impl InMemoryEpisodicStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EpisodicStore for InMemoryEpisodicStore {
    async fn append(&self, worker_id: WorkerId, entry: MemoryEntry) -> Result<(), KrakenError> {
        self.records
            .write()
            .await
            .entry(worker_id)
            .or_default()
            .push(entry);
        Ok(())
    }

    async fn search(
        &self,
        worker_id: WorkerId,
        text: &str,
        limit: usize,
    ) -> Result<Vec<MemoryEntry>, KrakenError> {
        let records = self.records.read().await;
        let Some(entries) = records.get(&worker_id) else {
            return Ok(Vec::new());
        };
        let mut scored: Vec<(usize, MemoryEntry)> = entries
            .iter()
            .filter_map(|entry| {
                let score = token_overlap(text, &entry_text(entry));
                (score > 0).then(|| (score, entry.clone()))
            })
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0));
        scored.truncate(limit);
        Ok(scored.into_iter().map(|(_, e)| e).collect())
    }
}

// ============================================================================
// TTL cache
// ============================================================================

struct CacheSlot {
    value: serde_json::Value,
    expires_at: Instant,
    entity_keys: Vec<String>,
}

/// Fingerprint-keyed cache with passive TTL expiry and an entity index
/// for eager event-based invalidation.
pub struct InMemoryTtlCache {
    slots: DashMap<String, CacheSlot>,
    entity_index: DashMap<String, HashSet<String>>,
}

impl InMemoryTtlCache {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            slots: DashMap::new(),
            entity_index: DashMap::new(),
        })
    }
}

#[async_trait]
impl TtlCache for InMemoryTtlCache {
    async fn get(&self, fingerprint: &str) -> Option<serde_json::Value> {
        let expired = match self.slots.get(fingerprint) {
            Some(slot) if slot.expires_at > Instant::now() => return Some(slot.value.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.slots.remove(fingerprint);
        }
        None
    }

    async fn set_with_ttl(
        &self,
        fingerprint: &str,
        value: serde_json::Value,
        ttl: Duration,
        entity_keys: &[String],
    ) {
        for key in entity_keys {
            self.entity_index
                .entry(key.clone())
                .or_default()
                .insert(fingerprint.to_string());
        }
        self.slots.insert(
            fingerprint.to_string(),
            CacheSlot {
                value,
                expires_at: Instant::now() + ttl,
                entity_keys: entity_keys.to_vec(),
            },
        );
    }

    async fn invalidate_fingerprint(&self, fingerprint: &str) {
        if let Some((_, slot)) = self.slots.remove(fingerprint) {
            for key in &slot.entity_keys {
                if let Some(mut set) = self.entity_index.get_mut(key) {
                    set.remove(fingerprint);
                }
            }
        }
    }

    async fn invalidate_entity(&self, entity_key: &str) {
        let Some((_, fingerprints)) = self.entity_index.remove(entity_key) else {
            return;
        };
        for fingerprint in fingerprints {
            self.slots.remove(&fingerprint);
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn entry_text(entry: &MemoryEntry) -> String {
    format!("{} {}", entry.entity_key, entry.content)
}

fn token_overlap(query: &str, candidate: &str) -> usize {
    let query_tokens: HashSet<String> = tokens(query);
    let candidate_tokens: HashSet<String> = tokens(candidate);
    query_tokens.intersection(&candidate_tokens).count()
}

fn tokens(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::memory::{MemoryProvenance, MemoryScope};
    use crate::domain::task::TaskId;
    use serde_json::json;

    fn shared_entry(entity_key: &str, content: serde_json::Value) -> MemoryEntry {
        MemoryEntry {
            entity_key: entity_key.to_string(),
            scope: MemoryScope::Shared,
            content,
            provenance: MemoryProvenance::integration(TaskId::new()),
            version: 0,
        }
    }

    #[tokio::test]
    async fn cas_accepts_expected_version_and_increments() {
        let store = InMemorySharedStore::new();
        let v1 = store
            .compare_and_swap(0, shared_entry("svc-x", json!({"owner": "alice"})))
            .await
            .unwrap();
        assert_eq!(v1, 1);

        let v2 = store
            .compare_and_swap(1, shared_entry("svc-x", json!({"owner": "bob"})))
            .await
            .unwrap();
        assert_eq!(v2, 2);
    }

    #[tokio::test]
    async fn cas_rejects_stale_version_with_found_value() {
        let store = InMemorySharedStore::new();
        store
            .compare_and_swap(0, shared_entry("svc-x", json!({"owner": "alice"})))
            .await
            .unwrap();

        let err = store
            .compare_and_swap(0, shared_entry("svc-x", json!({"owner": "bob"})))
            .await
            .unwrap_err();
        match err {
            KrakenError::ConcurrentWriteConflict {
                expected, found, ..
            } => {
                assert_eq!(expected, 0);
                assert_eq!(found, 1);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn cache_expires_passively() {
        let cache = InMemoryTtlCache::new();
        cache
            .set_with_ttl("fp-1", json!(42), Duration::from_millis(20), &[])
            .await;
        assert_eq!(cache.get("fp-1").await, Some(json!(42)));

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(cache.get("fp-1").await, None);
    }

    #[tokio::test]
    async fn entity_write_invalidates_dependent_fingerprints() {
        let cache = InMemoryTtlCache::new();
        cache
            .set_with_ttl(
                "fp-1",
                json!("cached"),
                Duration::from_secs(60),
                &["svc-x".to_string()],
            )
            .await;
        cache
            .set_with_ttl("fp-2", json!("other"), Duration::from_secs(60), &[])
            .await;

        cache.invalidate_entity("svc-x").await;
        assert_eq!(cache.get("fp-1").await, None);
        assert_eq!(cache.get("fp-2").await, Some(json!("other")));
    }

    #[tokio::test]
    async fn episodic_search_is_scoped_per_worker() {
        let store = InMemoryEpisodicStore::new();
        let worker_a = WorkerId::new();
        let worker_b = WorkerId::new();

        let mut entry = shared_entry("deploy notes", json!("rolled back the deploy"));
        entry.scope = MemoryScope::Episodic {
            worker_id: worker_a,
        };
        store.append(worker_a, entry).await.unwrap();

        let hits = store.search(worker_a, "deploy", 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert!(store.search(worker_b, "deploy", 5).await.unwrap().is_empty());
    }
}
