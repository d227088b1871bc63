// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Memory Router Application Service
//!
//! Mediates every read and write between the shared structured store,
//! per-worker episodic stores, and the fast cache.
//!
//! The write path enforces the data-diode policy: workers may write
//! only their own episodic scope; shared knowledge is mutated only by
//! the task machine's result-integration step, transactionally, with an
//! optimistic-concurrency version check. A stale write is retried
//! against the fresh version, never silently overwritten.
//!
//! The read path consults the cache first by normalized fingerprint and
//! falls through to the backing store on a miss; the store is the sole
//! source of truth. External reads of shared knowledge pass through the
//! content-filtering collaborator before being returned.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::domain::collaborators::ContentFilter;
use crate::domain::errors::KrakenError;
use crate::domain::events::MemoryEvent;
use crate::domain::memory::{
    query_fingerprint, MemoryEntry, MemoryProvenance, MemoryQuery, MemoryScope, QueryKind,
};
use crate::domain::stores::{EpisodicStore, SharedStore, TtlCache};
use crate::domain::task::TaskId;
use crate::domain::worker::WorkerId;
use crate::infrastructure::event_bus::EventBus;

/// Vocabulary that pushes an unhinted query towards the shared store.
const SHARED_QUERY_KEYWORDS: &[&str] = &[
    "fact", "entity", "relationship", "knowledge", "history", "task", "shared",
];

/// Who is asking for a write; the data diode keys off this.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOrigin {
    /// The task machine's result-integration step.
    Integration { task_id: TaskId },
    /// A worker writing on its own behalf.
    Worker(WorkerId),
}

pub struct MemoryRouter {
    shared: Arc<dyn SharedStore>,
    episodic: Arc<dyn EpisodicStore>,
    cache: Arc<dyn TtlCache>,
    filter: Arc<dyn ContentFilter>,
    event_bus: Arc<EventBus>,
    cache_ttl: Duration,
    occ_max_retries: u32,
}

impl MemoryRouter {
    pub fn new(
        shared: Arc<dyn SharedStore>,
        episodic: Arc<dyn EpisodicStore>,
        cache: Arc<dyn TtlCache>,
        filter: Arc<dyn ContentFilter>,
        event_bus: Arc<EventBus>,
        cache_ttl: Duration,
        occ_max_retries: u32,
    ) -> Self {
        Self {
            shared,
            episodic,
            cache,
            filter,
            event_bus,
            cache_ttl,
            occ_max_retries,
        }
    }

    /// Classify a query as shared or episodic: the caller's hint wins;
    /// a keyword heuristic covers unhinted queries.
    pub fn classify(query: &MemoryQuery) -> QueryKind {
        if let Some(hint) = query.hint {
            return hint;
        }
        let text = query.text.to_lowercase();
        if SHARED_QUERY_KEYWORDS.iter().any(|kw| text.contains(kw)) {
            QueryKind::Shared
        } else {
            QueryKind::Episodic
        }
    }

    // ========================================================================
    // Read path
    // ========================================================================

    pub async fn read(&self, query: MemoryQuery) -> Result<Vec<MemoryEntry>, KrakenError> {
        let kind = Self::classify(&query);
        let namespace = match kind {
            QueryKind::Shared => "shared".to_string(),
            // Scope the fingerprint per worker so episodic reads never
            // collide across workers.
            QueryKind::Episodic => match query.worker_id {
                Some(worker_id) => format!("episodic:{worker_id}"),
                None => {
                    return Err(KrakenError::PolicyViolation {
                        reason: "episodic read requires a worker scope".to_string(),
                    })
                }
            },
        };
        let fingerprint = query_fingerprint(&namespace, &query.text);

        if let Some(cached) = self.cache.get(&fingerprint).await {
            debug!(fingerprint = %fingerprint, "Memory read served from cache");
            metrics::counter!("kraken_memory_cache_hits_total").increment(1);
            self.event_bus.publish_memory_event(MemoryEvent::CacheHit {
                fingerprint: fingerprint.clone(),
            });
            if let Ok(entries) = serde_json::from_value::<Vec<MemoryEntry>>(cached) {
                return Ok(entries);
            }
            // Undeserializable slot: treat as a miss and fall through.
            self.cache.invalidate_fingerprint(&fingerprint).await;
        }
        metrics::counter!("kraken_memory_cache_misses_total").increment(1);
        self.event_bus.publish_memory_event(MemoryEvent::CacheMiss {
            fingerprint: fingerprint.clone(),
        });

        let entries = match kind {
            QueryKind::Shared => {
                let raw = self.shared.search(&query.text, query.limit).await?;
                let mut redacted = Vec::with_capacity(raw.len());
                for mut entry in raw {
                    entry.content = self.filter.redact(entry.content).await?;
                    redacted.push(entry);
                }
                redacted
            }
            QueryKind::Episodic => {
                // Presence checked while building the namespace.
                let worker_id = query.worker_id.expect("episodic query has a worker scope");
                self.episodic
                    .search(worker_id, &query.text, query.limit)
                    .await?
            }
        };

        let entity_keys: Vec<String> = entries.iter().map(|e| e.entity_key.clone()).collect();
        if let Ok(value) = serde_json::to_value(&entries) {
            self.cache
                .set_with_ttl(&fingerprint, value, self.cache_ttl, &entity_keys)
                .await;
        }
        Ok(entries)
    }

    // ========================================================================
    // Write path (data diode)
    // ========================================================================

    /// Write one shared entry transactionally.
    ///
    /// Rejected outright for worker origins. Version conflicts are
    /// refreshed and retried up to the configured bound before
    /// surfacing `ConcurrentWriteConflict`.
    pub async fn write_shared(
        &self,
        origin: WriteOrigin,
        entity_key: &str,
        content: serde_json::Value,
    ) -> Result<u64, KrakenError> {
        let task_id = match origin {
            WriteOrigin::Integration { task_id } => task_id,
            WriteOrigin::Worker(worker_id) => {
                metrics::counter!("kraken_memory_policy_violations_total").increment(1);
                return Err(KrakenError::PolicyViolation {
                    reason: format!(
                        "worker {worker_id} may not write shared memory directly; \
                         shared writes go through result integration"
                    ),
                });
            }
        };

        let mut conflicts = 0u32;
        loop {
            let expected = self
                .shared
                .get(entity_key)
                .await?
                .map(|entry| entry.version)
                .unwrap_or(0);

            let entry = MemoryEntry {
                entity_key: entity_key.to_string(),
                scope: MemoryScope::Shared,
                content: content.clone(),
                provenance: MemoryProvenance::integration(task_id),
                version: expected,
            };

            match self.shared.compare_and_swap(expected, entry).await {
                Ok(version) => {
                    // Eager event-based invalidation for every cached
                    // fingerprint built on this entity.
                    self.cache.invalidate_entity(entity_key).await;
                    self.event_bus
                        .publish_memory_event(MemoryEvent::SharedWriteCommitted {
                            entity_key: entity_key.to_string(),
                            version,
                        });
                    return Ok(version);
                }
                Err(KrakenError::ConcurrentWriteConflict { .. }) if conflicts < self.occ_max_retries => {
                    conflicts += 1;
                    warn!(
                        entity_key,
                        attempt = conflicts,
                        "Shared write lost a version race, retrying against fresh version"
                    );
                    metrics::counter!("kraken_memory_write_conflicts_total").increment(1);
                    self.event_bus
                        .publish_memory_event(MemoryEvent::WriteConflictRetried {
                            entity_key: entity_key.to_string(),
                            attempts: conflicts,
                        });
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Append to a worker's own episodic scope.
    pub async fn write_episodic(
        &self,
        origin: WriteOrigin,
        scope_worker: WorkerId,
        entity_key: &str,
        content: serde_json::Value,
    ) -> Result<(), KrakenError> {
        // A worker may only touch its own scope; integration writes may
        // target any scope (e.g. distributing feedback).
        if let WriteOrigin::Worker(writer) = origin {
            if writer != scope_worker {
                metrics::counter!("kraken_memory_policy_violations_total").increment(1);
                return Err(KrakenError::PolicyViolation {
                    reason: format!(
                        "worker {writer} may not write episodic memory of worker {scope_worker}"
                    ),
                });
            }
        }

        let provenance = match origin {
            WriteOrigin::Worker(worker_id) => MemoryProvenance::worker(worker_id),
            WriteOrigin::Integration { task_id } => MemoryProvenance::integration(task_id),
        };
        let entry = MemoryEntry {
            entity_key: entity_key.to_string(),
            scope: MemoryScope::Episodic {
                worker_id: scope_worker,
            },
            content,
            provenance,
            version: 0,
        };
        self.episodic.append(scope_worker, entry).await?;
        self.cache.invalidate_entity(entity_key).await;
        Ok(())
    }

    // ========================================================================
    // Task-result fast path
    // ========================================================================

    /// Look up a completed result for the task fingerprint, serving the
    /// cache first and falling through to the shared store within the
    /// validity window.
    pub async fn lookup_task_result(&self, fingerprint: &str) -> Option<serde_json::Value> {
        if let Some(value) = self.cache.get(fingerprint).await {
            metrics::counter!("kraken_task_cache_hits_total").increment(1);
            self.event_bus.publish_memory_event(MemoryEvent::CacheHit {
                fingerprint: fingerprint.to_string(),
            });
            return Some(value);
        }

        // The cache is best-effort; the store remains authoritative for
        // the whole validity window.
        let entry = self.shared.get(fingerprint).await.ok().flatten()?;
        let age = chrono::Utc::now()
            .signed_duration_since(entry.provenance.recorded_at)
            .to_std()
            .ok()?;
        if age > self.cache_ttl {
            return None;
        }
        self.cache
            .set_with_ttl(
                fingerprint,
                entry.content.clone(),
                self.cache_ttl - age,
                &[fingerprint.to_string()],
            )
            .await;
        Some(entry.content)
    }

    /// Persist a completed result under the task fingerprint and prime
    /// the cache for the validity window.
    pub async fn store_task_result(
        &self,
        task_id: TaskId,
        fingerprint: &str,
        result: serde_json::Value,
    ) -> Result<u64, KrakenError> {
        let version = self
            .write_shared(
                WriteOrigin::Integration { task_id },
                fingerprint,
                result.clone(),
            )
            .await?;
        self.cache
            .set_with_ttl(
                fingerprint,
                result,
                self.cache_ttl,
                &[fingerprint.to_string()],
            )
            .await;
        Ok(version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::collaborators::PassthroughContentFilter;
    use crate::infrastructure::stores::{
        InMemoryEpisodicStore, InMemorySharedStore, InMemoryTtlCache,
    };
    use serde_json::json;

    fn router() -> MemoryRouter {
        MemoryRouter::new(
            Arc::new(InMemorySharedStore::new()),
            Arc::new(InMemoryEpisodicStore::new()),
            InMemoryTtlCache::new(),
            Arc::new(PassthroughContentFilter),
            Arc::new(EventBus::with_default_capacity()),
            Duration::from_secs(60),
            3,
        )
    }

    #[test]
    fn hint_wins_over_heuristic() {
        let mut query = MemoryQuery::shared("remember what I did yesterday");
        query.hint = Some(QueryKind::Shared);
        assert_eq!(MemoryRouter::classify(&query), QueryKind::Shared);
    }

    #[test]
    fn heuristic_routes_fact_queries_to_shared() {
        let query = MemoryQuery {
            text: "what entity owns service-x".to_string(),
            hint: None,
            worker_id: None,
            limit: 5,
        };
        assert_eq!(MemoryRouter::classify(&query), QueryKind::Shared);
    }

    #[test]
    fn heuristic_defaults_to_episodic() {
        let query = MemoryQuery {
            text: "my last three attempts".to_string(),
            hint: None,
            worker_id: Some(WorkerId::new()),
            limit: 5,
        };
        assert_eq!(MemoryRouter::classify(&query), QueryKind::Episodic);
    }

    #[tokio::test]
    async fn worker_origin_cannot_write_shared() {
        let router = router();
        let err = router
            .write_shared(
                WriteOrigin::Worker(WorkerId::new()),
                "svc-x",
                json!({"owner": "mallory"}),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, KrakenError::PolicyViolation { .. }));
    }

    #[tokio::test]
    async fn worker_cannot_write_another_workers_episodic_scope() {
        let router = router();
        let err = router
            .write_episodic(
                WriteOrigin::Worker(WorkerId::new()),
                WorkerId::new(),
                "notes",
                json!("sneaky"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, KrakenError::PolicyViolation { .. }));
    }

    #[tokio::test]
    async fn integration_write_survives_version_races() {
        let router = router();
        let task_id = TaskId::new();

        // Two writers race on the same entity; both must land, versions
        // strictly increasing.
        let v1 = router
            .write_shared(
                WriteOrigin::Integration { task_id },
                "svc-x",
                json!({"owner": "alice"}),
            )
            .await
            .unwrap();
        let v2 = router
            .write_shared(
                WriteOrigin::Integration { task_id },
                "svc-x",
                json!({"owner": "bob"}),
            )
            .await
            .unwrap();
        assert!(v2 > v1);
    }

    #[tokio::test]
    async fn task_result_round_trip_within_window() {
        let router = router();
        let task_id = TaskId::new();
        router
            .store_task_result(task_id, "kraken:task:abc", json!({"answer": 42}))
            .await
            .unwrap();

        let hit = router.lookup_task_result("kraken:task:abc").await;
        assert_eq!(hit, Some(json!({"answer": 42})));
        assert_eq!(router.lookup_task_result("kraken:task:other").await, None);
    }

    #[tokio::test]
    async fn shared_write_invalidates_cached_reads() {
        let router = router();
        let task_id = TaskId::new();
        router
            .write_shared(
                WriteOrigin::Integration { task_id },
                "svc-x",
                json!({"owner": "alice", "tags": ["payments"]}),
            )
            .await
            .unwrap();

        // Prime the read cache.
        let query = MemoryQuery::shared("svc-x owner");
        let first = router.read(query.clone()).await.unwrap();
        assert_eq!(first.len(), 1);

        // A new write to the same entity must evict the cached read.
        router
            .write_shared(
                WriteOrigin::Integration { task_id },
                "svc-x",
                json!({"owner": "carol", "tags": ["payments"]}),
            )
            .await
            .unwrap();

        let second = router.read(query).await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].content["owner"], json!("carol"));
    }
}
