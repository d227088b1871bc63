// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Capability Registry Application Service
//!
//! Tracks which workers exist, what capabilities they advertise, and
//! their live load/health. Records are mutated only here, by
//! registration, heartbeat, and outcome events, and read-only by the
//! routers. Workers are never hard-deleted; a stale worker is marked
//! unavailable by the health sweep and kept for audit.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::domain::errors::KrakenError;
use crate::domain::events::WorkerEvent;
use crate::domain::worker::{Capability, HealthStatus, WorkerId, WorkerRecord};
use crate::infrastructure::event_bus::EventBus;

pub struct CapabilityRegistry {
    workers: tokio::sync::RwLock<HashMap<WorkerId, WorkerRecord>>,
    registration_seq: AtomicU64,
    heartbeat_timeout: Duration,
    event_bus: Arc<EventBus>,
}

impl CapabilityRegistry {
    pub fn new(heartbeat_timeout: Duration, event_bus: Arc<EventBus>) -> Self {
        Self {
            workers: tokio::sync::RwLock::new(HashMap::new()),
            registration_seq: AtomicU64::new(0),
            heartbeat_timeout,
            event_bus,
        }
    }

    /// Register a worker and return its identity.
    pub async fn register(
        &self,
        name: impl Into<String>,
        capabilities: BTreeMap<Capability, String>,
    ) -> WorkerId {
        let seq = self.registration_seq.fetch_add(1, Ordering::SeqCst);
        let record = WorkerRecord::new(name, capabilities, seq);
        let worker_id = record.id;

        info!(
            worker_id = %worker_id,
            name = %record.name,
            capabilities = ?record.capabilities.keys().collect::<Vec<_>>(),
            "Worker registered"
        );
        self.event_bus.publish_worker_event(WorkerEvent::WorkerRegistered {
            worker_id,
            capabilities: record.capabilities.keys().copied().collect(),
            registered_at: record.registered_at,
        });
        metrics::counter!("kraken_workers_registered_total").increment(1);

        self.workers.write().await.insert(worker_id, record);
        worker_id
    }

    /// Apply a heartbeat: refresh liveness and load.
    pub async fn heartbeat(&self, worker_id: WorkerId, load: u32) -> Result<(), KrakenError> {
        let mut workers = self.workers.write().await;
        let record = workers
            .get_mut(&worker_id)
            .ok_or(KrakenError::DispatchFailed {
                worker_id,
                reason: "heartbeat from unregistered worker".to_string(),
            })?;
        record.heartbeat(load, Utc::now());
        self.event_bus
            .publish_worker_event(WorkerEvent::WorkerHeartbeat { worker_id, load });
        Ok(())
    }

    /// Fold a dispatch outcome into the worker's rolling history.
    pub async fn record_outcome(&self, worker_id: WorkerId, latency: Duration, success: bool) {
        let mut workers = self.workers.write().await;
        if let Some(record) = workers.get_mut(&worker_id) {
            record.record_outcome(latency, success);
        }
    }

    /// Healthy workers advertising `capability`, unranked.
    pub async fn candidates(&self, capability: Capability) -> Vec<WorkerRecord> {
        let workers = self.workers.read().await;
        workers
            .values()
            .filter(|w| w.is_available() && w.advertises(capability))
            .cloned()
            .collect()
    }

    /// Capabilities currently covered by at least one healthy worker:
    /// the catalogue handed to the planner and to plan validation.
    pub async fn catalogue(&self) -> BTreeSet<Capability> {
        let workers = self.workers.read().await;
        workers
            .values()
            .filter(|w| w.is_available())
            .flat_map(|w| w.capabilities.keys().copied())
            .collect()
    }

    pub async fn get(&self, worker_id: WorkerId) -> Option<WorkerRecord> {
        self.workers.read().await.get(&worker_id).cloned()
    }

    /// Historical success-rate priors keyed by worker, consumed by
    /// weighted-confidence aggregation.
    pub async fn success_priors(&self) -> HashMap<WorkerId, f64> {
        let workers = self.workers.read().await;
        workers.values().map(|w| (w.id, w.success_rate)).collect()
    }

    /// Mark workers with expired heartbeats unavailable. Returns how
    /// many were transitioned.
    pub async fn sweep(&self) -> usize {
        let now = Utc::now();
        let mut swept = 0;
        let mut workers = self.workers.write().await;
        for record in workers.values_mut() {
            if record.health == HealthStatus::Available
                && record.heartbeat_expired(now, self.heartbeat_timeout)
            {
                warn!(
                    worker_id = %record.id,
                    last_heartbeat = %record.last_heartbeat,
                    "Worker missed heartbeat threshold, marking unavailable"
                );
                record.health = HealthStatus::Unavailable;
                self.event_bus
                    .publish_worker_event(WorkerEvent::WorkerUnavailable {
                        worker_id: record.id,
                        last_heartbeat: record.last_heartbeat,
                    });
                swept += 1;
            }
        }
        if swept > 0 {
            metrics::counter!("kraken_workers_swept_total").increment(swept as u64);
        } else {
            debug!("Health sweep found no stale workers");
        }
        swept
    }

    /// Spawn the periodic health sweep.
    pub fn start_sweeper(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                registry.sweep().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(capability: Capability) -> BTreeMap<Capability, String> {
        let mut map = BTreeMap::new();
        map.insert(capability, "1.0.0".to_string());
        map
    }

    fn registry() -> CapabilityRegistry {
        CapabilityRegistry::new(
            Duration::from_secs(30),
            Arc::new(EventBus::with_default_capacity()),
        )
    }

    #[tokio::test]
    async fn candidates_filter_by_capability_and_health() {
        let registry = registry();
        let retriever = registry
            .register("retriever-a", caps(Capability::Retrieval))
            .await;
        registry
            .register("coder-a", caps(Capability::CodeGeneration))
            .await;

        let candidates = registry.candidates(Capability::Retrieval).await;
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].id, retriever);
    }

    #[tokio::test]
    async fn sweep_marks_stale_workers_unavailable_but_keeps_them() {
        let registry = CapabilityRegistry::new(
            Duration::from_millis(0),
            Arc::new(EventBus::with_default_capacity()),
        );
        let worker_id = registry
            .register("retriever-a", caps(Capability::Retrieval))
            .await;

        // A zero timeout makes any heartbeat stale immediately.
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(registry.sweep().await, 1);

        assert!(registry.candidates(Capability::Retrieval).await.is_empty());
        // The record survives for audit.
        let record = registry.get(worker_id).await.unwrap();
        assert_eq!(record.health, HealthStatus::Unavailable);
    }

    #[tokio::test]
    async fn heartbeat_revives_a_swept_worker() {
        let registry = CapabilityRegistry::new(
            Duration::from_millis(0),
            Arc::new(EventBus::with_default_capacity()),
        );
        let worker_id = registry
            .register("retriever-a", caps(Capability::Retrieval))
            .await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        registry.sweep().await;

        registry.heartbeat(worker_id, 2).await.unwrap();
        let record = registry.get(worker_id).await.unwrap();
        assert!(record.is_available());
        assert_eq!(record.load, 2);
    }

    #[tokio::test]
    async fn catalogue_reflects_healthy_workers_only() {
        let registry = registry();
        registry
            .register("planner-a", caps(Capability::Planning))
            .await;
        registry
            .register("coder-a", caps(Capability::CodeGeneration))
            .await;

        let catalogue = registry.catalogue().await;
        assert!(catalogue.contains(&Capability::Planning));
        assert!(catalogue.contains(&Capability::CodeGeneration));
        assert!(!catalogue.contains(&Capability::Retrieval));
    }
}
