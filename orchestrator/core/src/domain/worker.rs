// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Worker Domain Model
//!
//! [`WorkerRecord`] tracks one registered arm: the capabilities it
//! advertises, its live load, rolling latency/success history, and its
//! heartbeat-driven health. Records are mutated only by the capability
//! registry on registration/heartbeat events and read-only everywhere
//! else; they are never hard-deleted, so routing history survives a
//! worker going away.
//!
//! The worker dispatch contract ([`DispatchRequest`] /
//! [`DispatchResponse`]) lives here too: it is the fixed boundary
//! between the coordination core and arm internals.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::plan::StepId;
use crate::domain::task::{ResourceBudget, TaskId};

/// Smoothing factor for the rolling latency / success-rate averages.
const EWMA_ALPHA: f64 = 0.2;

/// Unique identifier for a registered worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkerId(pub Uuid);

impl WorkerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for WorkerId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Declared category of work a worker can perform.
///
/// A closed enumeration rather than open-ended capability strings:
/// routing stays statically checkable while the registry still admits
/// workers at runtime.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Planning,
    Retrieval,
    CodeGeneration,
    Validation,
    ContentFilter,
    Execution,
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Planning => "planning",
            Self::Retrieval => "retrieval",
            Self::CodeGeneration => "code_generation",
            Self::Validation => "validation",
            Self::ContentFilter => "content_filter",
            Self::Execution => "execution",
        };
        write!(f, "{s}")
    }
}

/// Heartbeat-driven health of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Available,
    Unavailable,
}

/// Registry record for one worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRecord {
    pub id: WorkerId,
    pub name: String,

    /// Advertised capabilities with the version of each implementation.
    pub capabilities: BTreeMap<Capability, String>,

    /// In-flight dispatch count, reported with each heartbeat.
    pub load: u32,

    /// Rolling (exponentially weighted) dispatch latency.
    #[serde(with = "humantime_serde")]
    pub rolling_latency: Duration,

    /// Rolling success rate in `[0, 1]`; doubles as the historical
    /// accuracy prior for weighted-confidence aggregation.
    pub success_rate: f64,

    pub health: HealthStatus,
    pub last_heartbeat: DateTime<Utc>,
    pub registered_at: DateTime<Utc>,

    /// Monotonic registration sequence; the final deterministic
    /// tie-break in candidate ranking.
    pub registration_seq: u64,
}

impl WorkerRecord {
    pub fn new(
        name: impl Into<String>,
        capabilities: BTreeMap<Capability, String>,
        registration_seq: u64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: WorkerId::new(),
            name: name.into(),
            capabilities,
            load: 0,
            rolling_latency: Duration::ZERO,
            // Neutral prior until real history accumulates.
            success_rate: 0.5,
            health: HealthStatus::Available,
            last_heartbeat: now,
            registered_at: now,
            registration_seq,
        }
    }

    pub fn advertises(&self, capability: Capability) -> bool {
        self.capabilities.contains_key(&capability)
    }

    pub fn is_available(&self) -> bool {
        self.health == HealthStatus::Available
    }

    /// Apply a heartbeat: refresh the timestamp, update load, and
    /// restore availability if the worker had been marked unavailable.
    pub fn heartbeat(&mut self, load: u32, at: DateTime<Utc>) {
        self.load = load;
        self.last_heartbeat = at;
        self.health = HealthStatus::Available;
    }

    /// Fold one dispatch outcome into the rolling history.
    pub fn record_outcome(&mut self, latency: Duration, success: bool) {
        let observed = latency.as_secs_f64();
        let current = self.rolling_latency.as_secs_f64();
        let blended = if current == 0.0 {
            observed
        } else {
            EWMA_ALPHA * observed + (1.0 - EWMA_ALPHA) * current
        };
        self.rolling_latency = Duration::from_secs_f64(blended);

        let outcome = if success { 1.0 } else { 0.0 };
        self.success_rate = EWMA_ALPHA * outcome + (1.0 - EWMA_ALPHA) * self.success_rate;
    }

    /// True when the last heartbeat is older than `timeout`.
    pub fn heartbeat_expired(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        let age = now.signed_duration_since(self.last_heartbeat);
        age.to_std().map(|age| age > timeout).unwrap_or(false)
    }
}

// ============================================================================
// Worker Dispatch Contract
// ============================================================================

/// Opaque access credential forwarded with each dispatch.
///
/// Token issuance is an external concern; the core only carries the
/// credential through.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccessCredential(pub String);

/// Request handed to a worker by the capability router or the swarm
/// coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchRequest {
    pub task_id: TaskId,
    pub step_id: StepId,
    pub capability: Capability,
    pub input: serde_json::Value,
    pub budget: ResourceBudget,
    pub credential: AccessCredential,
}

/// Response returned by a worker. Absence of a response within the
/// deadline is treated identically to an explicit failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchResponse {
    pub payload: serde_json::Value,

    /// Worker's self-reported confidence in `[0, 1]`.
    pub confidence: f64,

    pub worker_id: WorkerId,
    pub produced_at: DateTime<Utc>,

    #[serde(with = "humantime_serde")]
    pub processing_duration: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> WorkerRecord {
        let mut caps = BTreeMap::new();
        caps.insert(Capability::Retrieval, "1.2.0".to_string());
        WorkerRecord::new("retriever-a", caps, 0)
    }

    #[test]
    fn advertises_only_declared_capabilities() {
        let worker = record();
        assert!(worker.advertises(Capability::Retrieval));
        assert!(!worker.advertises(Capability::Execution));
    }

    #[test]
    fn outcome_history_converges_towards_observations() {
        let mut worker = record();
        worker.record_outcome(Duration::from_millis(100), true);
        assert_eq!(worker.rolling_latency, Duration::from_millis(100));

        for _ in 0..50 {
            worker.record_outcome(Duration::from_millis(200), false);
        }
        assert!(worker.rolling_latency > Duration::from_millis(190));
        assert!(worker.success_rate < 0.01);
    }

    #[test]
    fn heartbeat_restores_availability() {
        let mut worker = record();
        worker.health = HealthStatus::Unavailable;
        worker.heartbeat(3, Utc::now());
        assert!(worker.is_available());
        assert_eq!(worker.load, 3);
    }

    #[test]
    fn heartbeat_expiry_uses_timeout() {
        let mut worker = record();
        worker.last_heartbeat = Utc::now() - chrono::Duration::seconds(90);
        assert!(worker.heartbeat_expired(Utc::now(), Duration::from_secs(30)));
        assert!(!worker.heartbeat_expired(Utc::now(), Duration::from_secs(600)));
    }
}
