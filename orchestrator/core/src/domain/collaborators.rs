// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! External Collaborator Contracts
//!
//! The coordination core treats workers, the planner, the validator,
//! and the content filter as external collaborators with fixed
//! contracts. Each seam is an async trait; production transports and
//! in-process test doubles implement them in `infrastructure/`.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::errors::KrakenError;
use crate::domain::plan::{Plan, StepId};
use crate::domain::task::TaskId;
use crate::domain::worker::{
    Capability, DispatchRequest, DispatchResponse, WorkerId, WorkerRecord,
};

// ============================================================================
// Worker dispatch
// ============================================================================

/// In-flight dispatch: the worker has acknowledged the request and the
/// handle resolves to its final response.
pub struct DispatchHandle {
    worker_id: WorkerId,
    rx: tokio::sync::oneshot::Receiver<Result<DispatchResponse, KrakenError>>,
}

impl DispatchHandle {
    /// Create a handle and the sender half the worker transport
    /// completes it with.
    pub fn channel(
        worker_id: WorkerId,
    ) -> (
        tokio::sync::oneshot::Sender<Result<DispatchResponse, KrakenError>>,
        Self,
    ) {
        let (tx, rx) = tokio::sync::oneshot::channel();
        (tx, Self { worker_id, rx })
    }

    pub fn worker_id(&self) -> WorkerId {
        self.worker_id
    }

    /// Await the worker's response, bounded by `deadline`. No response
    /// in time is treated identically to an explicit failure.
    pub async fn response(self, deadline: Duration) -> Result<DispatchResponse, KrakenError> {
        match tokio::time::timeout(deadline, self.rx).await {
            Err(_) => Err(KrakenError::DispatchTimeout {
                worker_id: self.worker_id,
                timeout: deadline,
            }),
            Ok(Err(_)) => Err(KrakenError::DispatchFailed {
                worker_id: self.worker_id,
                reason: "worker dropped the dispatch".to_string(),
            }),
            Ok(Ok(result)) => result,
        }
    }
}

/// Transport seam for handing a dispatch to a worker.
///
/// `dispatch` resolves once the worker has acknowledged receipt; the
/// routers bound that wait with the acknowledgment timeout and move to
/// the next-ranked candidate when it lapses.
#[async_trait]
pub trait WorkerClient: Send + Sync {
    async fn dispatch(
        &self,
        worker: &WorkerRecord,
        request: DispatchRequest,
    ) -> Result<DispatchHandle, KrakenError>;
}

// ============================================================================
// Planning collaborator
// ============================================================================

/// Request to the planning collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanRequest {
    pub task_id: TaskId,
    pub goal: String,
    pub constraints: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub context: Option<String>,
    /// Capabilities currently covered by healthy workers.
    pub catalogue: BTreeSet<Capability>,
}

/// Decomposes a goal into a step DAG, or rejects it explicitly
/// (`KrakenError::PlanningRejected`).
#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan(&self, request: PlanRequest) -> Result<Plan, KrakenError>;
}

// ============================================================================
// Validation collaborator
// ============================================================================

/// Candidate result plus the acceptance criteria it must meet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationRequest {
    pub task_id: TaskId,
    pub candidate: serde_json::Value,
    pub acceptance_criteria: Vec<String>,
}

/// Structured feedback usable for a repair attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepairFeedback {
    /// Steps whose results the validator found wanting; these are
    /// re-executed with the feedback appended to their input.
    pub offending_steps: Vec<StepId>,
    pub feedback: String,
}

/// Accept/reject verdict with confidence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationVerdict {
    pub accepted: bool,
    pub confidence: f64,
    #[serde(default)]
    pub repair: Option<RepairFeedback>,
}

/// Validates terminal results; also serves as the arbiter for
/// unresolved swarm ties.
#[async_trait]
pub trait Validator: Send + Sync {
    async fn validate(&self, request: ValidationRequest) -> Result<ValidationVerdict, KrakenError>;

    /// Pick the best of the tied candidates, returning its index. An
    /// error means the arbiter is unavailable and the caller falls back
    /// to its deterministic tie-break.
    async fn arbitrate(&self, candidates: &[serde_json::Value]) -> Result<usize, KrakenError>;
}

// ============================================================================
// Content-filtering collaborator
// ============================================================================

/// Redaction applied to every external read of shared knowledge.
#[async_trait]
pub trait ContentFilter: Send + Sync {
    async fn redact(&self, content: serde_json::Value) -> Result<serde_json::Value, KrakenError>;
}
