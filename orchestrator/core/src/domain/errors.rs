// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Error Taxonomy
//!
//! Every failure the coordination core can surface is a variant of
//! [`KrakenError`]. Routers and the task machine consult
//! [`KrakenError::is_retryable`] before applying a step's retry policy;
//! structural faults (cyclic plan, capability gap, budget rejection) are
//! surfaced immediately without retry.

use std::time::Duration;
use thiserror::Error;

use crate::domain::plan::StepId;
use crate::domain::task::TaskId;
use crate::domain::worker::{Capability, WorkerId};

#[derive(Debug, Error)]
pub enum KrakenError {
    #[error("no healthy worker advertises capability '{capability}'")]
    NoAvailableWorker { capability: Capability },

    #[error("worker {worker_id} did not respond within {timeout:?}")]
    DispatchTimeout {
        worker_id: WorkerId,
        timeout: Duration,
    },

    #[error("worker {worker_id} reported a dispatch failure: {reason}")]
    DispatchFailed { worker_id: WorkerId, reason: String },

    #[error("validation rejected the result after {attempts} repair attempts: {feedback}")]
    ValidationRejected { attempts: u32, feedback: String },

    #[error("swarm ballot for step {step_id} closed with zero proposals")]
    SwarmNoQuorum { step_id: StepId },

    #[error("plan contains a dependency cycle through step {step_id}")]
    CyclicDependency { step_id: StepId },

    #[error("step {step_id} requires capability '{capability}' that no registered worker covers")]
    CapabilityNotCovered {
        step_id: StepId,
        capability: Capability,
    },

    #[error("plan contains no steps")]
    EmptyPlan,

    #[error("plan declares step {step_id} more than once")]
    DuplicateStep { step_id: StepId },

    #[error("step {step_id} depends on unknown step {dependency}")]
    UnknownDependency { step_id: StepId, dependency: StepId },

    #[error("version conflict writing shared entry '{entity_key}' (expected {expected}, found {found})")]
    ConcurrentWriteConflict {
        entity_key: String,
        expected: u64,
        found: u64,
    },

    #[error("memory access policy violation: {reason}")]
    PolicyViolation { reason: String },

    #[error("task budget cannot be satisfied: {reason}")]
    BudgetExceeded { reason: String },

    #[error("task {task_id} not found")]
    TaskNotFound { task_id: TaskId },

    #[error("planning collaborator rejected the goal: {reason}")]
    PlanningRejected { reason: String },

    #[error("invalid request: {reason}")]
    InvalidRequest { reason: String },

    #[error("internal error: {reason}")]
    Internal { reason: String },
}

impl KrakenError {
    /// Stable machine-readable code, exposed in task status responses
    /// and recorded on terminal failures.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NoAvailableWorker { .. } => "no_available_worker",
            Self::DispatchTimeout { .. } => "dispatch_timeout",
            Self::DispatchFailed { .. } => "dispatch_failed",
            Self::ValidationRejected { .. } => "validation_rejected",
            Self::SwarmNoQuorum { .. } => "swarm_no_quorum",
            Self::CyclicDependency { .. } => "cyclic_dependency",
            Self::CapabilityNotCovered { .. } => "capability_not_covered",
            Self::EmptyPlan => "empty_plan",
            Self::DuplicateStep { .. } => "duplicate_step",
            Self::UnknownDependency { .. } => "unknown_dependency",
            Self::ConcurrentWriteConflict { .. } => "concurrent_write_conflict",
            Self::PolicyViolation { .. } => "policy_violation",
            Self::BudgetExceeded { .. } => "budget_exceeded",
            Self::TaskNotFound { .. } => "task_not_found",
            Self::PlanningRejected { .. } => "planning_rejected",
            Self::InvalidRequest { .. } => "invalid_request",
            Self::Internal { .. } => "internal",
        }
    }

    /// Whether the retry policy may re-attempt after this failure.
    ///
    /// Transient worker and quorum faults are retryable with backoff;
    /// structural faults never are.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::NoAvailableWorker { .. }
                | Self::DispatchTimeout { .. }
                | Self::DispatchFailed { .. }
                | Self::SwarmNoQuorum { .. }
        )
    }
}

/// Serializable terminal-failure record kept on the task contract for audit.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct TaskFailure {
    /// Taxonomy code from [`KrakenError::code`].
    pub code: String,
    /// Human-readable rendering of the underlying error.
    pub message: String,
}

impl From<&KrakenError> for TaskFailure {
    fn from(err: &KrakenError) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn structural_faults_are_not_retryable() {
        let step_id = StepId(Uuid::new_v4());
        assert!(!KrakenError::CyclicDependency { step_id }.is_retryable());
        assert!(!KrakenError::BudgetExceeded {
            reason: "queue saturated".into()
        }
        .is_retryable());
        assert!(!KrakenError::CapabilityNotCovered {
            step_id,
            capability: Capability::Retrieval,
        }
        .is_retryable());
    }

    #[test]
    fn transient_faults_are_retryable() {
        let step_id = StepId(Uuid::new_v4());
        assert!(KrakenError::SwarmNoQuorum { step_id }.is_retryable());
        assert!(KrakenError::NoAvailableWorker {
            capability: Capability::Execution
        }
        .is_retryable());
    }

    #[test]
    fn failure_record_carries_taxonomy_code() {
        let err = KrakenError::EmptyPlan;
        let failure = TaskFailure::from(&err);
        assert_eq!(failure.code, "empty_plan");
    }
}
