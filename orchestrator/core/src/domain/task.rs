// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Task Domain Model
//!
//! Defines the [`TaskContract`] aggregate, the top-level unit of work
//! submitted to the orchestrator, and its lifecycle state machine.
//!
//! # Invariants
//!
//! - Exactly one live state-machine instance drives a given `TaskId`.
//! - Lifecycle transitions are monotonic; the only backward edge is
//!   `Validating -> Executing` for bounded repair attempts.
//! - A task never reaches `Completed` while a non-optional step in its
//!   plan is not `Succeeded`.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::errors::TaskFailure;
use crate::domain::plan::Plan;

/// Unique identifier for a [`TaskContract`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Task priority levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

impl Default for Priority {
    fn default() -> Self {
        Self::Medium
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        };
        write!(f, "{s}")
    }
}

/// Hard resource limits declared at submission time.
///
/// The admission check rejects tasks whose budget cannot possibly be
/// served; routers consume `max_attempts` and `max_latency` per step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceBudget {
    /// Maximum spend in USD across all dispatches.
    pub max_cost_usd: f64,

    /// Wall-clock deadline for any single step dispatch.
    #[serde(with = "humantime_serde")]
    pub max_latency: Duration,

    /// Retry budget per step.
    pub max_attempts: u32,
}

impl Default for ResourceBudget {
    fn default() -> Self {
        Self {
            max_cost_usd: 1.0,
            max_latency: Duration::from_secs(300),
            max_attempts: 3,
        }
    }
}

/// Lifecycle states of a task.
///
/// `Pending -> Planning -> Executing -> Validating -> Completed`, with
/// terminal `Failed` and `Cancelled` reachable from any non-terminal
/// state, and a short-circuit `Pending -> Completed` on a cache hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Pending,
    Planning,
    Executing,
    Validating,
    Completed,
    Failed,
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Legal forward edges of the lifecycle.
    ///
    /// `Validating -> Executing` is the single backward edge, used for
    /// bounded repair attempts after a validation rejection.
    pub fn can_transition_to(&self, next: TaskState) -> bool {
        use TaskState::*;
        match (self, next) {
            (Pending, Planning) => true,
            // Short-circuit on a memory-router cache hit.
            (Pending, Completed) => true,
            (Planning, Executing) => true,
            (Executing, Validating) => true,
            (Validating, Completed) => true,
            // Repair loop: re-execute offending steps with feedback.
            (Validating, Executing) => true,
            // Failure and cancellation are reachable from any live state.
            (s, Failed) if !s.is_terminal() => true,
            (s, Cancelled) if !s.is_terminal() => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Planning => "planning",
            Self::Executing => "executing",
            Self::Validating => "validating",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// Terminal outcome recorded once a task leaves its live states.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TaskOutcome {
    Completed {
        result: serde_json::Value,
        confidence: f64,
        /// True when the result was served from the memory router's
        /// cache without dispatching any work.
        from_cache: bool,
    },
    Failed { failure: TaskFailure },
    Cancelled,
}

/// Task Aggregate Root
///
/// Formal specification for one request for work: the goal, its hard
/// constraints, the resource budget, and, as the state machine drives
/// it, the resolved plan and terminal outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskContract {
    pub id: TaskId,
    pub goal: String,

    /// Hard constraints (time, cost, safety). Kept ordered so the cache
    /// fingerprint over goal + constraints is deterministic.
    #[serde(default)]
    pub constraints: BTreeMap<String, serde_json::Value>,

    /// Relevant background information.
    #[serde(default)]
    pub context: Option<String>,

    /// Conditions for successful completion, handed to the validation
    /// collaborator verbatim.
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,

    pub budget: ResourceBudget,
    pub priority: Priority,
    pub state: TaskState,

    /// Resolved step DAG; `None` until planning succeeds. Preserved on
    /// failure for audit.
    pub plan: Option<Plan>,

    /// Terminal result or error; `None` while the task is live.
    pub outcome: Option<TaskOutcome>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("goal cannot be empty or whitespace only")]
    EmptyGoal,

    #[error("illegal lifecycle transition {from} -> {to}")]
    IllegalTransition { from: TaskState, to: TaskState },
}

impl TaskContract {
    /// Create a new contract in `Pending` with validation.
    pub fn new(
        goal: impl Into<String>,
        constraints: BTreeMap<String, serde_json::Value>,
        budget: ResourceBudget,
        priority: Priority,
    ) -> Result<Self, TaskError> {
        let goal = goal.into();
        if goal.trim().is_empty() {
            return Err(TaskError::EmptyGoal);
        }
        let now = Utc::now();
        Ok(Self {
            id: TaskId::new(),
            goal,
            constraints,
            context: None,
            acceptance_criteria: Vec::new(),
            budget,
            priority,
            state: TaskState::Pending,
            plan: None,
            outcome: None,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn with_acceptance_criteria(mut self, criteria: Vec<String>) -> Self {
        self.acceptance_criteria = criteria;
        self
    }

    /// Move to `next`, enforcing lifecycle legality.
    pub fn transition_to(&mut self, next: TaskState) -> Result<(), TaskError> {
        if !self.state.can_transition_to(next) {
            return Err(TaskError::IllegalTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Record the terminal outcome alongside the matching state.
    ///
    /// Partial plan and step results accumulated so far stay on the
    /// contract for audit.
    pub fn finish(&mut self, state: TaskState, outcome: TaskOutcome) -> Result<(), TaskError> {
        debug_assert!(state.is_terminal());
        self.transition_to(state)?;
        self.outcome = Some(outcome);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contract() -> TaskContract {
        TaskContract::new(
            "summarize the incident report",
            BTreeMap::new(),
            ResourceBudget::default(),
            Priority::Medium,
        )
        .unwrap()
    }

    #[test]
    fn rejects_whitespace_goal() {
        let result = TaskContract::new(
            "   ",
            BTreeMap::new(),
            ResourceBudget::default(),
            Priority::Low,
        );
        assert!(matches!(result, Err(TaskError::EmptyGoal)));
    }

    #[test]
    fn happy_path_transitions_are_legal() {
        let mut task = contract();
        task.transition_to(TaskState::Planning).unwrap();
        task.transition_to(TaskState::Executing).unwrap();
        task.transition_to(TaskState::Validating).unwrap();
        task.transition_to(TaskState::Completed).unwrap();
        assert!(task.state.is_terminal());
    }

    #[test]
    fn short_circuit_pending_to_completed() {
        let mut task = contract();
        task.transition_to(TaskState::Completed).unwrap();
    }

    #[test]
    fn repair_loop_goes_back_to_executing() {
        let mut task = contract();
        task.transition_to(TaskState::Planning).unwrap();
        task.transition_to(TaskState::Executing).unwrap();
        task.transition_to(TaskState::Validating).unwrap();
        task.transition_to(TaskState::Executing).unwrap();
    }

    #[test]
    fn terminal_states_accept_no_transitions() {
        let mut task = contract();
        task.transition_to(TaskState::Cancelled).unwrap();
        let err = task.transition_to(TaskState::Planning);
        assert!(matches!(err, Err(TaskError::IllegalTransition { .. })));
    }

    #[test]
    fn backward_transitions_are_rejected() {
        let mut task = contract();
        task.transition_to(TaskState::Planning).unwrap();
        task.transition_to(TaskState::Executing).unwrap();
        assert!(task
            .transition_to(TaskState::Pending)
            .is_err());
    }
}
