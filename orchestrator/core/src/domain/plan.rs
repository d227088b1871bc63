// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Plan Domain Model
//!
//! A [`Plan`] is the step DAG resolved for a task by the planning
//! collaborator. Plans are validated before execution begins: the
//! dependency graph must be acyclic, every dependency must reference a
//! declared step, and every required capability must be covered by the
//! live capability catalogue. A violation fails the task with a
//! specific error before any execution side effects.
//!
//! # Invariants
//!
//! - A step may begin only when all of its dependencies are `Succeeded`.
//! - A cyclic plan never reaches the running state.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::errors::KrakenError;
use crate::domain::worker::{Capability, WorkerId};

/// Unique identifier for a step within a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StepId(pub Uuid);

impl StepId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for StepId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for StepId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Execution status of a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Queued,
    Dispatched,
    Running,
    Succeeded,
    Failed,
    Retrying,
}

/// Explicit retry data evaluated by the routers.
///
/// Retry behavior is plain data, not exception-driven control flow, so
/// it stays inspectable and testable independent of transport.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,

    #[serde(with = "humantime_serde")]
    pub initial_backoff: Duration,

    pub backoff_multiplier: f64,

    #[serde(with = "humantime_serde")]
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
            backoff_multiplier: 2.0,
            max_backoff: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Backoff delay before the given attempt (attempt 1 is the first
    /// retry). Exponential, capped at `max_backoff`.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let exp = self.backoff_multiplier.powi(attempt.saturating_sub(1) as i32);
        let delay = self.initial_backoff.as_secs_f64() * exp;
        Duration::from_secs_f64(delay.min(self.max_backoff.as_secs_f64()))
    }
}

/// Reconciliation strategy for a swarm-flagged step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationStrategy {
    MajorityVote,
    BordaCount,
    WeightedConfidence,
}

/// Fan-out configuration for a swarm-flagged step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SwarmSpec {
    /// Number of distinct workers to dispatch to. Three or more makes
    /// voting meaningful.
    pub fan_out: usize,
    pub strategy: AggregationStrategy,
}

impl Default for SwarmSpec {
    fn default() -> Self {
        Self {
            fan_out: 3,
            strategy: AggregationStrategy::MajorityVote,
        }
    }
}

/// Audit metadata attached to every persisted step result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Provenance {
    pub worker_id: WorkerId,
    pub produced_at: DateTime<Utc>,

    #[serde(with = "humantime_serde")]
    pub latency: Duration,

    pub confidence: f64,
}

/// Result payload of a succeeded step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub payload: serde_json::Value,
    pub provenance: Provenance,

    /// Set when a swarm tie was broken without the arbiter; flags the
    /// result instead of blocking the ballot.
    #[serde(default)]
    pub reduced_confidence: bool,
}

/// One node in the task's execution plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub id: StepId,
    pub capability: Capability,
    pub input: serde_json::Value,

    #[serde(default)]
    pub depends_on: BTreeSet<StepId>,

    pub status: StepStatus,

    #[serde(default)]
    pub assigned_worker: Option<WorkerId>,

    #[serde(default)]
    pub attempts: u32,

    /// A failed optional step does not fail the task.
    #[serde(default)]
    pub optional: bool,

    /// Present when the step fans out to a swarm instead of a single
    /// worker.
    #[serde(default)]
    pub swarm: Option<SwarmSpec>,

    #[serde(default)]
    pub retry: RetryPolicy,

    #[serde(default)]
    pub result: Option<StepResult>,
}

impl Step {
    pub fn new(capability: Capability, input: serde_json::Value) -> Self {
        Self {
            id: StepId::new(),
            capability,
            input,
            depends_on: BTreeSet::new(),
            status: StepStatus::Queued,
            assigned_worker: None,
            attempts: 0,
            optional: false,
            swarm: None,
            retry: RetryPolicy::default(),
            result: None,
        }
    }

    pub fn after(mut self, dependency: StepId) -> Self {
        self.depends_on.insert(dependency);
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn with_swarm(mut self, spec: SwarmSpec) -> Self {
        self.swarm = Some(spec);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// The step DAG resolved for one task.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Plan {
    steps: Vec<Step>,
}

impl Plan {
    pub fn new(steps: Vec<Step>) -> Self {
        Self { steps }
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn step(&self, id: StepId) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == id)
    }

    pub fn step_mut(&mut self, id: StepId) -> Option<&mut Step> {
        self.steps.iter_mut().find(|s| s.id == id)
    }

    /// Validate structure before execution: non-empty, unique ids,
    /// known dependencies, acyclic, and every capability covered by the
    /// catalogue.
    pub fn validate(&self, catalogue: &BTreeSet<Capability>) -> Result<(), KrakenError> {
        if self.steps.is_empty() {
            return Err(KrakenError::EmptyPlan);
        }

        let mut seen = BTreeSet::new();
        for step in &self.steps {
            if !seen.insert(step.id) {
                return Err(KrakenError::DuplicateStep { step_id: step.id });
            }
        }

        for step in &self.steps {
            for dep in &step.depends_on {
                if *dep == step.id {
                    // Self-dependency is the degenerate one-step cycle.
                    return Err(KrakenError::CyclicDependency { step_id: step.id });
                }
                if !seen.contains(dep) {
                    return Err(KrakenError::UnknownDependency {
                        step_id: step.id,
                        dependency: *dep,
                    });
                }
            }
        }

        self.check_for_cycles()?;

        for step in &self.steps {
            if !catalogue.contains(&step.capability) {
                return Err(KrakenError::CapabilityNotCovered {
                    step_id: step.id,
                    capability: step.capability,
                });
            }
        }

        Ok(())
    }

    /// DFS cycle detection over the dependency edges.
    fn check_for_cycles(&self) -> Result<(), KrakenError> {
        fn visit(
            current: StepId,
            edges: &BTreeMap<StepId, &BTreeSet<StepId>>,
            visited: &mut BTreeSet<StepId>,
            rec_stack: &mut BTreeSet<StepId>,
        ) -> Option<StepId> {
            visited.insert(current);
            rec_stack.insert(current);

            if let Some(deps) = edges.get(&current) {
                for dep in deps.iter() {
                    if !visited.contains(dep) {
                        if let Some(offender) = visit(*dep, edges, visited, rec_stack) {
                            return Some(offender);
                        }
                    } else if rec_stack.contains(dep) {
                        return Some(*dep);
                    }
                }
            }

            rec_stack.remove(&current);
            None
        }

        let edges: BTreeMap<StepId, &BTreeSet<StepId>> =
            self.steps.iter().map(|s| (s.id, &s.depends_on)).collect();

        let mut visited = BTreeSet::new();
        let mut rec_stack = BTreeSet::new();
        for step in &self.steps {
            if !visited.contains(&step.id) {
                if let Some(offender) = visit(step.id, &edges, &mut visited, &mut rec_stack) {
                    return Err(KrakenError::CyclicDependency { step_id: offender });
                }
            }
        }
        Ok(())
    }

    /// Steps eligible for dispatch: queued or awaiting retry, with
    /// every dependency `Succeeded`.
    pub fn ready_steps(&self) -> Vec<StepId> {
        self.steps
            .iter()
            .filter(|step| {
                matches!(step.status, StepStatus::Queued | StepStatus::Retrying)
                    && step.depends_on.iter().all(|dep| {
                        self.step(*dep)
                            .map(|d| d.status == StepStatus::Succeeded)
                            .unwrap_or(false)
                    })
            })
            .map(|step| step.id)
            .collect()
    }

    /// Steps permanently blocked by a failed (optional) dependency.
    pub fn blocked_steps(&self) -> Vec<StepId> {
        self.steps
            .iter()
            .filter(|step| {
                matches!(step.status, StepStatus::Queued | StepStatus::Retrying)
                    && step.depends_on.iter().any(|dep| {
                        self.step(*dep)
                            .map(|d| d.status == StepStatus::Failed)
                            .unwrap_or(false)
                    })
            })
            .map(|step| step.id)
            .collect()
    }

    /// True once every non-optional step has succeeded.
    pub fn is_complete(&self) -> bool {
        self.steps
            .iter()
            .filter(|s| !s.optional)
            .all(|s| s.status == StepStatus::Succeeded)
    }

    /// Count of steps still live (not succeeded, not terminally failed).
    pub fn pending_count(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| !matches!(s.status, StepStatus::Succeeded | StepStatus::Failed))
            .count()
    }

    /// Merge the succeeded steps' payloads keyed by step id: the
    /// candidate result handed to the validation collaborator.
    pub fn collect_results(&self) -> serde_json::Value {
        let map: serde_json::Map<String, serde_json::Value> = self
            .steps
            .iter()
            .filter_map(|s| {
                s.result
                    .as_ref()
                    .map(|r| (s.id.to_string(), r.payload.clone()))
            })
            .collect();
        serde_json::Value::Object(map)
    }

    /// Lowest confidence across succeeded steps, `1.0` for an empty set.
    pub fn aggregate_confidence(&self) -> f64 {
        self.steps
            .iter()
            .filter_map(|s| s.result.as_ref())
            .map(|r| r.provenance.confidence)
            .fold(1.0, f64::min)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn catalogue() -> BTreeSet<Capability> {
        [
            Capability::Planning,
            Capability::Retrieval,
            Capability::CodeGeneration,
            Capability::Validation,
            Capability::ContentFilter,
            Capability::Execution,
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn empty_plan_is_rejected() {
        let plan = Plan::default();
        assert!(matches!(
            plan.validate(&catalogue()),
            Err(KrakenError::EmptyPlan)
        ));
    }

    #[test]
    fn two_step_cycle_is_rejected() {
        let mut a = Step::new(Capability::Retrieval, json!({}));
        let mut b = Step::new(Capability::Execution, json!({}));
        a.depends_on.insert(b.id);
        b.depends_on.insert(a.id);
        let plan = Plan::new(vec![a, b]);
        assert!(matches!(
            plan.validate(&catalogue()),
            Err(KrakenError::CyclicDependency { .. })
        ));
    }

    #[test]
    fn self_dependency_is_a_cycle() {
        let mut a = Step::new(Capability::Retrieval, json!({}));
        a.depends_on.insert(a.id);
        let plan = Plan::new(vec![a]);
        assert!(matches!(
            plan.validate(&catalogue()),
            Err(KrakenError::CyclicDependency { .. })
        ));
    }

    #[test]
    fn unknown_dependency_is_rejected() {
        let mut a = Step::new(Capability::Retrieval, json!({}));
        a.depends_on.insert(StepId::new());
        let plan = Plan::new(vec![a]);
        assert!(matches!(
            plan.validate(&catalogue()),
            Err(KrakenError::UnknownDependency { .. })
        ));
    }

    #[test]
    fn uncovered_capability_is_rejected() {
        let plan = Plan::new(vec![Step::new(Capability::CodeGeneration, json!({}))]);
        let narrow: BTreeSet<Capability> = [Capability::Retrieval].into_iter().collect();
        assert!(matches!(
            plan.validate(&narrow),
            Err(KrakenError::CapabilityNotCovered { .. })
        ));
    }

    #[test]
    fn diamond_dag_validates_and_orders() {
        let root = Step::new(Capability::Retrieval, json!({}));
        let left = Step::new(Capability::Execution, json!({})).after(root.id);
        let right = Step::new(Capability::Execution, json!({})).after(root.id);
        let join = Step::new(Capability::Validation, json!({}))
            .after(left.id)
            .after(right.id);

        let root_id = root.id;
        let left_id = left.id;
        let right_id = right.id;
        let mut plan = Plan::new(vec![root, left, right, join]);
        plan.validate(&catalogue()).unwrap();

        // Only the root is ready at first.
        assert_eq!(plan.ready_steps(), vec![root_id]);

        plan.step_mut(root_id).unwrap().status = StepStatus::Succeeded;
        let ready = plan.ready_steps();
        assert_eq!(ready.len(), 2);
        assert!(ready.contains(&left_id) && ready.contains(&right_id));
    }

    #[test]
    fn completion_ignores_failed_optional_steps() {
        let mut required = Step::new(Capability::Execution, json!({}));
        required.status = StepStatus::Succeeded;
        let mut extra = Step::new(Capability::Retrieval, json!({})).optional();
        extra.status = StepStatus::Failed;
        let plan = Plan::new(vec![required, extra]);
        assert!(plan.is_complete());
    }

    #[test]
    fn backoff_is_exponential_and_capped() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(100),
            backoff_multiplier: 2.0,
            max_backoff: Duration::from_millis(500),
        };
        assert_eq!(policy.backoff_for(0), Duration::ZERO);
        assert_eq!(policy.backoff_for(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_for(2), Duration::from_millis(200));
        assert_eq!(policy.backoff_for(3), Duration::from_millis(400));
        assert_eq!(policy.backoff_for(4), Duration::from_millis(500));
    }
}
