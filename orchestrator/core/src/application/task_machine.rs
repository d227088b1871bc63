//! Task State Machine Application Service
//!
//! Owns every task's lifecycle: admission, the cache short-circuit,
//! planning, DAG execution, validation with bounded repair, result
//! integration, and cancellation. One driver future runs per task;
//! tasks share nothing but the memory router's stores, each under its
//! own concurrency discipline.
//!
//! # Execution loop
//!
//! ```text
//! submit -> admission check (no side effects on rejection)
//!        -> fingerprint lookup        (hit: PENDING -> COMPLETED)
//!        -> PLANNING   plan + validate (cycle, coverage)
//!        -> EXECUTING  dispatch ready steps concurrently
//!        -> VALIDATING accept | bounded repair -> EXECUTING
//!        -> COMPLETED  integrate results, prime cache
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::capability_router::CapabilityRouter;
use crate::application::memory_router::{MemoryRouter, WriteOrigin};
use crate::application::registry::CapabilityRegistry;
use crate::config::OrchestratorConfig;
use crate::domain::collaborators::{PlanRequest, Planner, ValidationRequest, Validator};
use crate::domain::errors::KrakenError;
use crate::domain::events::TaskEvent;
use crate::domain::memory::task_fingerprint;
use crate::domain::plan::{Step, StepId, StepResult, StepStatus};
use crate::domain::task::{
    Priority, ResourceBudget, TaskContract, TaskId, TaskOutcome, TaskState,
};
use crate::domain::worker::AccessCredential;
use crate::infrastructure::event_bus::EventBus;

// ============================================================================
// Swarm seam
// ============================================================================

/// Executes one swarm-flagged step: fan-out, bounded-deadline join, and
/// reconciliation. Implemented by the swarm crate; the core only knows
/// the seam.
#[async_trait]
pub trait SwarmExecutor: Send + Sync {
    async fn execute(
        &self,
        task_id: TaskId,
        step: &Step,
        budget: &ResourceBudget,
        credential: &AccessCredential,
    ) -> Result<StepResult, KrakenError>;
}

// ============================================================================
// Submission surface
// ============================================================================

/// Submission payload from the admission API.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SubmitTask {
    pub goal: String,
    #[serde(default)]
    pub constraints: std::collections::BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
    #[serde(default)]
    pub budget: Option<ResourceBudget>,
    #[serde(default)]
    pub priority: Option<Priority>,
}

/// Status snapshot exposed through the task API.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TaskStatusView {
    pub task_id: TaskId,
    pub state: TaskState,
    pub goal: String,
    pub priority: Priority,
    #[serde(default)]
    pub outcome: Option<TaskOutcome>,
    #[serde(default)]
    pub steps: Vec<StepStatusView>,
    pub created_at: chrono::DateTime<Utc>,
    pub updated_at: chrono::DateTime<Utc>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct StepStatusView {
    pub step_id: StepId,
    pub capability: String,
    pub status: StepStatus,
    pub attempts: u32,
    pub swarm: bool,
}

#[derive(Clone)]
struct TaskHandle {
    contract: Arc<tokio::sync::RwLock<TaskContract>>,
    cancel: CancellationToken,
}

enum ExecutionEnd {
    Completed,
    Cancelled,
}

// ============================================================================
// Application Service: TaskMachine
// ============================================================================

pub struct TaskMachine {
    config: OrchestratorConfig,
    registry: Arc<CapabilityRegistry>,
    router: Arc<CapabilityRouter>,
    swarm: Arc<dyn SwarmExecutor>,
    memory: Arc<MemoryRouter>,
    planner: Arc<dyn Planner>,
    validator: Arc<dyn Validator>,
    event_bus: Arc<EventBus>,
    tasks: tokio::sync::RwLock<HashMap<TaskId, TaskHandle>>,
}

impl TaskMachine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: OrchestratorConfig,
        registry: Arc<CapabilityRegistry>,
        router: Arc<CapabilityRouter>,
        swarm: Arc<dyn SwarmExecutor>,
        memory: Arc<MemoryRouter>,
        planner: Arc<dyn Planner>,
        validator: Arc<dyn Validator>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            config,
            registry,
            router,
            swarm,
            memory,
            planner,
            validator,
            event_bus,
            tasks: tokio::sync::RwLock::new(HashMap::new()),
        }
    }

    // ========================================================================
    // Admission / task API surface
    // ========================================================================

    /// Admit and start a task. Rejections leave no side effects: no
    /// task record, no worker dispatch, no memory write.
    pub async fn submit(self: &Arc<Self>, submit: SubmitTask) -> Result<TaskId, KrakenError> {
        let budget = submit.budget.unwrap_or_default();
        let priority = submit.priority.unwrap_or_default();

        // Admission control against the declared budget and current
        // saturation, before anything is recorded.
        let live = self.live_task_count().await;
        if live >= self.config.queue_capacity {
            metrics::counter!("kraken_tasks_rejected_total").increment(1);
            return Err(KrakenError::BudgetExceeded {
                reason: format!(
                    "task queue saturated ({live}/{} live tasks)",
                    self.config.queue_capacity
                ),
            });
        }
        if budget.max_cost_usd < self.config.min_budget_cost_usd {
            metrics::counter!("kraken_tasks_rejected_total").increment(1);
            return Err(KrakenError::BudgetExceeded {
                reason: format!(
                    "declared cost budget {} below the serviceable floor {}",
                    budget.max_cost_usd, self.config.min_budget_cost_usd
                ),
            });
        }
        if budget.max_attempts == 0 {
            metrics::counter!("kraken_tasks_rejected_total").increment(1);
            return Err(KrakenError::BudgetExceeded {
                reason: "attempt budget of zero can never dispatch a step".to_string(),
            });
        }

        let mut contract = TaskContract::new(submit.goal, submit.constraints, budget, priority)
            .map_err(|err| KrakenError::InvalidRequest {
                reason: err.to_string(),
            })?;
        if let Some(context) = submit.context {
            contract = contract.with_context(context);
        }
        contract = contract.with_acceptance_criteria(submit.acceptance_criteria);

        let task_id = contract.id;
        let handle = TaskHandle {
            contract: Arc::new(tokio::sync::RwLock::new(contract)),
            cancel: CancellationToken::new(),
        };
        self.tasks.write().await.insert(task_id, handle);

        info!(task_id = %task_id, priority = %priority, "Task admitted");
        metrics::counter!("kraken_tasks_submitted_total", "priority" => priority.to_string())
            .increment(1);
        self.event_bus.publish_task_event(TaskEvent::TaskSubmitted {
            task_id,
            priority,
            submitted_at: Utc::now(),
        });

        let machine = Arc::clone(self);
        tokio::spawn(async move {
            machine.run(task_id).await;
        });

        Ok(task_id)
    }

    /// Current lifecycle snapshot for the status endpoint.
    pub async fn status(&self, task_id: TaskId) -> Option<TaskStatusView> {
        let handle = self.handle(task_id).await?;
        let contract = handle.contract.read().await;
        let steps = contract
            .plan
            .as_ref()
            .map(|plan| {
                plan.steps()
                    .iter()
                    .map(|step| StepStatusView {
                        step_id: step.id,
                        capability: step.capability.to_string(),
                        status: step.status,
                        attempts: step.attempts,
                        swarm: step.swarm.is_some(),
                    })
                    .collect()
            })
            .unwrap_or_default();
        Some(TaskStatusView {
            task_id,
            state: contract.state,
            goal: contract.goal.clone(),
            priority: contract.priority,
            outcome: contract.outcome.clone(),
            steps,
            created_at: contract.created_at,
            updated_at: contract.updated_at,
        })
    }

    /// Request cancellation: no new dispatches; in-flight steps finish
    /// or time out and their results are discarded.
    pub async fn cancel(&self, task_id: TaskId) -> Result<(), KrakenError> {
        let handle = self
            .handle(task_id)
            .await
            .ok_or(KrakenError::TaskNotFound { task_id })?;
        {
            let contract = handle.contract.read().await;
            if contract.state.is_terminal() {
                return Ok(());
            }
        }
        info!(task_id = %task_id, "Cancellation requested");
        handle.cancel.cancel();
        Ok(())
    }

    async fn live_task_count(&self) -> usize {
        let tasks = self.tasks.read().await;
        let mut live = 0;
        for handle in tasks.values() {
            if !handle.contract.read().await.state.is_terminal() {
                live += 1;
            }
        }
        live
    }

    async fn handle(&self, task_id: TaskId) -> Option<TaskHandle> {
        self.tasks.read().await.get(&task_id).cloned()
    }

    // ========================================================================
    // Driver
    // ========================================================================

    async fn run(self: Arc<Self>, task_id: TaskId) {
        if let Err(err) = self.drive(task_id).await {
            self.fail(task_id, &err).await;
        }
    }

    async fn drive(&self, task_id: TaskId) -> Result<(), KrakenError> {
        let handle = self
            .handle(task_id)
            .await
            .ok_or(KrakenError::TaskNotFound { task_id })?;
        let cancel = handle.cancel.clone();

        if cancel.is_cancelled() {
            return self.finish_cancelled(task_id, &handle).await;
        }

        // ------------------------------------------------------------------
        // Cache short-circuit: identical requests inside the validity
        // window complete without re-dispatching any work.
        // ------------------------------------------------------------------
        let fingerprint = {
            let contract = handle.contract.read().await;
            task_fingerprint(&contract.goal, &contract.constraints)
        };
        if let Some(result) = self.memory.lookup_task_result(&fingerprint).await {
            info!(task_id = %task_id, fingerprint = %fingerprint, "Serving task from knowledge cache");
            self.event_bus
                .publish_task_event(TaskEvent::TaskShortCircuited {
                    task_id,
                    fingerprint,
                });
            return self
                .finish_completed(task_id, &handle, result, 1.0, true)
                .await;
        }

        // ------------------------------------------------------------------
        // PLANNING
        // ------------------------------------------------------------------
        self.transition(&handle, TaskState::Planning).await?;
        let plan_request = {
            let contract = handle.contract.read().await;
            PlanRequest {
                task_id,
                goal: contract.goal.clone(),
                constraints: contract.constraints.clone(),
                context: contract.context.clone(),
                catalogue: self.registry.catalogue().await,
            }
        };
        let catalogue = plan_request.catalogue.clone();
        let plan = self.planner.plan(plan_request).await?;

        // Structural faults fail the task before any execution side
        // effects; steps are never silently dropped.
        plan.validate(&catalogue)?;
        let step_count = plan.len();
        {
            let mut contract = handle.contract.write().await;
            contract.plan = Some(plan);
        }
        self.event_bus
            .publish_task_event(TaskEvent::PlanResolved { task_id, step_count });

        if cancel.is_cancelled() {
            return self.finish_cancelled(task_id, &handle).await;
        }

        // ------------------------------------------------------------------
        // EXECUTING <-> VALIDATING (bounded repair loop)
        // ------------------------------------------------------------------
        self.transition(&handle, TaskState::Executing).await?;
        let mut repair_attempts = 0u32;
        loop {
            match self.execute_plan(task_id, &handle, &cancel).await? {
                ExecutionEnd::Cancelled => {
                    return self.finish_cancelled(task_id, &handle).await;
                }
                ExecutionEnd::Completed => {}
            }
            if cancel.is_cancelled() {
                return self.finish_cancelled(task_id, &handle).await;
            }

            self.transition(&handle, TaskState::Validating).await?;
            let (candidate, criteria, confidence) = {
                let contract = handle.contract.read().await;
                let plan = contract
                    .plan
                    .as_ref()
                    .expect("plan resolved before executing");
                (
                    plan.collect_results(),
                    contract.acceptance_criteria.clone(),
                    plan.aggregate_confidence(),
                )
            };
            let verdict = self
                .validator
                .validate(ValidationRequest {
                    task_id,
                    candidate: candidate.clone(),
                    acceptance_criteria: criteria,
                })
                .await?;

            if verdict.accepted {
                self.integrate_and_cache(task_id, &handle, &fingerprint, &candidate)
                    .await?;
                return self
                    .finish_completed(task_id, &handle, candidate, confidence, false)
                    .await;
            }

            let feedback = verdict
                .repair
                .as_ref()
                .map(|r| r.feedback.clone())
                .unwrap_or_else(|| "validation rejected the candidate result".to_string());

            repair_attempts += 1;
            if repair_attempts > self.config.max_repair_attempts {
                return Err(KrakenError::ValidationRejected {
                    attempts: self.config.max_repair_attempts,
                    feedback,
                });
            }

            warn!(
                task_id = %task_id,
                attempt = repair_attempts,
                "Validation rejected result, attempting repair"
            );
            self.event_bus.publish_task_event(TaskEvent::RepairAttempted {
                task_id,
                attempt: repair_attempts,
            });

            {
                let mut contract = handle.contract.write().await;
                let plan = contract
                    .plan
                    .as_mut()
                    .expect("plan resolved before executing");
                let offenders: Vec<StepId> = verdict
                    .repair
                    .as_ref()
                    .map(|r| r.offending_steps.clone())
                    .filter(|steps| !steps.is_empty())
                    // Without structured feedback every step is suspect.
                    .unwrap_or_else(|| plan.steps().iter().map(|s| s.id).collect());
                for step_id in offenders {
                    if let Some(step) = plan.step_mut(step_id) {
                        step.status = StepStatus::Queued;
                        step.attempts = 0;
                        step.result = None;
                        apply_repair_feedback(step, &feedback);
                    }
                }
            }
            self.transition(&handle, TaskState::Executing).await?;
        }
    }

    // ========================================================================
    // Plan execution
    // ========================================================================

    async fn execute_plan(
        &self,
        task_id: TaskId,
        handle: &TaskHandle,
        cancel: &CancellationToken,
    ) -> Result<ExecutionEnd, KrakenError> {
        let credential = {
            let contract = handle.contract.read().await;
            // Credential issuance is external; the task identity is the
            // in-process stand-in forwarded to workers.
            AccessCredential(format!("task:{}", contract.id))
        };
        let budget = handle.contract.read().await.budget.clone();

        let mut join_set: JoinSet<(StepId, u32, Result<StepResult, KrakenError>)> = JoinSet::new();
        let mut in_flight: HashSet<StepId> = HashSet::new();

        loop {
            // Dispatch every ready step; cancellation stops new
            // dispatches but lets in-flight work drain.
            if !cancel.is_cancelled() {
                let ready: Vec<Step> = {
                    let mut contract = handle.contract.write().await;
                    let plan = contract
                        .plan
                        .as_mut()
                        .expect("plan resolved before executing");
                    let ready_ids: Vec<StepId> = plan
                        .ready_steps()
                        .into_iter()
                        .filter(|id| !in_flight.contains(id))
                        .collect();
                    ready_ids
                        .iter()
                        .filter_map(|id| {
                            plan.step_mut(*id).map(|step| {
                                step.status = StepStatus::Dispatched;
                                step.clone()
                            })
                        })
                        .collect()
                };

                for step in ready {
                    let step_id = step.id;
                    in_flight.insert(step_id);
                    {
                        let mut contract = handle.contract.write().await;
                        if let Some(s) = contract
                            .plan
                            .as_mut()
                            .and_then(|plan| plan.step_mut(step_id))
                        {
                            s.status = StepStatus::Running;
                        }
                    }
                    debug!(task_id = %task_id, step_id = %step_id, "Step running");
                    join_set.spawn(self.step_future(task_id, step, budget.clone(), credential.clone()));
                }
            }

            if in_flight.is_empty() {
                if cancel.is_cancelled() {
                    return Ok(ExecutionEnd::Cancelled);
                }
                let mut contract = handle.contract.write().await;
                let plan = contract
                    .plan
                    .as_mut()
                    .expect("plan resolved before executing");
                if plan.is_complete() {
                    return Ok(ExecutionEnd::Completed);
                }

                // Steps stuck behind a failed optional dependency can
                // never run; resolve them now.
                let blocked = plan.blocked_steps();
                if !blocked.is_empty() {
                    for step_id in &blocked {
                        if let Some(step) = plan.step_mut(*step_id) {
                            step.status = StepStatus::Failed;
                            if !step.optional {
                                return Err(KrakenError::Internal {
                                    reason: format!(
                                        "step {step_id} blocked by a failed dependency"
                                    ),
                                });
                            }
                        }
                    }
                    continue;
                }
                if plan.ready_steps().is_empty() {
                    // A validated DAG cannot stall with live steps and
                    // nothing ready.
                    return Err(KrakenError::Internal {
                        reason: "execution stalled with no ready steps".to_string(),
                    });
                }
                continue;
            }

            let Some(joined) = join_set.join_next().await else {
                continue;
            };
            let (step_id, attempts, outcome) = match joined {
                Ok(result) => result,
                Err(join_err) => {
                    return Err(KrakenError::Internal {
                        reason: format!("step driver panicked: {join_err}"),
                    });
                }
            };
            in_flight.remove(&step_id);

            if cancel.is_cancelled() {
                // Results for a cancelled task are discarded, not
                // persisted as if completed.
                debug!(task_id = %task_id, step_id = %step_id, "Discarding result for cancelled task");
                continue;
            }

            match outcome {
                Ok(result) => {
                    let worker_id = result.provenance.worker_id;
                    {
                        let mut contract = handle.contract.write().await;
                        if let Some(step) = contract
                            .plan
                            .as_mut()
                            .and_then(|plan| plan.step_mut(step_id))
                        {
                            step.status = StepStatus::Succeeded;
                            step.attempts = attempts;
                            step.assigned_worker = Some(worker_id);
                            step.result = Some(result.clone());
                        }
                    }
                    // Per-step integration into shared task history.
                    self.memory
                        .write_shared(
                            WriteOrigin::Integration { task_id },
                            &format!("task:{task_id}:step:{step_id}"),
                            serde_json::json!({
                                "payload": result.payload,
                                "provenance": result.provenance,
                                "reduced_confidence": result.reduced_confidence,
                            }),
                        )
                        .await?;
                    self.event_bus.publish_task_event(TaskEvent::StepSucceeded {
                        task_id,
                        step_id,
                        worker_id,
                    });
                }
                Err(err) => {
                    self.event_bus.publish_task_event(TaskEvent::StepFailed {
                        task_id,
                        step_id,
                        error_code: err.code().to_string(),
                        attempt: attempts,
                    });
                    let optional = {
                        let mut contract = handle.contract.write().await;
                        let mut optional = false;
                        if let Some(step) = contract
                            .plan
                            .as_mut()
                            .and_then(|plan| plan.step_mut(step_id))
                        {
                            step.status = StepStatus::Failed;
                            step.attempts = attempts;
                            optional = step.optional;
                        }
                        optional
                    };
                    if !optional {
                        // Retry budget already exhausted inside the
                        // step driver; a required step failing fails
                        // the task, partial results preserved.
                        return Err(err);
                    }
                    warn!(task_id = %task_id, step_id = %step_id, "Optional step failed, continuing");
                }
            }
        }
    }

    /// One step's full retry loop as a spawnable future.
    fn step_future(
        &self,
        task_id: TaskId,
        step: Step,
        budget: ResourceBudget,
        credential: AccessCredential,
    ) -> impl std::future::Future<Output = (StepId, u32, Result<StepResult, KrakenError>)> + Send + 'static
    {
        let router = Arc::clone(&self.router);
        let swarm = Arc::clone(&self.swarm);
        async move {
            let step_id = step.id;
            let mut attempt = 0u32;
            loop {
                attempt += 1;
                let outcome = if step.swarm.is_some() {
                    swarm.execute(task_id, &step, &budget, &credential).await
                } else {
                    router.route(task_id, &step, &budget, &credential).await
                };
                match outcome {
                    Ok(result) => return (step_id, attempt, Ok(result)),
                    // Fresh fan-outs and empty candidate sets retry at
                    // this level; candidate-chain retries live in the
                    // router.
                    Err(err @ (KrakenError::SwarmNoQuorum { .. }
                    | KrakenError::NoAvailableWorker { .. }))
                        if attempt < step.retry.max_attempts =>
                    {
                        let backoff = step.retry.backoff_for(attempt);
                        debug!(
                            step_id = %step_id,
                            attempt,
                            backoff_ms = backoff.as_millis() as u64,
                            error = %err,
                            "Retrying step after transient failure"
                        );
                        tokio::time::sleep(backoff).await;
                    }
                    Err(err) => return (step_id, attempt, Err(err)),
                }
            }
        }
    }

    // ========================================================================
    // Terminal transitions
    // ========================================================================

    async fn integrate_and_cache(
        &self,
        task_id: TaskId,
        handle: &TaskHandle,
        fingerprint: &str,
        result: &serde_json::Value,
    ) -> Result<(), KrakenError> {
        let goal_entity = {
            let contract = handle.contract.read().await;
            format!("task:{}", contract.id)
        };
        self.memory
            .write_shared(
                WriteOrigin::Integration { task_id },
                &goal_entity,
                result.clone(),
            )
            .await?;
        self.memory
            .store_task_result(task_id, fingerprint, result.clone())
            .await?;
        Ok(())
    }

    async fn finish_completed(
        &self,
        task_id: TaskId,
        handle: &TaskHandle,
        result: serde_json::Value,
        confidence: f64,
        from_cache: bool,
    ) -> Result<(), KrakenError> {
        {
            let mut contract = handle.contract.write().await;
            contract
                .finish(
                    TaskState::Completed,
                    TaskOutcome::Completed {
                        result,
                        confidence,
                        from_cache,
                    },
                )
                .map_err(internal)?;
            let elapsed = Utc::now()
                .signed_duration_since(contract.created_at)
                .to_std()
                .unwrap_or_default();
            metrics::histogram!("kraken_task_processing_seconds").record(elapsed.as_secs_f64());
        }
        info!(task_id = %task_id, from_cache, "Task completed");
        metrics::counter!("kraken_tasks_completed_total").increment(1);
        self.event_bus.publish_task_event(TaskEvent::TaskCompleted {
            task_id,
            from_cache,
            completed_at: Utc::now(),
        });
        Ok(())
    }

    async fn finish_cancelled(
        &self,
        task_id: TaskId,
        handle: &TaskHandle,
    ) -> Result<(), KrakenError> {
        {
            let mut contract = handle.contract.write().await;
            if contract.state.is_terminal() {
                return Ok(());
            }
            contract
                .finish(TaskState::Cancelled, TaskOutcome::Cancelled)
                .map_err(internal)?;
        }
        info!(task_id = %task_id, "Task cancelled");
        metrics::counter!("kraken_tasks_cancelled_total").increment(1);
        self.event_bus.publish_task_event(TaskEvent::TaskCancelled {
            task_id,
            cancelled_at: Utc::now(),
        });
        Ok(())
    }

    async fn fail(&self, task_id: TaskId, err: &KrakenError) {
        let Some(handle) = self.handle(task_id).await else {
            return;
        };
        {
            let mut contract = handle.contract.write().await;
            if contract.state.is_terminal() {
                return;
            }
            let _ = contract.finish(
                TaskState::Failed,
                TaskOutcome::Failed {
                    failure: err.into(),
                },
            );
        }
        warn!(task_id = %task_id, error = %err, code = err.code(), "Task failed");
        metrics::counter!("kraken_tasks_failed_total", "code" => err.code()).increment(1);
        self.event_bus.publish_task_event(TaskEvent::TaskFailed {
            task_id,
            error_code: err.code().to_string(),
            failed_at: Utc::now(),
        });
    }

    async fn transition(
        &self,
        handle: &TaskHandle,
        next: TaskState,
    ) -> Result<(), KrakenError> {
        let mut contract = handle.contract.write().await;
        contract.transition_to(next).map_err(internal)
    }
}

fn internal(err: crate::domain::task::TaskError) -> KrakenError {
    KrakenError::Internal {
        reason: err.to_string(),
    }
}

fn apply_repair_feedback(step: &mut Step, feedback: &str) {
    match &mut step.input {
        serde_json::Value::Object(map) => {
            map.insert(
                "repair_feedback".to_string(),
                serde_json::Value::String(feedback.to_string()),
            );
        }
        other => {
            let original = other.clone();
            step.input = serde_json::json!({
                "input": original,
                "repair_feedback": feedback,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn repair_feedback_merges_into_object_inputs() {
        let mut step = Step::new(crate::domain::worker::Capability::Execution, json!({"q": 1}));
        apply_repair_feedback(&mut step, "wrong format");
        assert_eq!(step.input["repair_feedback"], json!("wrong format"));
        assert_eq!(step.input["q"], json!(1));
    }

    #[test]
    fn repair_feedback_wraps_scalar_inputs() {
        let mut step = Step::new(crate::domain::worker::Capability::Execution, json!("raw"));
        apply_repair_feedback(&mut step, "try again");
        assert_eq!(step.input["input"], json!("raw"));
        assert_eq!(step.input["repair_feedback"], json!("try again"));
    }
}
