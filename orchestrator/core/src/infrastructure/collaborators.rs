// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! In-Process Collaborator Implementations
//!
//! Default implementations of the collaborator seams for in-process
//! deployments and tests: a worker client that runs registered
//! handlers on the local runtime, a fallback planner, an
//! accept-everything validator, and content filters.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use futures::future::BoxFuture;
use serde_json::json;

use crate::domain::collaborators::{
    ContentFilter, DispatchHandle, Planner, PlanRequest, ValidationRequest, ValidationVerdict,
    Validator, WorkerClient,
};
use crate::domain::errors::KrakenError;
use crate::domain::plan::{Plan, Step};
use crate::domain::worker::{Capability, DispatchRequest, DispatchResponse, WorkerId, WorkerRecord};

// ============================================================================
// Local worker client
// ============================================================================

type HandlerFuture = BoxFuture<'static, Result<(serde_json::Value, f64), String>>;

/// Behavior of one locally hosted worker: payload + self-reported
/// confidence on success, a reason string on failure.
pub type WorkerHandler = Arc<dyn Fn(DispatchRequest) -> HandlerFuture + Send + Sync>;

/// Worker transport that executes registered handlers on the local
/// runtime. Dispatch acknowledgment is the successful handler lookup;
/// the response arrives through the handle when the handler resolves.
#[derive(Default)]
pub struct LocalWorkerClient {
    handlers: DashMap<WorkerId, WorkerHandler>,
}

impl LocalWorkerClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn register<F, Fut>(&self, worker_id: WorkerId, handler: F)
    where
        F: Fn(DispatchRequest) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<(serde_json::Value, f64), String>>
            + Send
            + 'static,
    {
        let handler: WorkerHandler = Arc::new(move |request| Box::pin(handler(request)));
        self.handlers.insert(worker_id, handler);
    }
}

#[async_trait]
impl WorkerClient for LocalWorkerClient {
    async fn dispatch(
        &self,
        worker: &WorkerRecord,
        request: DispatchRequest,
    ) -> Result<DispatchHandle, KrakenError> {
        let handler = self
            .handlers
            .get(&worker.id)
            .map(|h| h.clone())
            .ok_or_else(|| KrakenError::DispatchFailed {
                worker_id: worker.id,
                reason: "no local handler registered".to_string(),
            })?;

        let (tx, handle) = DispatchHandle::channel(worker.id);
        let worker_id = worker.id;
        tokio::spawn(async move {
            let started = tokio::time::Instant::now();
            let outcome = handler(request).await;
            let response = match outcome {
                Ok((payload, confidence)) => Ok(DispatchResponse {
                    payload,
                    confidence,
                    worker_id,
                    produced_at: Utc::now(),
                    processing_duration: started.elapsed(),
                }),
                Err(reason) => Err(KrakenError::DispatchFailed { worker_id, reason }),
            };
            let _ = tx.send(response);
        });
        Ok(handle)
    }
}

// ============================================================================
// Fallback planner
// ============================================================================

/// Planner of last resort: one execution step carrying the whole goal.
///
/// Deployments wire the planning arm here; this keeps an in-process
/// orchestrator functional without it.
pub struct SingleStepPlanner;

#[async_trait]
impl Planner for SingleStepPlanner {
    async fn plan(&self, request: PlanRequest) -> Result<Plan, KrakenError> {
        // Prefer the execution capability; otherwise take anything the
        // catalogue covers so validation can pass.
        let capability = if request.catalogue.contains(&Capability::Execution) {
            Capability::Execution
        } else {
            *request
                .catalogue
                .iter()
                .next()
                .ok_or(KrakenError::PlanningRejected {
                    reason: "no capabilities available".to_string(),
                })?
        };

        let input = json!({
            "goal": request.goal,
            "context": request.context,
            "constraints": request.constraints,
        });
        Ok(Plan::new(vec![Step::new(capability, input)]))
    }
}

// ============================================================================
// Validators
// ============================================================================

/// Accepts every candidate with full confidence; arbitration picks the
/// first candidate.
pub struct AcceptAllValidator;

#[async_trait]
impl Validator for AcceptAllValidator {
    async fn validate(
        &self,
        _request: ValidationRequest,
    ) -> Result<ValidationVerdict, KrakenError> {
        Ok(ValidationVerdict {
            accepted: true,
            confidence: 1.0,
            repair: None,
        })
    }

    async fn arbitrate(&self, _candidates: &[serde_json::Value]) -> Result<usize, KrakenError> {
        Ok(0)
    }
}

// ============================================================================
// Content filters
// ============================================================================

/// No-op redaction for trusted deployments.
pub struct PassthroughContentFilter;

#[async_trait]
impl ContentFilter for PassthroughContentFilter {
    async fn redact(&self, content: serde_json::Value) -> Result<serde_json::Value, KrakenError> {
        Ok(content)
    }
}

/// Replaces string values containing any of the configured patterns.
pub struct KeywordRedactor {
    patterns: Vec<String>,
    replacement: String,
}

impl KeywordRedactor {
    pub fn new(patterns: Vec<String>) -> Self {
        Self {
            patterns,
            replacement: "[redacted]".to_string(),
        }
    }

    fn redact_value(&self, value: serde_json::Value) -> serde_json::Value {
        match value {
            serde_json::Value::String(s) => {
                let lowered = s.to_lowercase();
                if self.patterns.iter().any(|p| lowered.contains(p.as_str())) {
                    serde_json::Value::String(self.replacement.clone())
                } else {
                    serde_json::Value::String(s)
                }
            }
            serde_json::Value::Array(items) => serde_json::Value::Array(
                items.into_iter().map(|v| self.redact_value(v)).collect(),
            ),
            serde_json::Value::Object(map) => serde_json::Value::Object(
                map.into_iter()
                    .map(|(k, v)| (k, self.redact_value(v)))
                    .collect(),
            ),
            other => other,
        }
    }
}

#[async_trait]
impl ContentFilter for KeywordRedactor {
    async fn redact(&self, content: serde_json::Value) -> Result<serde_json::Value, KrakenError> {
        Ok(self.redact_value(content))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeMap, BTreeSet};
    use crate::domain::task::TaskId;

    #[tokio::test]
    async fn single_step_planner_prefers_execution() {
        let catalogue: BTreeSet<Capability> =
            [Capability::Retrieval, Capability::Execution].into_iter().collect();
        let plan = SingleStepPlanner
            .plan(PlanRequest {
                task_id: TaskId::new(),
                goal: "echo hello".to_string(),
                constraints: BTreeMap::new(),
                context: None,
                catalogue,
            })
            .await
            .unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan.steps()[0].capability, Capability::Execution);
    }

    #[tokio::test]
    async fn single_step_planner_rejects_empty_catalogue() {
        let err = SingleStepPlanner
            .plan(PlanRequest {
                task_id: TaskId::new(),
                goal: "echo hello".to_string(),
                constraints: BTreeMap::new(),
                context: None,
                catalogue: BTreeSet::new(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, KrakenError::PlanningRejected { .. }));
    }

    #[tokio::test]
    async fn keyword_redactor_scrubs_nested_strings() {
        let filter = KeywordRedactor::new(vec!["ssn".to_string()]);
        let redacted = filter
            .redact(json!({
                "name": "alice",
                "details": ["SSN 123-45-6789", "harmless"],
            }))
            .await
            .unwrap();
        assert_eq!(redacted["details"][0], json!("[redacted]"));
        assert_eq!(redacted["details"][1], json!("harmless"));
        assert_eq!(redacted["name"], json!("alice"));
    }
}
