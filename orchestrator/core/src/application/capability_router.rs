// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Capability Router Application Service
//!
//! Selects a worker for a single-worker step and drives the dispatch:
//! candidates are healthy registry entries advertising the capability,
//! ranked by (a) lowest current load, (b) lowest rolling latency,
//! (c) registration order as the final deterministic tie-break. A
//! candidate that fails to acknowledge within the ack timeout is
//! skipped for the next-ranked one (wrapping around when the ranking
//! runs out), bounded by the step's retry policy. A dispatch no worker
//! ever accepts fails the step with `NoAvailableWorker`.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::domain::collaborators::WorkerClient;
use crate::domain::errors::KrakenError;
use crate::domain::events::TaskEvent;
use crate::domain::plan::{Provenance, Step, StepResult};
use crate::domain::task::{ResourceBudget, TaskId};
use crate::domain::worker::{AccessCredential, DispatchRequest, WorkerRecord};
use crate::infrastructure::event_bus::EventBus;

pub struct CapabilityRouter {
    registry: Arc<super::registry::CapabilityRegistry>,
    client: Arc<dyn WorkerClient>,
    event_bus: Arc<EventBus>,
    ack_timeout: Duration,
}

impl CapabilityRouter {
    pub fn new(
        registry: Arc<super::registry::CapabilityRegistry>,
        client: Arc<dyn WorkerClient>,
        event_bus: Arc<EventBus>,
        ack_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            client,
            event_bus,
            ack_timeout,
        }
    }

    /// Deterministic candidate ranking: load, then rolling latency,
    /// then registration order.
    pub fn rank(mut candidates: Vec<WorkerRecord>) -> Vec<WorkerRecord> {
        candidates.sort_by(|a, b| {
            a.load
                .cmp(&b.load)
                .then(a.rolling_latency.cmp(&b.rolling_latency))
                .then(a.registration_seq.cmp(&b.registration_seq))
        });
        candidates
    }

    /// Route one step to a single worker and await its result.
    pub async fn route(
        &self,
        task_id: TaskId,
        step: &Step,
        budget: &ResourceBudget,
        credential: &AccessCredential,
    ) -> Result<StepResult, KrakenError> {
        let candidates = Self::rank(self.registry.candidates(step.capability).await);
        if candidates.is_empty() {
            metrics::counter!("kraken_dispatch_no_worker_total").increment(1);
            return Err(KrakenError::NoAvailableWorker {
                capability: step.capability,
            });
        }

        let deadline = budget.max_latency;
        let mut last_error = None;
        let mut attempt = 0u32;
        // Whether any worker accepted the dispatch; distinguishes a
        // worker-side failure from a capability with nobody home.
        let mut any_accepted = false;

        while attempt < step.retry.max_attempts {
            // Walk the ranking, wrapping around once it is exhausted
            // (retry against the same worker when it is the only one).
            let worker = &candidates[attempt as usize % candidates.len()];
            attempt += 1;

            let backoff = step.retry.backoff_for(attempt - 1);
            if !backoff.is_zero() {
                tokio::time::sleep(backoff).await;
            }

            let request = DispatchRequest {
                task_id,
                step_id: step.id,
                capability: step.capability,
                input: step.input.clone(),
                budget: budget.clone(),
                credential: credential.clone(),
            };

            debug!(
                task_id = %task_id,
                step_id = %step.id,
                worker_id = %worker.id,
                attempt,
                "Dispatching step"
            );
            self.event_bus.publish_task_event(TaskEvent::StepDispatched {
                task_id,
                step_id: step.id,
                worker_id: worker.id,
                attempt,
            });

            let dispatched_at = tokio::time::Instant::now();

            // Acknowledgment wait is short and separate from the step
            // deadline; a silent worker forfeits its slot.
            let handle = match tokio::time::timeout(
                self.ack_timeout,
                self.client.dispatch(worker, request),
            )
            .await
            {
                Err(_) => {
                    warn!(worker_id = %worker.id, "Dispatch acknowledgment timed out");
                    self.registry
                        .record_outcome(worker.id, self.ack_timeout, false)
                        .await;
                    last_error = Some(KrakenError::DispatchTimeout {
                        worker_id: worker.id,
                        timeout: self.ack_timeout,
                    });
                    continue;
                }
                Ok(Err(err)) => {
                    self.registry
                        .record_outcome(worker.id, dispatched_at.elapsed(), false)
                        .await;
                    last_error = Some(err);
                    continue;
                }
                Ok(Ok(handle)) => handle,
            };
            any_accepted = true;

            match handle.response(deadline).await {
                Ok(response) => {
                    let elapsed = dispatched_at.elapsed();
                    self.registry.record_outcome(worker.id, elapsed, true).await;
                    metrics::counter!("kraken_dispatch_success_total").increment(1);
                    return Ok(StepResult {
                        payload: response.payload,
                        provenance: Provenance {
                            worker_id: response.worker_id,
                            produced_at: response.produced_at,
                            latency: response.processing_duration,
                            confidence: response.confidence,
                        },
                        reduced_confidence: false,
                    });
                }
                Err(err) => {
                    warn!(
                        worker_id = %worker.id,
                        error = %err,
                        "Worker failed or timed out, trying next-ranked candidate"
                    );
                    self.registry
                        .record_outcome(worker.id, dispatched_at.elapsed(), false)
                        .await;
                    metrics::counter!("kraken_dispatch_failure_total").increment(1);
                    last_error = Some(err);
                }
            }
        }

        // Nobody ever accepted the dispatch: the capability has no
        // worker actually serving it.
        if !any_accepted {
            return Err(KrakenError::NoAvailableWorker {
                capability: step.capability,
            });
        }
        Err(last_error.unwrap_or(KrakenError::NoAvailableWorker {
            capability: step.capability,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::worker::Capability;
    use std::collections::BTreeMap;

    fn worker(load: u32, latency_ms: u64, seq: u64) -> WorkerRecord {
        let mut caps = BTreeMap::new();
        caps.insert(Capability::Execution, "1.0.0".to_string());
        let mut record = WorkerRecord::new(format!("worker-{seq}"), caps, seq);
        record.load = load;
        record.rolling_latency = Duration::from_millis(latency_ms);
        record
    }

    #[test]
    fn ranking_prefers_lowest_load() {
        let ranked = CapabilityRouter::rank(vec![worker(5, 10, 0), worker(1, 500, 1)]);
        assert_eq!(ranked[0].registration_seq, 1);
    }

    #[test]
    fn ranking_breaks_load_ties_by_latency() {
        let ranked = CapabilityRouter::rank(vec![worker(2, 300, 0), worker(2, 100, 1)]);
        assert_eq!(ranked[0].registration_seq, 1);
    }

    #[test]
    fn ranking_falls_back_to_registration_order() {
        let ranked = CapabilityRouter::rank(vec![worker(2, 100, 7), worker(2, 100, 3)]);
        assert_eq!(ranked[0].registration_seq, 3);
    }
}
