// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Swarm Coordinator Application Service
//!
//! Fans a step out to N distinct workers advertising its capability,
//! joins their proposals at a fixed deadline, and reconciles them with
//! the step's aggregation strategy. The coordinator never waits past
//! the deadline: stragglers are aborted and late proposals discarded,
//! which bounds worst-case step latency and precludes deadlock.
//!
//! Unresolved ties escalate to the validation collaborator as arbiter;
//! with the arbiter unavailable the lowest-latency tied proposal wins
//! and the result carries a reduced-confidence flag instead of
//! blocking.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use kraken_core::application::capability_router::CapabilityRouter;
use kraken_core::application::registry::CapabilityRegistry;
use kraken_core::application::task_machine::SwarmExecutor;
use kraken_core::domain::collaborators::{Validator, WorkerClient};
use kraken_core::domain::errors::KrakenError;
use kraken_core::domain::events::TaskEvent;
use kraken_core::domain::plan::{Provenance, Step, StepResult, SwarmSpec};
use kraken_core::domain::task::{ResourceBudget, TaskId};
use kraken_core::domain::worker::{AccessCredential, DispatchRequest};
use kraken_core::infrastructure::event_bus::EventBus;

use crate::domain::aggregate::{aggregator_for, AggregationResult, TiedCandidate};
use crate::domain::ballot::{AggregationOutcome, Proposal, SwarmBallot};

pub struct SwarmCoordinator {
    registry: Arc<CapabilityRegistry>,
    client: Arc<dyn WorkerClient>,
    arbiter: Arc<dyn Validator>,
    event_bus: Arc<EventBus>,
    ack_timeout: Duration,
}

impl SwarmCoordinator {
    pub fn new(
        registry: Arc<CapabilityRegistry>,
        client: Arc<dyn WorkerClient>,
        arbiter: Arc<dyn Validator>,
        event_bus: Arc<EventBus>,
        ack_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            client,
            arbiter,
            event_bus,
            ack_timeout,
        }
    }

    /// Collect proposals until every invocation resolves or the fixed
    /// deadline lapses, whichever is first.
    async fn collect_ballot(
        &self,
        task_id: TaskId,
        step: &Step,
        spec: &SwarmSpec,
        budget: &ResourceBudget,
        credential: &AccessCredential,
    ) -> Result<SwarmBallot, KrakenError> {
        let candidates = CapabilityRouter::rank(self.registry.candidates(step.capability).await);
        if candidates.is_empty() {
            return Err(KrakenError::NoAvailableWorker {
                capability: step.capability,
            });
        }

        // N distinct workers, best-ranked first; a thin pool fans out
        // to whatever is available.
        let fan_out = spec.fan_out.clamp(1, candidates.len());
        let deadline = budget.max_latency;

        let mut join_set: JoinSet<Result<Proposal, KrakenError>> = JoinSet::new();
        for worker in candidates.into_iter().take(fan_out) {
            let client = Arc::clone(&self.client);
            let request = DispatchRequest {
                task_id,
                step_id: step.id,
                capability: step.capability,
                input: step.input.clone(),
                budget: budget.clone(),
                credential: credential.clone(),
            };
            let ack_timeout = self.ack_timeout;
            join_set.spawn(async move {
                let started = tokio::time::Instant::now();
                let handle = tokio::time::timeout(ack_timeout, client.dispatch(&worker, request))
                    .await
                    .map_err(|_| KrakenError::DispatchTimeout {
                        worker_id: worker.id,
                        timeout: ack_timeout,
                    })??;
                // Each invocation carries an independent deadline equal
                // to the step's time budget.
                let response = handle.response(deadline).await?;
                let ranking = response
                    .payload
                    .get("ranking")
                    .and_then(|v| v.as_array())
                    .map(|items| items.to_vec());
                Ok(Proposal {
                    worker_id: response.worker_id,
                    payload: response.payload,
                    confidence: response.confidence,
                    latency: started.elapsed(),
                    ranking,
                })
            });
        }

        let mut ballot = SwarmBallot::open(task_id, step.id, deadline, fan_out);
        let window = tokio::time::sleep(deadline);
        tokio::pin!(window);

        loop {
            tokio::select! {
                _ = &mut window => {
                    debug!(step_id = %step.id, "Swarm wait window lapsed");
                    break;
                }
                joined = join_set.join_next() => match joined {
                    None => break,
                    Some(Ok(Ok(proposal))) => {
                        debug!(
                            step_id = %step.id,
                            worker_id = %proposal.worker_id,
                            latency_ms = proposal.latency.as_millis() as u64,
                            "Swarm proposal received"
                        );
                        ballot.record(proposal);
                    }
                    Some(Ok(Err(err))) => {
                        warn!(step_id = %step.id, error = %err, "Swarm invocation failed");
                    }
                    Some(Err(join_err)) => {
                        warn!(step_id = %step.id, error = %join_err, "Swarm invocation panicked");
                    }
                }
            }
        }
        // Explicitly cancel stragglers; their late proposals are
        // discarded, never recorded.
        join_set.abort_all();

        Ok(ballot)
    }

    /// Resolve a tie: arbiter first, lowest latency with a
    /// reduced-confidence flag when the arbiter is unavailable.
    async fn break_tie(
        &self,
        strategy: &'static str,
        candidates: Vec<TiedCandidate>,
    ) -> AggregationOutcome {
        let payloads: Vec<serde_json::Value> =
            candidates.iter().map(|c| c.payload.clone()).collect();

        match self.arbiter.arbitrate(&payloads).await {
            Ok(index) if index < candidates.len() => {
                let chosen = &candidates[index];
                AggregationOutcome {
                    payload: chosen.payload.clone(),
                    confidence: chosen.confidence,
                    strategy: strategy.to_string(),
                    winner: chosen.worker_id,
                    winner_latency: chosen.latency,
                    tie_broken: true,
                    reduced_confidence: false,
                }
            }
            _ => {
                // Deterministic fallback: lowest-latency proposal, and
                // the result is flagged rather than blocking.
                let chosen = candidates
                    .iter()
                    .min_by_key(|c| c.latency)
                    .expect("tie always has at least two candidates");
                warn!(
                    winner = %chosen.worker_id,
                    "Arbiter unavailable, breaking swarm tie by lowest latency"
                );
                AggregationOutcome {
                    payload: chosen.payload.clone(),
                    confidence: chosen.confidence,
                    strategy: strategy.to_string(),
                    winner: chosen.worker_id,
                    winner_latency: chosen.latency,
                    tie_broken: true,
                    reduced_confidence: true,
                }
            }
        }
    }
}

#[async_trait]
impl SwarmExecutor for SwarmCoordinator {
    async fn execute(
        &self,
        task_id: TaskId,
        step: &Step,
        budget: &ResourceBudget,
        credential: &AccessCredential,
    ) -> Result<StepResult, KrakenError> {
        let spec = step.swarm.clone().unwrap_or_default();
        let ballot = self
            .collect_ballot(task_id, step, &spec, budget, credential)
            .await?;

        self.event_bus
            .publish_task_event(TaskEvent::SwarmBallotClosed {
                task_id,
                step_id: step.id,
                responders: ballot.responders(),
                strategy: format!("{:?}", spec.strategy),
            });
        metrics::counter!("kraken_swarm_ballots_total").increment(1);
        metrics::histogram!("kraken_swarm_responders").record(ballot.responders() as f64);

        if ballot.responders() == 0 {
            metrics::counter!("kraken_swarm_no_quorum_total").increment(1);
            return Err(KrakenError::SwarmNoQuorum { step_id: step.id });
        }

        let priors = self.registry.success_priors().await;
        let aggregator = aggregator_for(spec.strategy);
        let outcome = match aggregator.aggregate(&ballot, &priors) {
            AggregationResult::Decided(outcome) => outcome,
            AggregationResult::Tied(candidates) => {
                metrics::counter!("kraken_swarm_ties_total").increment(1);
                self.break_tie(aggregator.name(), candidates).await
            }
        };

        // Agreement with the reconciled answer feeds each responder's
        // accuracy prior.
        for proposal in &ballot.proposals {
            self.registry
                .record_outcome(
                    proposal.worker_id,
                    proposal.latency,
                    proposal.payload == outcome.payload,
                )
                .await;
        }

        Ok(StepResult {
            payload: outcome.payload,
            provenance: Provenance {
                worker_id: outcome.winner,
                produced_at: Utc::now(),
                latency: outcome.winner_latency,
                confidence: outcome.confidence,
            },
            reduced_confidence: outcome.reduced_confidence,
        })
    }
}
