// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Integration tests for the swarm coordinator: deadline-bounded
//! joins, quorum failures, aggregation, and tie-breaking.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use kraken_core::application::registry::CapabilityRegistry;
use kraken_core::application::task_machine::SwarmExecutor;
use kraken_core::domain::collaborators::{
    ValidationRequest, ValidationVerdict, Validator,
};
use kraken_core::domain::errors::KrakenError;
use kraken_core::domain::plan::{AggregationStrategy, Step, SwarmSpec};
use kraken_core::domain::task::{ResourceBudget, TaskId};
use kraken_core::domain::worker::{AccessCredential, Capability, WorkerId};
use kraken_core::infrastructure::collaborators::LocalWorkerClient;
use kraken_core::infrastructure::event_bus::EventBus;
use kraken_swarm::SwarmCoordinator;

// ============================================================================
// Test doubles
// ============================================================================

/// Arbiter that is always unreachable.
struct UnavailableArbiter;

#[async_trait]
impl Validator for UnavailableArbiter {
    async fn validate(
        &self,
        _request: ValidationRequest,
    ) -> Result<ValidationVerdict, KrakenError> {
        Err(KrakenError::Internal {
            reason: "arbiter offline".to_string(),
        })
    }

    async fn arbitrate(&self, _candidates: &[serde_json::Value]) -> Result<usize, KrakenError> {
        Err(KrakenError::Internal {
            reason: "arbiter offline".to_string(),
        })
    }
}

/// Arbiter that always prefers a fixed candidate index.
struct PrefersIndex(usize);

#[async_trait]
impl Validator for PrefersIndex {
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
        Ok(self.0)
    }
}

// ============================================================================
// Harness
// ============================================================================

struct Harness {
    coordinator: SwarmCoordinator,
    registry: Arc<CapabilityRegistry>,
    client: Arc<LocalWorkerClient>,
}

fn build(arbiter: Arc<dyn Validator>) -> Harness {
    let event_bus = Arc::new(EventBus::with_default_capacity());
    let registry = Arc::new(CapabilityRegistry::new(
        Duration::from_secs(30),
        Arc::clone(&event_bus),
    ));
    let client = LocalWorkerClient::new();
    let coordinator = SwarmCoordinator::new(
        Arc::clone(&registry),
        Arc::clone(&client) as _,
        arbiter,
        event_bus,
        Duration::from_millis(200),
    );
    Harness {
        coordinator,
        registry,
        client,
    }
}

/// Register a worker that answers `payload` with `confidence` after
/// `delay`.
async fn register_scripted_worker(
    harness: &Harness,
    name: &str,
    payload: serde_json::Value,
    confidence: f64,
    delay: Duration,
) -> WorkerId {
    let mut capabilities = BTreeMap::new();
    capabilities.insert(Capability::Execution, "1.0.0".to_string());
    let worker_id = harness.registry.register(name, capabilities).await;
    harness.client.register(worker_id, move |_request| {
        let payload = payload.clone();
        async move {
            tokio::time::sleep(delay).await;
            Ok((payload, confidence))
        }
    });
    worker_id
}

fn swarm_step(strategy: AggregationStrategy, fan_out: usize) -> Step {
    Step::new(Capability::Execution, json!({"question": "answer?"})).with_swarm(SwarmSpec {
        fan_out,
        strategy,
    })
}

fn budget(deadline: Duration) -> ResourceBudget {
    ResourceBudget {
        max_cost_usd: 1.0,
        max_latency: deadline,
        max_attempts: 3,
    }
}

async fn execute(harness: &Harness, step: &Step, deadline: Duration) -> Result<
    kraken_core::domain::plan::StepResult,
    KrakenError,
> {
    harness
        .coordinator
        .execute(
            TaskId::new(),
            step,
            &budget(deadline),
            &AccessCredential("test".to_string()),
        )
        .await
}

// ============================================================================
// Aggregation through the coordinator
// ============================================================================

#[tokio::test]
async fn unanimous_ballot_wins_with_full_confidence() {
    let harness = build(Arc::new(UnavailableArbiter));
    for name in ["w1", "w2", "w3"] {
        register_scripted_worker(&harness, name, json!("paris"), 0.8, Duration::from_millis(10))
            .await;
    }

    let step = swarm_step(AggregationStrategy::MajorityVote, 3);
    let result = execute(&harness, &step, Duration::from_secs(2)).await.unwrap();
    assert_eq!(result.payload, json!("paris"));
    assert!((result.provenance.confidence - 1.0).abs() < f64::EPSILON);
    assert!(!result.reduced_confidence);
}

#[tokio::test]
async fn two_of_three_split_wins_with_two_thirds_confidence() {
    let harness = build(Arc::new(UnavailableArbiter));
    register_scripted_worker(&harness, "w1", json!("paris"), 0.9, Duration::from_millis(10)).await;
    register_scripted_worker(&harness, "w2", json!("paris"), 0.7, Duration::from_millis(10)).await;
    register_scripted_worker(&harness, "w3", json!("lyon"), 0.99, Duration::from_millis(10)).await;

    let step = swarm_step(AggregationStrategy::MajorityVote, 3);
    let result = execute(&harness, &step, Duration::from_secs(2)).await.unwrap();
    assert_eq!(result.payload, json!("paris"));
    assert!((result.provenance.confidence - 2.0 / 3.0).abs() < 1e-9);
}

// ============================================================================
// Deadline behavior
// ============================================================================

#[tokio::test(start_paused = true)]
async fn proposals_after_the_deadline_yield_no_quorum_without_blocking() {
    let harness = build(Arc::new(UnavailableArbiter));
    // Every worker answers long after the window closes.
    for name in ["w1", "w2", "w3"] {
        register_scripted_worker(&harness, name, json!("late"), 0.9, Duration::from_secs(60))
            .await;
    }

    let step = swarm_step(AggregationStrategy::MajorityVote, 3);
    let started = tokio::time::Instant::now();
    let err = execute(&harness, &step, Duration::from_secs(1)).await.unwrap_err();
    assert!(matches!(err, KrakenError::SwarmNoQuorum { .. }));
    // The coordinator returned at the window, not at the workers'
    // pace.
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test(start_paused = true)]
async fn straggler_is_discarded_but_quorum_of_one_decides() {
    let harness = build(Arc::new(UnavailableArbiter));
    register_scripted_worker(&harness, "fast", json!("on-time"), 0.9, Duration::from_millis(50))
        .await;
    register_scripted_worker(&harness, "slow", json!("too-late"), 0.9, Duration::from_secs(60))
        .await;

    let step = swarm_step(AggregationStrategy::MajorityVote, 2);
    let result = execute(&harness, &step, Duration::from_secs(1)).await.unwrap();
    assert_eq!(result.payload, json!("on-time"));
    // 1 vote of 1 responder.
    assert!((result.provenance.confidence - 1.0).abs() < f64::EPSILON);
}

// ============================================================================
// Tie-breaking
// ============================================================================

#[tokio::test]
async fn tie_with_unavailable_arbiter_picks_lowest_latency_and_flags_result() {
    let harness = build(Arc::new(UnavailableArbiter));
    register_scripted_worker(&harness, "quick", json!("a"), 0.9, Duration::from_millis(10)).await;
    register_scripted_worker(&harness, "slow", json!("b"), 0.9, Duration::from_millis(120)).await;

    let step = swarm_step(AggregationStrategy::MajorityVote, 2);
    let result = execute(&harness, &step, Duration::from_secs(2)).await.unwrap();
    assert_eq!(result.payload, json!("a"));
    assert!(result.reduced_confidence);
}

#[tokio::test]
async fn tie_resolved_by_arbiter_is_not_flagged() {
    let harness = build(Arc::new(PrefersIndex(1)));
    register_scripted_worker(&harness, "quick", json!("a"), 0.9, Duration::from_millis(10)).await;
    register_scripted_worker(&harness, "slow", json!("b"), 0.9, Duration::from_millis(80)).await;

    let step = swarm_step(AggregationStrategy::MajorityVote, 2);
    let result = execute(&harness, &step, Duration::from_secs(2)).await.unwrap();
    // The arbiter chose the second tied candidate.
    assert_eq!(result.payload, json!("b"));
    assert!(!result.reduced_confidence);
}

// ============================================================================
// Weighted confidence end to end
// ============================================================================

#[tokio::test]
async fn weighted_confidence_prefers_historically_accurate_workers() {
    let harness = build(Arc::new(UnavailableArbiter));
    let veteran = register_scripted_worker(
        &harness,
        "veteran",
        json!("a"),
        0.8,
        Duration::from_millis(10),
    )
    .await;
    register_scripted_worker(&harness, "rookie", json!("b"), 0.95, Duration::from_millis(10))
        .await;

    // Feed the veteran a streak of successes so its prior dominates.
    for _ in 0..30 {
        harness
            .registry
            .record_outcome(veteran, Duration::from_millis(20), true)
            .await;
    }

    let step = swarm_step(AggregationStrategy::WeightedConfidence, 2);
    let result = execute(&harness, &step, Duration::from_secs(2)).await.unwrap();
    assert_eq!(result.payload, json!("a"));
}

// ============================================================================
// Fan-out edge cases
// ============================================================================

#[tokio::test]
async fn empty_candidate_pool_reports_no_available_worker() {
    let harness = build(Arc::new(UnavailableArbiter));
    let step = swarm_step(AggregationStrategy::MajorityVote, 3);
    let err = execute(&harness, &step, Duration::from_secs(1)).await.unwrap_err();
    assert!(matches!(err, KrakenError::NoAvailableWorker { .. }));
}
