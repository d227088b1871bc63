// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Swarm Ballot Aggregates
//!
//! A [`SwarmBallot`] is the ephemeral record of one fan-out: the
//! proposals that arrived inside the wait window, each tagged with the
//! producing worker and its self-reported confidence, plus the chosen
//! aggregation outcome. Proposals arriving after the deadline never
//! enter the ballot.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use kraken_core::domain::plan::StepId;
use kraken_core::domain::task::TaskId;
use kraken_core::domain::worker::WorkerId;

/// Unique identifier for a [`SwarmBallot`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BallotId(pub Uuid);

impl BallotId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for BallotId {
    fn default() -> Self {
        Self::new()
    }
}

/// One worker's answer to a fanned-out step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proposal {
    pub worker_id: WorkerId,
    pub payload: serde_json::Value,

    /// Self-reported confidence in `[0, 1]`.
    pub confidence: f64,

    /// Wall-clock latency of this invocation as observed by the
    /// coordinator.
    #[serde(with = "humantime_serde")]
    pub latency: Duration,

    /// Ranked candidate answers, when the worker returned them
    /// (consumed by Borda-count aggregation).
    #[serde(default)]
    pub ranking: Option<Vec<serde_json::Value>>,
}

/// Ephemeral per-fan-out ballot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwarmBallot {
    pub id: BallotId,
    pub task_id: TaskId,
    pub step_id: StepId,

    /// Fixed wait window; the coordinator never waits past it.
    #[serde(with = "humantime_serde")]
    pub deadline: Duration,

    /// How many workers were dispatched to.
    pub requested: usize,

    pub proposals: Vec<Proposal>,
    pub opened_at: DateTime<Utc>,
}

impl SwarmBallot {
    pub fn open(task_id: TaskId, step_id: StepId, deadline: Duration, requested: usize) -> Self {
        Self {
            id: BallotId::new(),
            task_id,
            step_id,
            deadline,
            requested,
            proposals: Vec::with_capacity(requested),
            opened_at: Utc::now(),
        }
    }

    pub fn record(&mut self, proposal: Proposal) {
        self.proposals.push(proposal);
    }

    pub fn responders(&self) -> usize {
        self.proposals.len()
    }
}

/// The reconciled answer for a ballot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationOutcome {
    pub payload: serde_json::Value,
    pub confidence: f64,

    /// Strategy that produced the outcome.
    pub strategy: String,

    /// Worker credited with the winning payload (its lowest-latency
    /// proposer).
    pub winner: WorkerId,

    /// Observed latency of the credited proposal.
    #[serde(with = "humantime_serde")]
    pub winner_latency: Duration,

    /// Whether a tie had to be broken after aggregation.
    pub tie_broken: bool,

    /// Set when the tie was broken without the arbiter; the result is
    /// flagged instead of blocking the ballot.
    pub reduced_confidence: bool,
}
