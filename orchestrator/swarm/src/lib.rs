// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # KRAKEN Orchestrator Swarm
//!
//! Parallel fan-out of a step to multiple workers and deterministic
//! reconciliation of their proposals. Plugs into the core task machine
//! through the `SwarmExecutor` seam.

pub mod application;
pub mod domain;

pub use application::coordinator::SwarmCoordinator;
pub use domain::aggregate::{aggregator_for, AggregationResult, Aggregator};
pub use domain::ballot::{AggregationOutcome, BallotId, Proposal, SwarmBallot};
