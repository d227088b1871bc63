// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # KRAKEN Orchestrator Core
//!
//! Coordination core of the KRAKEN multi-agent task-processing
//! platform: the task lifecycle state machine, capability-based
//! routing, and the memory-access routing/policy layer. Swarm fan-out
//! lives in the companion `kraken-orchestrator-swarm` crate behind the
//! [`application::task_machine::SwarmExecutor`] seam.
//!
//! # Architecture
//!
//! - **Layer: domain** entities, value objects, collaborator
//!   contracts, error taxonomy.
//! - **Layer: application** registry, routers, and the task machine.
//! - **Layer: infrastructure** event bus, in-memory stores,
//!   in-process collaborators.
//! - **Layer: presentation** the admission/task HTTP surface.

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod presentation;

pub use domain::*;
