// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain Events
//!
//! Emitted by the task machine, the routers, and the registry on the
//! in-memory event bus. Observers (CLI, SSE streams, metrics) consume
//! them; nothing in the core depends on anyone listening.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::plan::StepId;
use crate::domain::task::{Priority, TaskId};
use crate::domain::worker::{Capability, WorkerId};

/// Task lifecycle and step execution events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TaskEvent {
    TaskSubmitted {
        task_id: TaskId,
        priority: Priority,
        submitted_at: DateTime<Utc>,
    },
    /// Served straight from the memory router inside the validity
    /// window; no planning or dispatch happened.
    TaskShortCircuited {
        task_id: TaskId,
        fingerprint: String,
    },
    PlanResolved {
        task_id: TaskId,
        step_count: usize,
    },
    StepDispatched {
        task_id: TaskId,
        step_id: StepId,
        worker_id: WorkerId,
        attempt: u32,
    },
    StepSucceeded {
        task_id: TaskId,
        step_id: StepId,
        worker_id: WorkerId,
    },
    StepFailed {
        task_id: TaskId,
        step_id: StepId,
        error_code: String,
        attempt: u32,
    },
    SwarmBallotClosed {
        task_id: TaskId,
        step_id: StepId,
        responders: usize,
        strategy: String,
    },
    RepairAttempted {
        task_id: TaskId,
        attempt: u32,
    },
    TaskCompleted {
        task_id: TaskId,
        from_cache: bool,
        completed_at: DateTime<Utc>,
    },
    TaskFailed {
        task_id: TaskId,
        error_code: String,
        failed_at: DateTime<Utc>,
    },
    TaskCancelled {
        task_id: TaskId,
        cancelled_at: DateTime<Utc>,
    },
}

/// Worker registration and health events from the capability registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WorkerEvent {
    WorkerRegistered {
        worker_id: WorkerId,
        capabilities: Vec<Capability>,
        registered_at: DateTime<Utc>,
    },
    WorkerHeartbeat {
        worker_id: WorkerId,
        load: u32,
    },
    WorkerUnavailable {
        worker_id: WorkerId,
        last_heartbeat: DateTime<Utc>,
    },
}

/// Memory router events, mainly for cache observability.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MemoryEvent {
    CacheHit { fingerprint: String },
    CacheMiss { fingerprint: String },
    SharedWriteCommitted { entity_key: String, version: u64 },
    WriteConflictRetried { entity_key: String, attempts: u32 },
}
