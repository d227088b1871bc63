// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Orchestrator Configuration
//!
//! Every tunable the coordination core consumes, with defaults that
//! work for in-process deployments. The server binary loads overrides
//! from `KRAKEN_*` environment variables.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::plan::SwarmSpec;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Admission control: live (non-terminal) task ceiling. Submissions
    /// beyond it are rejected with `BudgetExceeded`, no side effects.
    pub queue_capacity: usize,

    /// Admission control: floor on a task's declared cost budget.
    pub min_budget_cost_usd: f64,

    /// How long a worker has to acknowledge a dispatch before the
    /// router moves to the next-ranked candidate.
    #[serde(with = "humantime_serde")]
    pub ack_timeout: Duration,

    /// A worker missing heartbeats for this long is marked unavailable.
    #[serde(with = "humantime_serde")]
    pub heartbeat_timeout: Duration,

    /// Interval of the registry health sweep.
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,

    /// Validity window for cached task results; also the TTL on the
    /// memory router's read-path cache entries.
    #[serde(with = "humantime_serde")]
    pub cache_ttl: Duration,

    /// Bounded repair attempts after a validation rejection.
    pub max_repair_attempts: u32,

    /// Bounded refresh-and-retry attempts on a shared-memory version
    /// conflict before surfacing `ConcurrentWriteConflict`.
    pub occ_max_retries: u32,

    /// Fan-out defaults applied when a swarm-flagged step carries no
    /// explicit spec.
    pub default_swarm: SwarmSpec,

    /// HTTP bind address for the admission/task API.
    pub bind_addr: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 64,
            min_budget_cost_usd: 0.01,
            ack_timeout: Duration::from_secs(2),
            heartbeat_timeout: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(10),
            cache_ttl: Duration::from_secs(300),
            max_repair_attempts: 2,
            occ_max_retries: 3,
            default_swarm: SwarmSpec::default(),
            bind_addr: "0.0.0.0:8200".to_string(),
        }
    }
}

impl OrchestratorConfig {
    /// Defaults with `KRAKEN_*` environment overrides applied.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(addr) = std::env::var("KRAKEN_BIND_ADDR") {
            config.bind_addr = addr;
        }
        if let Some(capacity) = env_parse("KRAKEN_QUEUE_CAPACITY") {
            config.queue_capacity = capacity;
        }
        if let Some(secs) = env_parse("KRAKEN_CACHE_TTL_SECONDS") {
            config.cache_ttl = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse("KRAKEN_HEARTBEAT_TIMEOUT_SECONDS") {
            config.heartbeat_timeout = Duration::from_secs(secs);
        }
        if let Some(attempts) = env_parse("KRAKEN_MAX_REPAIR_ATTEMPTS") {
            config.max_repair_attempts = attempts;
        }
        config
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = OrchestratorConfig::default();
        assert!(config.queue_capacity > 0);
        assert!(config.ack_timeout < config.cache_ttl);
        assert_eq!(config.default_swarm.fan_out, 3);
    }
}
