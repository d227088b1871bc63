// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # KRAKEN Orchestrator CLI
//!
//! The `kraken` binary runs the coordination core as a service: the
//! admission/task HTTP API, the capability registry with its health
//! sweep, the memory router over in-memory stores, and the swarm
//! coordinator.
//!
//! ## Usage
//!
//! ```bash
//! kraken serve --bind 0.0.0.0:8200
//! # development mode with three local echo workers registered:
//! kraken serve --demo-workers
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::info;

use kraken_core::application::capability_router::CapabilityRouter;
use kraken_core::application::memory_router::MemoryRouter;
use kraken_core::application::registry::CapabilityRegistry;
use kraken_core::application::task_machine::TaskMachine;
use kraken_core::config::OrchestratorConfig;
use kraken_core::domain::worker::Capability;
use kraken_core::infrastructure::collaborators::{
    AcceptAllValidator, LocalWorkerClient, PassthroughContentFilter, SingleStepPlanner,
};
use kraken_core::infrastructure::event_bus::EventBus;
use kraken_core::infrastructure::stores::{
    InMemoryEpisodicStore, InMemorySharedStore, InMemoryTtlCache,
};
use kraken_core::presentation::api::{self, AppState};
use kraken_swarm::SwarmCoordinator;

/// KRAKEN orchestrator - coordination core for the arm fleet
#[derive(Parser)]
#[command(name = "kraken")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "KRAKEN_LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the orchestrator service (default)
    Serve {
        /// HTTP bind address
        #[arg(long, env = "KRAKEN_BIND_ADDR")]
        bind: Option<String>,

        /// Register three local echo workers for development
        #[arg(long)]
        demo_workers: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("{},kraken_core=debug", cli.log_level).into()),
        )
        .init();

    let (bind, demo_workers) = match cli.command {
        Some(Commands::Serve { bind, demo_workers }) => (bind, demo_workers),
        None => (None, false),
    };

    let mut config = OrchestratorConfig::from_env();
    if let Some(bind) = bind {
        config.bind_addr = bind;
    }

    serve(config, demo_workers).await
}

async fn serve(config: OrchestratorConfig, demo_workers: bool) -> Result<()> {
    info!(version = env!("CARGO_PKG_VERSION"), "Starting KRAKEN orchestrator");

    let prometheus = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("failed to install metrics recorder: {e}"))?;

    let event_bus = Arc::new(EventBus::with_default_capacity());
    let registry = Arc::new(CapabilityRegistry::new(
        config.heartbeat_timeout,
        Arc::clone(&event_bus),
    ));
    let _sweeper = registry.start_sweeper(config.sweep_interval);

    let client = LocalWorkerClient::new();
    if demo_workers {
        register_demo_workers(&registry, &client).await;
    }

    let router = Arc::new(CapabilityRouter::new(
        Arc::clone(&registry),
        Arc::clone(&client) as _,
        Arc::clone(&event_bus),
        config.ack_timeout,
    ));
    let validator = Arc::new(AcceptAllValidator);
    let swarm = Arc::new(SwarmCoordinator::new(
        Arc::clone(&registry),
        Arc::clone(&client) as _,
        Arc::clone(&validator) as _,
        Arc::clone(&event_bus),
        config.ack_timeout,
    ));
    let memory = Arc::new(MemoryRouter::new(
        Arc::new(InMemorySharedStore::new()),
        Arc::new(InMemoryEpisodicStore::new()),
        InMemoryTtlCache::new(),
        Arc::new(PassthroughContentFilter),
        Arc::clone(&event_bus),
        config.cache_ttl,
        config.occ_max_retries,
    ));

    let bind_addr = config.bind_addr.clone();
    let machine = Arc::new(TaskMachine::new(
        config,
        Arc::clone(&registry),
        router,
        swarm,
        memory,
        Arc::new(SingleStepPlanner),
        validator,
        Arc::clone(&event_bus),
    ));

    let state = Arc::new(AppState {
        machine,
        registry,
        started_at: chrono::Utc::now(),
        prometheus: Some(prometheus),
    });

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;
    info!(bind = %bind_addr, "Admission API listening");
    axum::serve(listener, api::app(state))
        .await
        .context("HTTP server terminated")?;
    Ok(())
}

/// Development fleet: three echo workers covering the execution
/// capability, enough for swarm fan-out to be meaningful.
async fn register_demo_workers(registry: &Arc<CapabilityRegistry>, client: &Arc<LocalWorkerClient>) {
    for index in 0..3 {
        let mut capabilities = BTreeMap::new();
        capabilities.insert(Capability::Execution, "0.1.0".to_string());
        let worker_id = registry
            .register(format!("echo-worker-{index}"), capabilities)
            .await;
        client.register(worker_id, move |request| async move {
            Ok((
                serde_json::json!({ "echo": request.input, "step": request.step_id }),
                0.9,
            ))
        });
        info!(worker_id = %worker_id, "Registered demo worker");
    }
}
