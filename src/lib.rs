//! Cohort - cohort membership, federated metadata reads and lineage graph
//! synchronization for a federation of independent metadata repositories.
//!
//! Each member of a cohort keeps its own repository. A node of this crate
//! tracks the other members, answers reads across all of them and keeps a
//! consolidated lineage graph built from replicated lineage events.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Cohort                             │
//! ├─────────────────────────────────────────────────────────────┤
//! │  HTTP: Repository API | Admin API | Federation | Lineage    │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Membership: Member Registry | Connectors | Event Router    │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Instances: Local Repository | Reference Copies | Codec     │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Lineage: Buffer Graph | Promoter | Main Graph | Queries    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```no_run
//! use cohort::config::CohortConfig;
//!
//! #[tokio::main]
//! async fn main() -> cohort::Result<()> {
//!     let config = CohortConfig::development();
//!     cohort::run(config).await
//! }
//! ```

pub mod config;
pub mod error;

pub mod cohort;
pub mod events;
pub mod federation;
pub mod graph;
pub mod instance;
pub mod lineage;
pub mod node;
pub mod refcopy;
pub mod repository;
pub mod server;
pub mod shutdown;

pub mod cli;
pub mod client;
pub mod observability;

pub use error::{CohortError, Result};

use config::CohortConfig;
use node::CohortNode;
use server::ServerState;
use shutdown::{ServiceHandle, ShutdownManager, SignalHandler};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Run a cohort node with the given configuration until a shutdown signal.
pub async fn run(config: CohortConfig) -> Result<()> {
    observability::init(&config.observability)?;
    info!(
        collection = %config.local.metadata_collection_id,
        server = %config.local.server_name,
        "Starting cohort node"
    );

    let node = Arc::new(CohortNode::from_config(&config).await?);
    let coordinator = node.shutdown_coordinator().clone();
    let mut shutdown_manager = ShutdownManager::new(coordinator.clone());
    let mut handles = Vec::new();

    if config.observability.metrics_enabled {
        let obs_config = config.observability.clone();
        let stop = coordinator.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) =
                observability::run_metrics_server(obs_config, async move { stop.wait_for_shutdown().await })
                    .await
            {
                error!("Metrics server error: {}", e);
            }
        });
        handles.push(("metrics", handle.abort_handle()));
        shutdown_manager.register(ServiceHandle::task("metrics", handle));
    }

    let (events_tx, events_rx) = mpsc::channel(config.lineage.event_queue_capacity);

    let watcher = node.spawn_cohort_watcher();
    handles.push(("cohort-watcher", watcher.abort_handle()));
    shutdown_manager.register(ServiceHandle::task("cohort-watcher", watcher));

    let pump = node.spawn_event_pump(events_rx);
    handles.push(("event-pump", pump.abort_handle()));
    shutdown_manager.register(ServiceHandle::task("event-pump", pump));

    let promoter = node.spawn_promoter(config.lineage.promotion_interval);
    handles.push(("promoter", promoter.abort_handle()));
    shutdown_manager.register(ServiceHandle::task("promoter", promoter));

    let state = ServerState {
        node: node.clone(),
        events: events_tx,
    };
    let bind_addr = config.server.bind_addr;
    let stop = coordinator.clone();
    let api_coordinator = coordinator.clone();
    let api = tokio::spawn(async move {
        if let Err(e) =
            server::run_server(bind_addr, state, async move { stop.wait_for_shutdown().await }).await
        {
            error!("Cohort API error: {}", e);
            api_coordinator.shutdown();
        }
    });
    handles.push(("api", api.abort_handle()));
    shutdown_manager.register(ServiceHandle::task("api", api));

    let signal_coordinator = coordinator.clone();
    tokio::spawn(async move {
        SignalHandler::new(signal_coordinator).run().await;
    });

    coordinator.wait_for_shutdown().await;
    info!("Shutting down cohort node gracefully...");

    if !shutdown_manager.run().await {
        for (name, handle) in handles {
            if !handle.is_finished() {
                warn!(service = %name, "Force aborting service");
                handle.abort();
            }
        }
    }

    info!("Cohort node shutdown complete");
    Ok(())
}
