//! Observability module for cohort nodes.
//!
//! Provides logging setup and the Prometheus metrics endpoint.

use crate::cohort::CohortStatus;
use crate::config::ObservabilityConfig;
use crate::error::{CohortError, Result};
use crate::events::EventOutcome;
use crate::graph::GraphCounts;
use crate::lineage::PromotionReport;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize observability (logging).
pub fn init(config: &ObservabilityConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber
            .with(fmt::layer().json())
            .try_init()
            .map_err(|e| CohortError::Internal(format!("Failed to init logging: {}", e)))?;
    } else {
        subscriber
            .with(fmt::layer())
            .try_init()
            .map_err(|e| CohortError::Internal(format!("Failed to init logging: {}", e)))?;
    }

    info!("Observability initialized");
    Ok(())
}

/// Run the Prometheus metrics server until `shutdown` resolves.
pub async fn run_metrics_server(
    config: ObservabilityConfig,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| CohortError::Internal(format!("Failed to install metrics recorder: {}", e)))?;

    register_metrics();

    let app = axum::Router::new()
        .route(
            "/metrics",
            axum::routing::get(move || async move { handle.render() }),
        )
        .route("/health", axum::routing::get(|| async { "OK" }));

    let listener = TcpListener::bind(config.metrics_addr).await?;
    info!(addr = %config.metrics_addr, "Metrics server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| CohortError::Network(e.to_string()))?;

    Ok(())
}

/// Register standard metrics so they render before first use.
fn register_metrics() {
    // Cohort
    gauge!("cohort_members_total").set(0.0);

    // Replication
    counter!("cohort_refcopies_purged_total").absolute(0);
    counter!("cohort_events_total").absolute(0);

    // Graphs
    gauge!("cohort_buffer_vertices").set(0.0);
    gauge!("cohort_buffer_edges").set(0.0);
    gauge!("cohort_main_vertices").set(0.0);
    gauge!("cohort_main_edges").set(0.0);

    // Promotion
    counter!("cohort_promotion_runs_total").absolute(0);
    counter!("cohort_promotion_processes_promoted_total").absolute(0);
    counter!("cohort_promotion_failures_total").absolute(0);
}

/// Record a routed inbound event.
pub fn record_event(event_type: &'static str, outcome: &EventOutcome) {
    let outcome = match outcome {
        EventOutcome::Applied => "applied",
        EventOutcome::Ignored => "ignored",
        EventOutcome::Dropped(_) => "dropped",
    };
    counter!("cohort_events_total", "type" => event_type, "outcome" => outcome).increment(1);
}

/// Record the result of one promotion run.
pub fn record_promotion(report: &PromotionReport, elapsed: Duration) {
    counter!("cohort_promotion_runs_total").increment(1);
    counter!("cohort_promotion_processes_promoted_total")
        .increment(report.processes_promoted as u64);
    counter!("cohort_promotion_triples_total").increment(report.triples_promoted as u64);
    counter!("cohort_promotion_failures_total").increment(report.failures as u64);
    gauge!("cohort_promotion_deferred_processes").set(report.processes_deferred as f64);
    histogram!("cohort_promotion_duration_seconds").record(elapsed.as_secs_f64());
}

/// Update membership and graph size gauges.
pub fn update_cohort_metrics(status: &CohortStatus, buffer: GraphCounts, main: GraphCounts) {
    gauge!("cohort_members_total").set(status.total_members as f64);
    gauge!("cohort_buffer_vertices").set(buffer.vertices as f64);
    gauge!("cohort_buffer_edges").set(buffer.edges as f64);
    gauge!("cohort_main_vertices").set(main.vertices as f64);
    gauge!("cohort_main_edges").set(main.edges as f64);
}
