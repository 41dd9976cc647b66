//! Background consolidation of buffered lineage into the main graph.

use super::paths::{resolve_process_paths, LineageTriple};
use crate::error::Result;
use crate::graph::{BufferGraph, GraphTransaction, LineageEdge, LineageVertex, MainGraph};
use crate::instance::names;
use crate::observability;
use crate::shutdown::ShutdownCoordinator;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Edge type of column-to-subprocess-to-column flow in the main graph.
pub const DATA_FLOW: &str = "DataFlow";

/// Edge type linking a subprocess to its process.
pub const INCLUDED_IN: &str = "IncludedIn";

/// Namespace for subprocess guids.
const SUB_PROCESS_NAMESPACE: Uuid = Uuid::from_bytes([
    0x6c, 0x1e, 0x0f, 0x52, 0x3b, 0x8d, 0x4a, 0x61, 0x9e, 0x27, 0xd4, 0x05, 0x7a, 0xc3, 0x18, 0x9b,
]);

/// Deterministic guid of the subprocess for one input/process/output triple.
pub fn sub_process_guid(input_guid: &str, process_guid: &str, output_guid: &str) -> String {
    let name = format!("{}|{}|{}", input_guid, process_guid, output_guid);
    Uuid::new_v5(&SUB_PROCESS_NAMESPACE, name.as_bytes()).to_string()
}

/// Summary of one promotion run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromotionReport {
    /// Processes without a marker that were looked at
    pub processes_examined: usize,
    /// Processes fully promoted and marked
    pub processes_promoted: usize,
    /// Processes left for a later run
    pub processes_deferred: usize,
    pub triples_promoted: usize,
    /// Triples whose columns are not in the main graph yet
    pub triples_skipped: usize,
    /// Processes whose commit failed and was rolled back
    pub failures: usize,
    /// The run stopped early because of shutdown
    pub cancelled: bool,
}

enum ProcessOutcome {
    Promoted { triples: usize },
    Deferred { triples: usize, skipped: usize },
}

/// Promotes process lineage from the buffer graph into the main graph.
///
/// Runs are mutually exclusive. Each process is committed in its own
/// transaction, so a failure or cancellation never leaves a half-promoted
/// subprocess behind.
pub struct LineagePromoter {
    buffer: BufferGraph,
    main: MainGraph,
    run_lock: Mutex<()>,
}

impl LineagePromoter {
    pub fn new(buffer: BufferGraph, main: MainGraph) -> Self {
        Self {
            buffer,
            main,
            run_lock: Mutex::new(()),
        }
    }

    /// Run one promotion pass over every unmarked process.
    pub async fn run_once(&self, shutdown: &ShutdownCoordinator) -> PromotionReport {
        let _running = self.run_lock.lock().await;
        let started = Instant::now();
        let mut report = PromotionReport::default();

        for process in self.buffer.processes().await {
            if shutdown.is_shutting_down() {
                report.cancelled = true;
                break;
            }
            if self.buffer.is_promoted(&process.guid).await {
                continue;
            }
            report.processes_examined += 1;

            match self.promote_process(&process).await {
                Ok(ProcessOutcome::Promoted { triples }) => {
                    report.processes_promoted += 1;
                    report.triples_promoted += triples;
                }
                Ok(ProcessOutcome::Deferred { triples, skipped }) => {
                    report.processes_deferred += 1;
                    report.triples_promoted += triples;
                    report.triples_skipped += skipped;
                }
                Err(e) => {
                    warn!(process = %process.guid, error = %e, "Process promotion rolled back");
                    report.failures += 1;
                }
            }
        }

        let elapsed = started.elapsed();
        observability::record_promotion(&report, elapsed);
        info!(
            examined = report.processes_examined,
            promoted = report.processes_promoted,
            deferred = report.processes_deferred,
            triples = report.triples_promoted,
            elapsed_ms = elapsed.as_millis() as u64,
            "Lineage promotion run finished"
        );
        report
    }

    async fn promote_process(&self, process: &LineageVertex) -> Result<ProcessOutcome> {
        let paths = resolve_process_paths(&self.buffer, process).await;

        let mut ready: Vec<&LineageTriple> = Vec::new();
        let mut skipped = 0;
        for triple in &paths.triples {
            if self.main.contains(&triple.input.guid).await
                && self.main.contains(&triple.output.guid).await
            {
                ready.push(triple);
            } else {
                debug!(
                    process = %process.guid,
                    input = %triple.input.guid,
                    output = %triple.output.guid,
                    "Columns not in main graph yet, skipping"
                );
                skipped += 1;
            }
        }

        if !ready.is_empty() {
            let mut tx = GraphTransaction::new();
            tx.upsert_vertex(process.clone());
            for triple in &ready {
                stage_triple(&mut tx, process, triple);
            }
            self.main.commit(tx).await?;
        }

        if paths.is_complete() && skipped == 0 {
            self.buffer.mark_promoted(&process.guid).await?;
            Ok(ProcessOutcome::Promoted {
                triples: ready.len(),
            })
        } else {
            if !paths.unresolved_inputs.is_empty() {
                debug!(
                    process = %process.guid,
                    unresolved = paths.unresolved_inputs.len(),
                    "No path found for some inputs"
                );
            }
            Ok(ProcessOutcome::Deferred {
                triples: ready.len(),
                skipped,
            })
        }
    }

    /// Run promotion on an interval until shutdown.
    pub fn spawn(self: Arc<Self>, every: Duration, shutdown: ShutdownCoordinator) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(interval_ms = every.as_millis() as u64, "Lineage promoter started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.run_once(&shutdown).await;
                    }
                    _ = shutdown.wait_for_shutdown() => {
                        info!("Lineage promoter stopping");
                        break;
                    }
                }
            }
        })
    }
}

fn stage_triple(tx: &mut GraphTransaction, process: &LineageVertex, triple: &LineageTriple) {
    let guid = sub_process_guid(&triple.input.guid, &process.guid, &triple.output.guid);
    let name = format!(
        "{}:{}->{}",
        process.display_name, triple.input.display_name, triple.output.display_name
    );
    let sub_process = LineageVertex::new(guid.clone(), names::SUB_PROCESS)
        .with_display_name(&process.display_name)
        .with_qualified_name(&name)
        .with_property("processGuid", &process.guid)
        .with_property("inputGuid", &triple.input.guid)
        .with_property("outputGuid", &triple.output.guid);

    tx.require_vertex(triple.input.guid.clone())
        .require_vertex(triple.output.guid.clone())
        .upsert_vertex(sub_process)
        .ensure_edge(LineageEdge::new(
            format!("{}:in", guid),
            DATA_FLOW,
            triple.input.guid.clone(),
            guid.clone(),
        ))
        .ensure_edge(LineageEdge::new(
            format!("{}:out", guid),
            DATA_FLOW,
            guid.clone(),
            triple.output.guid.clone(),
        ))
        .ensure_edge(LineageEdge::new(
            format!("{}:process", guid),
            INCLUDED_IN,
            guid,
            process.guid.clone(),
        ));
}
