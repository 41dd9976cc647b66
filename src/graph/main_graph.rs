//! Consolidated lineage graph.

use super::model::{Direction, LineageEdge, LineageVertex, Upsert};
use super::store::{CommitSummary, GraphCounts, GraphStore, GraphTransaction};
use crate::error::Result;
use metrics::counter;
use std::sync::Arc;
use tracing::info;

/// The main graph: data-asset vertices mirrored from ingestion plus the
/// promoted `SubProcess`/`Process` structure linking them.
///
/// Elements are only ever removed by [`MainGraph::reset`].
#[derive(Clone)]
pub struct MainGraph {
    store: Arc<dyn GraphStore>,
}

impl MainGraph {
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self { store }
    }

    pub async fn vertex(&self, guid: &str) -> Option<LineageVertex> {
        self.store.vertex(guid).await
    }

    pub async fn contains(&self, guid: &str) -> bool {
        self.store.vertex(guid).await.is_some()
    }

    pub async fn upsert_vertex(&self, vertex: LineageVertex) -> Result<Upsert> {
        self.store.upsert_vertex(vertex).await
    }

    pub async fn neighbors(
        &self,
        guid: &str,
        edge_type: Option<&str>,
        direction: Direction,
    ) -> Vec<(LineageEdge, LineageVertex)> {
        self.store.neighbors(guid, edge_type, direction).await
    }

    /// Apply a batch of operations atomically.
    pub async fn commit(&self, transaction: GraphTransaction) -> Result<CommitSummary> {
        let summary = self.store.commit(transaction).await?;
        counter!("cohort_main_vertices_created_total").increment(summary.vertices_created as u64);
        counter!("cohort_main_edges_created_total").increment(summary.edges_created as u64);
        Ok(summary)
    }

    pub async fn counts(&self) -> GraphCounts {
        self.store.counts().await
    }

    /// Drop every element.
    pub async fn reset(&self) {
        let before = self.store.counts().await;
        self.store.clear().await;
        info!(vertices = before.vertices, edges = before.edges, "Main graph reset");
    }
}
