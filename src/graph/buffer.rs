//! Staging graph for lineage facts received as change events.

use super::model::{Direction, LineageEdge, LineageVertex, Upsert};
use super::store::{GraphCounts, GraphStore, GraphTransaction};
use crate::error::Result;
use crate::instance::names;
use metrics::counter;
use std::sync::Arc;
use tracing::{debug, info};

/// Vertex type recording that a process has been fully promoted.
pub const INITIAL_LOAD_MARKER: &str = "InitialLoadMarker";

/// Edge type linking a marker to its process.
pub const MARKS: &str = "MarksInitialLoad";

/// Guid of the marker vertex for a process.
pub fn marker_guid(process_guid: &str) -> String {
    format!("initial-load:{}", process_guid)
}

/// The buffer graph.
///
/// Vertices are upserted first-writer-wins; edges are keyed by relationship
/// guid and never duplicated.
#[derive(Clone)]
pub struct BufferGraph {
    store: Arc<dyn GraphStore>,
}

impl BufferGraph {
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn GraphStore> {
        &self.store
    }

    /// Create the vertex unless its guid is already present.
    pub async fn upsert_vertex(&self, vertex: LineageVertex) -> Result<Upsert> {
        let upsert = self.store.upsert_vertex(vertex).await?;
        if upsert.is_created() {
            debug!(guid = %upsert.vertex().guid, type_name = %upsert.vertex().type_name, "Buffer vertex created");
            counter!("cohort_buffer_vertices_created_total").increment(1);
        }
        Ok(upsert)
    }

    /// Add a relationship edge; a known relationship guid is rejected.
    pub async fn add_edge(
        &self,
        relationship_guid: &str,
        edge_type: &str,
        from: &str,
        to: &str,
    ) -> Result<()> {
        self.store
            .add_edge(LineageEdge::new(relationship_guid, edge_type, from, to))
            .await?;
        counter!("cohort_buffer_edges_created_total").increment(1);
        Ok(())
    }

    pub async fn vertex(&self, guid: &str) -> Option<LineageVertex> {
        self.store.vertex(guid).await
    }

    pub async fn edge(&self, relationship_guid: &str) -> Option<LineageEdge> {
        self.store.edge(relationship_guid).await
    }

    pub async fn neighbors(
        &self,
        guid: &str,
        edge_type: Option<&str>,
        direction: Direction,
    ) -> Vec<(LineageEdge, LineageVertex)> {
        self.store.neighbors(guid, edge_type, direction).await
    }

    /// All process vertices, sorted by guid.
    pub async fn processes(&self) -> Vec<LineageVertex> {
        self.store.vertices_of_type(names::PROCESS).await
    }

    pub async fn remove_vertex(&self, guid: &str) -> Result<bool> {
        self.store.remove_vertex(guid).await
    }

    pub async fn remove_edge(&self, relationship_guid: &str) -> Result<bool> {
        self.store.remove_edge(relationship_guid).await
    }

    /// Remove every vertex homed at a member, with its incident edges.
    pub async fn purge_member(&self, metadata_collection_id: &str) -> Result<usize> {
        let homed = self.store.vertices_homed_at(metadata_collection_id).await;
        let mut removed = 0;
        for vertex in homed {
            if self.store.remove_vertex(&vertex.guid).await? {
                removed += 1;
            }
        }
        info!(member = %metadata_collection_id, removed, "Purged buffer vertices");
        Ok(removed)
    }

    pub async fn is_promoted(&self, process_guid: &str) -> bool {
        self.store.vertex(&marker_guid(process_guid)).await.is_some()
    }

    /// Record that a process was fully promoted.
    pub async fn mark_promoted(&self, process_guid: &str) -> Result<()> {
        let guid = marker_guid(process_guid);
        let mut tx = GraphTransaction::new();
        tx.require_vertex(process_guid)
            .upsert_vertex(
                LineageVertex::new(guid.clone(), INITIAL_LOAD_MARKER)
                    .with_property("processGuid", process_guid),
            )
            .ensure_edge(LineageEdge::new(
                format!("{}:edge", guid),
                MARKS,
                guid,
                process_guid,
            ));
        self.store.commit(tx).await?;
        Ok(())
    }

    /// Drop every marker so all processes are promoted again.
    pub async fn clear_markers(&self) -> Result<usize> {
        let markers = self.store.vertices_of_type(INITIAL_LOAD_MARKER).await;
        let mut removed = 0;
        for marker in markers {
            if self.store.remove_vertex(&marker.guid).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    pub async fn counts(&self) -> GraphCounts {
        self.store.counts().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CohortError;
    use crate::graph::MemoryGraphStore;

    fn buffer() -> BufferGraph {
        BufferGraph::new(Arc::new(MemoryGraphStore::new()))
    }

    #[tokio::test]
    async fn test_idempotent_upsert() {
        let buffer = buffer();
        let vertex = LineageVertex::new("v1", names::RELATIONAL_COLUMN);

        assert!(buffer.upsert_vertex(vertex.clone()).await.unwrap().is_created());
        let again = buffer.upsert_vertex(vertex.clone()).await.unwrap();
        assert_eq!(again, Upsert::Existing(vertex));
        assert_eq!(buffer.counts().await.vertices, 1);
    }

    #[tokio::test]
    async fn test_duplicate_relationship() {
        let buffer = buffer();
        buffer.upsert_vertex(LineageVertex::new("a", names::RELATIONAL_COLUMN)).await.unwrap();
        buffer.upsert_vertex(LineageVertex::new("b", names::RELATIONAL_COLUMN)).await.unwrap();

        buffer.add_edge("r1", names::LINEAGE_MAPPING, "a", "b").await.unwrap();
        let dup = buffer.add_edge("r1", names::LINEAGE_MAPPING, "a", "b").await;
        assert!(matches!(dup, Err(CohortError::RelationshipAlreadyExists(_))));
        assert_eq!(buffer.counts().await.edges, 1);
    }

    #[tokio::test]
    async fn test_markers() {
        let buffer = buffer();
        buffer.upsert_vertex(LineageVertex::new("p1", names::PROCESS)).await.unwrap();

        assert!(!buffer.is_promoted("p1").await);
        buffer.mark_promoted("p1").await.unwrap();
        buffer.mark_promoted("p1").await.unwrap();
        assert!(buffer.is_promoted("p1").await);
        assert_eq!(buffer.processes().await.len(), 1);

        assert_eq!(buffer.clear_markers().await.unwrap(), 1);
        assert!(!buffer.is_promoted("p1").await);
        assert!(buffer.mark_promoted("unknown").await.is_err());
    }

    #[tokio::test]
    async fn test_purge_member() {
        let buffer = buffer();
        buffer
            .upsert_vertex(LineageVertex::new("a", names::RELATIONAL_COLUMN).with_home("M2"))
            .await
            .unwrap();
        buffer
            .upsert_vertex(LineageVertex::new("b", names::RELATIONAL_COLUMN).with_home("M3"))
            .await
            .unwrap();
        buffer.add_edge("r1", names::LINEAGE_MAPPING, "a", "b").await.unwrap();

        assert_eq!(buffer.purge_member("M2").await.unwrap(), 1);
        assert_eq!(buffer.counts().await, GraphCounts { vertices: 1, edges: 0 });
    }
}
