//! Graph-store interface shared by the buffer and main graphs.

use super::model::{Direction, LineageEdge, LineageVertex, Upsert};
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Element counts of a graph.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphCounts {
    pub vertices: usize,
    pub edges: usize,
}

/// What a committed transaction changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitSummary {
    pub vertices_created: usize,
    pub edges_created: usize,
}

/// One staged graph operation.
#[derive(Debug, Clone, PartialEq)]
pub enum GraphOp {
    /// Create the vertex unless its guid exists.
    UpsertVertex(LineageVertex),
    /// Fail the transaction unless the vertex exists (or is staged earlier).
    RequireVertex(String),
    /// Create the edge; fails with `RelationshipAlreadyExists` on a known guid.
    AddEdge(LineageEdge),
    /// Create the edge unless an identical one exists.
    EnsureEdge(LineageEdge),
}

/// An all-or-nothing batch of graph operations.
///
/// Nothing is visible until [`GraphStore::commit`] succeeds; a failing
/// operation rolls back the whole batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GraphTransaction {
    ops: Vec<GraphOp>,
}

impl GraphTransaction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert_vertex(&mut self, vertex: LineageVertex) -> &mut Self {
        self.ops.push(GraphOp::UpsertVertex(vertex));
        self
    }

    pub fn require_vertex(&mut self, guid: impl Into<String>) -> &mut Self {
        self.ops.push(GraphOp::RequireVertex(guid.into()));
        self
    }

    pub fn add_edge(&mut self, edge: LineageEdge) -> &mut Self {
        self.ops.push(GraphOp::AddEdge(edge));
        self
    }

    pub fn ensure_edge(&mut self, edge: LineageEdge) -> &mut Self {
        self.ops.push(GraphOp::EnsureEdge(edge));
        self
    }

    pub fn ops(&self) -> &[GraphOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<GraphOp> {
        self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Storage for a property graph of lineage vertices and edges.
///
/// Every method is its own transaction: an element is either fully stored or
/// not stored at all.
#[async_trait]
pub trait GraphStore: Send + Sync {
    async fn vertex(&self, guid: &str) -> Option<LineageVertex>;

    async fn edge(&self, relationship_guid: &str) -> Option<LineageEdge>;

    /// Create the vertex, or return the stored one unchanged.
    async fn upsert_vertex(&self, vertex: LineageVertex) -> Result<Upsert>;

    /// Add an edge between two stored vertices.
    async fn add_edge(&self, edge: LineageEdge) -> Result<()>;

    /// Edges at `guid` in `direction`, with the vertex at the far end.
    async fn neighbors(
        &self,
        guid: &str,
        edge_type: Option<&str>,
        direction: Direction,
    ) -> Vec<(LineageEdge, LineageVertex)>;

    async fn find_by_property(&self, key: &str, value: &str) -> Vec<LineageVertex>;

    async fn vertices_of_type(&self, type_name: &str) -> Vec<LineageVertex>;

    async fn vertices_homed_at(&self, metadata_collection_id: &str) -> Vec<LineageVertex>;

    /// Remove a vertex and its incident edges.
    async fn remove_vertex(&self, guid: &str) -> Result<bool>;

    async fn remove_edge(&self, relationship_guid: &str) -> Result<bool>;

    async fn commit(&self, transaction: GraphTransaction) -> Result<CommitSummary>;

    async fn clear(&self);

    async fn counts(&self) -> GraphCounts;
}
