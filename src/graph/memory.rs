// Embedded in-memory graph store

use super::model::{Direction, LineageEdge, LineageVertex, Upsert};
use super::store::{CommitSummary, GraphCounts, GraphOp, GraphStore, GraphTransaction};
use crate::error::{CohortError, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;

#[derive(Default)]
struct GraphState {
    /// Vertices by guid
    vertices: HashMap<String, LineageVertex>,
    /// Edges by relationship guid
    edges: HashMap<String, LineageEdge>,
    /// Outgoing edges: vertex guid -> relationship guids
    outgoing: HashMap<String, Vec<String>>,
    /// Incoming edges: vertex guid -> relationship guids
    incoming: HashMap<String, Vec<String>>,
}

impl GraphState {
    fn insert_edge(&mut self, edge: LineageEdge) {
        self.outgoing
            .entry(edge.source_guid.clone())
            .or_default()
            .push(edge.relationship_guid.clone());
        self.incoming
            .entry(edge.destination_guid.clone())
            .or_default()
            .push(edge.relationship_guid.clone());
        self.edges.insert(edge.relationship_guid.clone(), edge);
    }

    fn take_edge(&mut self, relationship_guid: &str) -> Option<LineageEdge> {
        let edge = self.edges.remove(relationship_guid)?;
        if let Some(ids) = self.outgoing.get_mut(&edge.source_guid) {
            ids.retain(|id| id != relationship_guid);
        }
        if let Some(ids) = self.incoming.get_mut(&edge.destination_guid) {
            ids.retain(|id| id != relationship_guid);
        }
        Some(edge)
    }

    fn check_endpoints(&self, edge: &LineageEdge, staged: &HashSet<String>) -> Result<()> {
        for guid in [&edge.source_guid, &edge.destination_guid] {
            if !self.vertices.contains_key(guid) && !staged.contains(guid) {
                return Err(CohortError::EdgeCreation(format!(
                    "edge {} refers to missing vertex {}",
                    edge.relationship_guid, guid
                )));
            }
        }
        Ok(())
    }
}

/// Graph store kept entirely in memory.
#[derive(Default)]
pub struct MemoryGraphStore {
    state: RwLock<GraphState>,
}

impl MemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GraphStore for MemoryGraphStore {
    async fn vertex(&self, guid: &str) -> Option<LineageVertex> {
        self.state.read().await.vertices.get(guid).cloned()
    }

    async fn edge(&self, relationship_guid: &str) -> Option<LineageEdge> {
        self.state.read().await.edges.get(relationship_guid).cloned()
    }

    async fn upsert_vertex(&self, vertex: LineageVertex) -> Result<Upsert> {
        vertex.check()?;
        let mut state = self.state.write().await;
        if let Some(existing) = state.vertices.get(&vertex.guid) {
            return Ok(Upsert::Existing(existing.clone()));
        }
        state.vertices.insert(vertex.guid.clone(), vertex.clone());
        Ok(Upsert::Created(vertex))
    }

    async fn add_edge(&self, edge: LineageEdge) -> Result<()> {
        edge.check()?;
        let mut state = self.state.write().await;
        if state.edges.contains_key(&edge.relationship_guid) {
            return Err(CohortError::RelationshipAlreadyExists(edge.relationship_guid));
        }
        state.check_endpoints(&edge, &HashSet::new())?;
        state.insert_edge(edge);
        Ok(())
    }

    async fn neighbors(
        &self,
        guid: &str,
        edge_type: Option<&str>,
        direction: Direction,
    ) -> Vec<(LineageEdge, LineageVertex)> {
        let state = self.state.read().await;
        let index = match direction {
            Direction::Outgoing => &state.outgoing,
            Direction::Incoming => &state.incoming,
        };

        let mut result: Vec<(LineageEdge, LineageVertex)> = index
            .get(guid)
            .into_iter()
            .flatten()
            .filter_map(|id| state.edges.get(id))
            .filter(|edge| edge_type.map_or(true, |t| edge.edge_type == t))
            .filter_map(|edge| {
                state
                    .vertices
                    .get(edge.far_end(direction))
                    .map(|v| (edge.clone(), v.clone()))
            })
            .collect();
        result.sort_by(|a, b| a.0.relationship_guid.cmp(&b.0.relationship_guid));
        result
    }

    async fn find_by_property(&self, key: &str, value: &str) -> Vec<LineageVertex> {
        let state = self.state.read().await;
        let mut found: Vec<LineageVertex> = state
            .vertices
            .values()
            .filter(|v| v.property(key) == Some(value))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.guid.cmp(&b.guid));
        found
    }

    async fn vertices_of_type(&self, type_name: &str) -> Vec<LineageVertex> {
        let state = self.state.read().await;
        let mut found: Vec<LineageVertex> = state
            .vertices
            .values()
            .filter(|v| v.type_name == type_name)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.guid.cmp(&b.guid));
        found
    }

    async fn vertices_homed_at(&self, metadata_collection_id: &str) -> Vec<LineageVertex> {
        let state = self.state.read().await;
        state
            .vertices
            .values()
            .filter(|v| v.home_collection_id.as_deref() == Some(metadata_collection_id))
            .cloned()
            .collect()
    }

    async fn remove_vertex(&self, guid: &str) -> Result<bool> {
        let mut state = self.state.write().await;
        if state.vertices.remove(guid).is_none() {
            return Ok(false);
        }

        let mut incident: Vec<String> = state.outgoing.remove(guid).unwrap_or_default();
        incident.extend(state.incoming.remove(guid).unwrap_or_default());
        for id in incident {
            state.take_edge(&id);
        }
        Ok(true)
    }

    async fn remove_edge(&self, relationship_guid: &str) -> Result<bool> {
        let mut state = self.state.write().await;
        Ok(state.take_edge(relationship_guid).is_some())
    }

    async fn commit(&self, transaction: GraphTransaction) -> Result<CommitSummary> {
        let mut state = self.state.write().await;

        // Validate the whole batch against the current state plus earlier
        // staged operations before touching anything.
        let mut staged_vertices: HashSet<String> = HashSet::new();
        let mut staged_edges: HashSet<String> = HashSet::new();
        let mut to_create: Vec<GraphOp> = Vec::new();

        for op in transaction.into_ops() {
            match op {
                GraphOp::UpsertVertex(vertex) => {
                    vertex.check()?;
                    if state.vertices.contains_key(&vertex.guid)
                        || !staged_vertices.insert(vertex.guid.clone())
                    {
                        continue;
                    }
                    to_create.push(GraphOp::UpsertVertex(vertex));
                }
                GraphOp::RequireVertex(guid) => {
                    if !state.vertices.contains_key(&guid) && !staged_vertices.contains(&guid) {
                        return Err(CohortError::VertexCreation(format!(
                            "required vertex {} is missing",
                            guid
                        )));
                    }
                }
                GraphOp::AddEdge(edge) => {
                    edge.check()?;
                    if state.edges.contains_key(&edge.relationship_guid)
                        || staged_edges.contains(&edge.relationship_guid)
                    {
                        return Err(CohortError::RelationshipAlreadyExists(edge.relationship_guid));
                    }
                    state.check_endpoints(&edge, &staged_vertices)?;
                    staged_edges.insert(edge.relationship_guid.clone());
                    to_create.push(GraphOp::AddEdge(edge));
                }
                GraphOp::EnsureEdge(edge) => {
                    edge.check()?;
                    if let Some(existing) = state.edges.get(&edge.relationship_guid) {
                        if *existing != edge {
                            return Err(CohortError::EdgeCreation(format!(
                                "edge {} already exists with different endpoints",
                                edge.relationship_guid
                            )));
                        }
                        continue;
                    }
                    if !staged_edges.insert(edge.relationship_guid.clone()) {
                        continue;
                    }
                    state.check_endpoints(&edge, &staged_vertices)?;
                    to_create.push(GraphOp::AddEdge(edge));
                }
            }
        }

        let mut summary = CommitSummary::default();
        for op in to_create {
            match op {
                GraphOp::UpsertVertex(vertex) => {
                    state.vertices.insert(vertex.guid.clone(), vertex);
                    summary.vertices_created += 1;
                }
                GraphOp::AddEdge(edge) => {
                    state.insert_edge(edge);
                    summary.edges_created += 1;
                }
                GraphOp::RequireVertex(_) | GraphOp::EnsureEdge(_) => {}
            }
        }
        Ok(summary)
    }

    async fn clear(&self) {
        let mut state = self.state.write().await;
        *state = GraphState::default();
    }

    async fn counts(&self) -> GraphCounts {
        let state = self.state.read().await;
        GraphCounts {
            vertices: state.vertices.len(),
            edges: state.edges.len(),
        }
    }
}
