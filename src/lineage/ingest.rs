//! Applies lineage facts to the buffer graph.

use crate::error::{CohortError, Result};
use crate::graph::{BufferGraph, Direction, GraphTransaction, LineageEdge, LineageVertex, MainGraph};
use crate::instance::names;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Payload of a lineage edge change event: one relationship and both of its
/// end vertices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineageFact {
    pub relationship_guid: String,
    pub edge_type: String,
    pub from: LineageVertex,
    pub to: LineageVertex,
}

/// What ingesting a fact did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// The edge was added.
    Added,
    /// The relationship guid was already in the buffer graph.
    Duplicate,
}

/// Vertex types mirrored into the main graph as soon as they are seen.
const DATA_ASSET_TYPES: &[&str] = &[
    names::RELATIONAL_COLUMN,
    names::TABULAR_COLUMN,
    names::RELATIONAL_TABLE,
    names::DATA_FILE,
    names::DATABASE,
];

pub fn is_data_asset(type_name: &str) -> bool {
    DATA_ASSET_TYPES.contains(&type_name)
}

/// Writes lineage facts into the buffer graph and mirrors data assets into
/// the main graph so promotion can attach to them.
#[derive(Clone)]
pub struct LineageIngestor {
    buffer: BufferGraph,
    main: MainGraph,
}

impl LineageIngestor {
    pub fn new(buffer: BufferGraph, main: MainGraph) -> Self {
        Self { buffer, main }
    }

    pub async fn ingest(&self, fact: LineageFact) -> Result<IngestOutcome> {
        let LineageFact {
            relationship_guid,
            edge_type,
            from,
            to,
        } = fact;
        let (from_guid, to_guid) = (from.guid.clone(), to.guid.clone());
        let structural = edge_type != names::LINEAGE_MAPPING
            && is_data_asset(&from.type_name)
            && is_data_asset(&to.type_name);

        for vertex in [from, to] {
            if is_data_asset(&vertex.type_name) {
                self.main.upsert_vertex(vertex.clone()).await?;
            }
            self.buffer.upsert_vertex(vertex).await?;
        }

        let outcome = match self
            .buffer
            .add_edge(&relationship_guid, &edge_type, &from_guid, &to_guid)
            .await
        {
            Ok(()) => IngestOutcome::Added,
            Err(CohortError::RelationshipAlreadyExists(_)) => {
                debug!(relationship = %relationship_guid, "Lineage edge already buffered");
                IngestOutcome::Duplicate
            }
            Err(e) => return Err(e),
        };

        // Structure between data assets (table to column, file to schema)
        // backs vertical lineage queries.
        if structural {
            let mut tx = GraphTransaction::new();
            tx.ensure_edge(LineageEdge::new(relationship_guid, edge_type, from_guid, to_guid));
            self.main.commit(tx).await?;
        }
        Ok(outcome)
    }

    /// Drop a deleted entity and its edges from the buffer graph.
    pub async fn remove_entity(&self, guid: &str) -> Result<bool> {
        self.buffer.remove_vertex(guid).await
    }

    /// Drop a deleted relationship from the buffer graph.
    pub async fn remove_relationship(&self, relationship_guid: &str) -> Result<bool> {
        self.buffer.remove_edge(relationship_guid).await
    }

    /// Mirror every buffered data asset and the structure between them into
    /// the main graph again, after the main graph was reset.
    pub async fn reseed_main(&self) -> Result<usize> {
        let mut mirrored = 0;
        for type_name in DATA_ASSET_TYPES {
            for vertex in self.buffer.store().vertices_of_type(type_name).await {
                let guid = vertex.guid.clone();
                self.main.upsert_vertex(vertex).await?;
                mirrored += 1;

                let mut tx = GraphTransaction::new();
                for (edge, other) in self.buffer.neighbors(&guid, None, Direction::Outgoing).await {
                    if edge.edge_type != names::LINEAGE_MAPPING && is_data_asset(&other.type_name) {
                        tx.upsert_vertex(other).ensure_edge(edge);
                    }
                }
                if !tx.is_empty() {
                    self.main.commit(tx).await?;
                }
            }
        }
        debug!(mirrored, "Main graph reseeded from buffer");
        Ok(mirrored)
    }
}
