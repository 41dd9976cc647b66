// Lineage graph elements shared by the buffer and main graphs.

use crate::error::{CohortError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Lineage vertex, keyed by the business guid of the instance it represents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineageVertex {
    /// Instance guid, unique per graph
    pub guid: String,
    /// Open-metadata type name
    pub type_name: String,
    /// Display name
    #[serde(default)]
    pub display_name: String,
    /// Qualified name
    #[serde(default)]
    pub qualified_name: String,
    /// Flattened properties
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
    /// Cohort member that owns the instance, if known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub home_collection_id: Option<String>,
}

impl LineageVertex {
    /// Creates a new vertex
    pub fn new(guid: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            guid: guid.into(),
            type_name: type_name.into(),
            display_name: String::new(),
            qualified_name: String::new(),
            properties: BTreeMap::new(),
            home_collection_id: None,
        }
    }

    /// Sets display name
    pub fn with_display_name(mut self, name: &str) -> Self {
        self.display_name = name.to_string();
        self
    }

    /// Sets qualified name
    pub fn with_qualified_name(mut self, name: &str) -> Self {
        self.qualified_name = name.to_string();
        self
    }

    /// Adds property
    pub fn with_property(mut self, key: &str, value: &str) -> Self {
        self.properties.insert(key.to_string(), value.to_string());
        self
    }

    /// Sets home collection
    pub fn with_home(mut self, metadata_collection_id: &str) -> Self {
        self.home_collection_id = Some(metadata_collection_id.to_string());
        self
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    /// Checks the fields every stored vertex must carry.
    pub(crate) fn check(&self) -> Result<()> {
        if self.guid.trim().is_empty() {
            return Err(CohortError::VertexCreation("vertex guid is empty".into()));
        }
        if self.type_name.trim().is_empty() {
            return Err(CohortError::VertexCreation(format!(
                "vertex {} has no type name",
                self.guid
            )));
        }
        if let Some(key) = self.properties.keys().find(|k| k.trim().is_empty()) {
            return Err(CohortError::VertexCreation(format!(
                "vertex {} has an invalid property key {:?}",
                self.guid, key
            )));
        }
        Ok(())
    }
}

/// Lineage edge, keyed by relationship guid.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LineageEdge {
    pub relationship_guid: String,
    pub edge_type: String,
    pub source_guid: String,
    pub destination_guid: String,
}

impl LineageEdge {
    pub fn new(
        relationship_guid: impl Into<String>,
        edge_type: impl Into<String>,
        source_guid: impl Into<String>,
        destination_guid: impl Into<String>,
    ) -> Self {
        Self {
            relationship_guid: relationship_guid.into(),
            edge_type: edge_type.into(),
            source_guid: source_guid.into(),
            destination_guid: destination_guid.into(),
        }
    }

    /// The vertex at the far end when walking in `direction`.
    pub fn far_end(&self, direction: Direction) -> &str {
        match direction {
            Direction::Outgoing => &self.destination_guid,
            Direction::Incoming => &self.source_guid,
        }
    }

    pub(crate) fn check(&self) -> Result<()> {
        if self.relationship_guid.trim().is_empty() {
            return Err(CohortError::EdgeCreation("edge relationship guid is empty".into()));
        }
        if self.edge_type.trim().is_empty() {
            return Err(CohortError::EdgeCreation(format!(
                "edge {} has no edge type",
                self.relationship_guid
            )));
        }
        if self.source_guid.is_empty() || self.destination_guid.is_empty() {
            return Err(CohortError::EdgeCreation(format!(
                "edge {} is missing an endpoint",
                self.relationship_guid
            )));
        }
        Ok(())
    }
}

/// Traversal direction relative to a vertex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Outgoing,
    Incoming,
}

impl Direction {
    pub fn reverse(self) -> Self {
        match self {
            Direction::Outgoing => Direction::Incoming,
            Direction::Incoming => Direction::Outgoing,
        }
    }
}

/// Result of a vertex upsert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Upsert {
    /// A vertex with the guid already existed; it is returned unchanged.
    Existing(LineageVertex),
    /// The vertex was created.
    Created(LineageVertex),
}

impl Upsert {
    pub fn vertex(&self) -> &LineageVertex {
        match self {
            Upsert::Existing(v) | Upsert::Created(v) => v,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, Upsert::Created(_))
    }
}

/// A subgraph returned by lineage queries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineageGraphView {
    pub vertices: Vec<LineageVertex>,
    pub edges: Vec<LineageEdge>,
}

impl LineageGraphView {
    pub fn contains_vertex(&self, guid: &str) -> bool {
        self.vertices.iter().any(|v| v.guid == guid)
    }

    pub fn has_edge_between(&self, source: &str, destination: &str) -> bool {
        self.edges
            .iter()
            .any(|e| e.source_guid == source && e.destination_guid == destination)
    }
}
