//! Instance envelopes: the generic carrier for entities and relationships.

use crate::error::{CohortError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Ordered property bag carried by every instance.
pub type PropertyMap = BTreeMap<String, PropertyValue>;

/// A single instance property value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum PropertyValue {
    String(String),
    Int(i64),
    Float(f64),
    Boolean(bool),
    Date(DateTime<Utc>),
    Array(Vec<PropertyValue>),
    Map(BTreeMap<String, PropertyValue>),
    Null,
}

impl PropertyValue {
    /// String rendering used when flattening into lineage vertex properties.
    pub fn to_display_string(&self) -> String {
        match self {
            PropertyValue::String(s) => s.clone(),
            PropertyValue::Int(i) => i.to_string(),
            PropertyValue::Float(f) => f.to_string(),
            PropertyValue::Boolean(b) => b.to_string(),
            PropertyValue::Date(d) => d.to_rfc3339(),
            PropertyValue::Array(items) => {
                let parts: Vec<String> = items.iter().map(|v| v.to_display_string()).collect();
                format!("[{}]", parts.join(","))
            }
            PropertyValue::Map(map) => {
                let parts: Vec<String> = map
                    .iter()
                    .map(|(k, v)| format!("{}={}", k, v.to_display_string()))
                    .collect();
                format!("{{{}}}", parts.join(","))
            }
            PropertyValue::Null => String::new(),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::String(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(s: &str) -> Self {
        PropertyValue::String(s.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(s: String) -> Self {
        PropertyValue::String(s)
    }
}

impl From<i64> for PropertyValue {
    fn from(i: i64) -> Self {
        PropertyValue::Int(i)
    }
}

impl From<bool> for PropertyValue {
    fn from(b: bool) -> Self {
        PropertyValue::Boolean(b)
    }
}

/// Whether an envelope carries an entity or a relationship.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceKind {
    Entity,
    Relationship,
}

/// Lifecycle status of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceStatus {
    Unknown,
    Proposed,
    Draft,
    Prepared,
    #[default]
    Active,
    Deleted,
}

/// One end of a relationship: enough of the entity to resolve it.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RelationshipEnd {
    pub guid: String,
    pub type_name: String,
}

impl RelationshipEnd {
    pub fn new(guid: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            guid: guid.into(),
            type_name: type_name.into(),
        }
    }

    /// An end is resolvable only when both its guid and type are present.
    pub fn is_resolvable(&self) -> bool {
        !self.guid.trim().is_empty() && !self.type_name.trim().is_empty()
    }
}

/// Entity or relationship instance as exchanged between cohort members.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceEnvelope {
    pub guid: String,
    pub type_name: String,
    pub kind: InstanceKind,
    pub home_metadata_collection_id: String,
    pub version: i64,
    #[serde(default)]
    pub status: InstanceStatus,
    #[serde(default)]
    pub properties: PropertyMap,
    /// Set when a member only knows enough of an entity to reference it.
    #[serde(default)]
    pub is_proxy: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end1: Option<RelationshipEnd>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end2: Option<RelationshipEnd>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_time: Option<DateTime<Utc>>,
}

impl InstanceEnvelope {
    /// Create an active entity envelope at version 1.
    pub fn entity(
        guid: impl Into<String>,
        type_name: impl Into<String>,
        home_metadata_collection_id: impl Into<String>,
    ) -> Self {
        Self {
            guid: guid.into(),
            type_name: type_name.into(),
            kind: InstanceKind::Entity,
            home_metadata_collection_id: home_metadata_collection_id.into(),
            version: 1,
            status: InstanceStatus::Active,
            properties: PropertyMap::new(),
            is_proxy: false,
            end1: None,
            end2: None,
            update_time: None,
        }
    }

    /// Create an active relationship envelope at version 1.
    pub fn relationship(
        guid: impl Into<String>,
        type_name: impl Into<String>,
        home_metadata_collection_id: impl Into<String>,
        end1: RelationshipEnd,
        end2: RelationshipEnd,
    ) -> Self {
        Self {
            kind: InstanceKind::Relationship,
            end1: Some(end1),
            end2: Some(end2),
            ..Self::entity(guid, type_name, home_metadata_collection_id)
        }
    }

    pub fn with_version(mut self, version: i64) -> Self {
        self.version = version;
        self
    }

    pub fn with_status(mut self, status: InstanceStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_property(mut self, key: &str, value: impl Into<PropertyValue>) -> Self {
        self.properties.insert(key.to_string(), value.into());
        self
    }

    pub fn as_proxy(mut self) -> Self {
        self.is_proxy = true;
        self
    }

    pub fn is_entity(&self) -> bool {
        self.kind == InstanceKind::Entity
    }

    pub fn is_relationship(&self) -> bool {
        self.kind == InstanceKind::Relationship
    }

    pub fn is_deleted(&self) -> bool {
        self.status == InstanceStatus::Deleted
    }

    /// String property lookup.
    pub fn property_str(&self, key: &str) -> Option<&str> {
        self.properties.get(key).and_then(|v| v.as_str())
    }

    /// Whether the given entity guid is one of this relationship's ends.
    pub fn touches(&self, entity_guid: &str) -> bool {
        self.end1.as_ref().map(|e| e.guid == entity_guid).unwrap_or(false)
            || self.end2.as_ref().map(|e| e.guid == entity_guid).unwrap_or(false)
    }

    /// Both ends, or `RelationshipEndsUnknown` if either is missing.
    pub fn ends(&self) -> Result<(&RelationshipEnd, &RelationshipEnd)> {
        match (&self.end1, &self.end2) {
            (Some(end1), Some(end2)) if end1.is_resolvable() && end2.is_resolvable() => {
                Ok((end1, end2))
            }
            _ => Err(CohortError::RelationshipEndsUnknown(format!(
                "relationship {} ({}) is missing end guid or proxy information",
                self.guid, self.type_name
            ))),
        }
    }

    /// Basic shape checks shared by every write path.
    pub fn validate_identity(&self) -> Result<()> {
        if self.guid.trim().is_empty() {
            return Err(CohortError::InvalidParameter(format!(
                "{} instance has an empty guid",
                self.type_name
            )));
        }
        if self.type_name.trim().is_empty() {
            return Err(CohortError::InvalidParameter(format!(
                "instance {} has an empty type name",
                self.guid
            )));
        }
        if self.version < 0 {
            return Err(CohortError::InvalidParameter(format!(
                "instance {} has negative version {}",
                self.guid, self.version
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_json_shape() {
        let env = InstanceEnvelope::entity("e1", "RelationalColumn", "M2")
            .with_property("name", "customer_id")
            .with_property("position", 3i64);
        let json = serde_json::to_value(&env).unwrap();

        assert_eq!(json["guid"], "e1");
        assert_eq!(json["status"], "ACTIVE");
        assert_eq!(json["properties"]["position"]["type"], "int");
        assert!(json.get("end1").is_none());

        let back: InstanceEnvelope = serde_json::from_value(json).unwrap();
        assert_eq!(back, env);
    }

    #[test]
    fn test_relationship_ends() {
        let rel = InstanceEnvelope::relationship(
            "r1",
            "LineageMapping",
            "M2",
            RelationshipEnd::new("a", "TabularColumn"),
            RelationshipEnd::new("", "TabularColumn"),
        );
        assert!(matches!(rel.ends(), Err(CohortError::RelationshipEndsUnknown(_))));
        assert!(rel.touches("a"));
        assert!(!rel.touches("b"));
    }

    #[test]
    fn test_validate_identity() {
        let env = InstanceEnvelope::entity("", "Process", "M1");
        assert!(matches!(env.validate_identity(), Err(CohortError::InvalidParameter(_))));

        let env = InstanceEnvelope::entity("p1", "Process", "M1").with_version(-1);
        assert!(env.validate_identity().is_err());
    }

    #[test]
    fn test_display_string() {
        let v = PropertyValue::Array(vec![PropertyValue::Int(1), PropertyValue::Boolean(true)]);
        assert_eq!(v.to_display_string(), "[1,true]");
        assert_eq!(PropertyValue::Null.to_display_string(), "");
    }
}
