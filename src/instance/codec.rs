//! Generic `(type name, property map) <-> InstanceEnvelope` codec.
//!
//! The codec consults the [`TypeRegistry`] for every conversion. Types missing
//! from the table are passed through unvalidated so that members running newer
//! type definitions can still replicate to this one.

use super::envelope::{InstanceEnvelope, InstanceKind, PropertyMap, RelationshipEnd};
use super::types::TypeRegistry;
use crate::error::{CohortError, Result};
use crate::graph::LineageVertex;
use crate::lineage::LineageFact;
use std::sync::Arc;

/// Property keys with a dedicated slot on [`LineageVertex`].
const DISPLAY_NAME_KEYS: [&str; 2] = ["displayName", "name"];
const QUALIFIED_NAME_KEY: &str = "qualifiedName";

/// Converts between typed property bags, envelopes and lineage vertices.
#[derive(Debug, Clone)]
pub struct InstanceCodec {
    types: Arc<TypeRegistry>,
}

impl InstanceCodec {
    pub fn new(types: Arc<TypeRegistry>) -> Self {
        Self { types }
    }

    pub fn types(&self) -> &TypeRegistry {
        &self.types
    }

    /// Build an entity envelope, validating against the type table.
    pub fn encode_entity(
        &self,
        type_name: &str,
        guid: &str,
        home: &str,
        properties: PropertyMap,
    ) -> Result<InstanceEnvelope> {
        let mut envelope = InstanceEnvelope::entity(guid, type_name, home);
        envelope.properties = properties;
        self.validate(&envelope)?;
        Ok(envelope)
    }

    /// Build a relationship envelope, validating against the type table.
    pub fn encode_relationship(
        &self,
        type_name: &str,
        guid: &str,
        home: &str,
        end1: RelationshipEnd,
        end2: RelationshipEnd,
        properties: PropertyMap,
    ) -> Result<InstanceEnvelope> {
        let mut envelope = InstanceEnvelope::relationship(guid, type_name, home, end1, end2);
        envelope.properties = properties;
        self.validate(&envelope)?;
        Ok(envelope)
    }

    /// Check an envelope against its type definition, if one is registered.
    pub fn validate(&self, envelope: &InstanceEnvelope) -> Result<()> {
        envelope.validate_identity()?;
        if envelope.is_relationship() {
            envelope.ends()?;
        }

        let Some(def) = self.types.get(&envelope.type_name) else {
            return Ok(());
        };

        if def.category != envelope.kind {
            return Err(CohortError::InvalidParameter(format!(
                "{} is a {:?} type but instance {} was sent as {:?}",
                def.name, def.category, envelope.guid, envelope.kind
            )));
        }

        for attribute in self.types.attributes_of(&envelope.type_name) {
            match envelope.properties.get(&attribute.name) {
                Some(value) if !attribute.kind.accepts(value) => {
                    return Err(CohortError::InvalidParameter(format!(
                        "property {} of {} instance {} expects {:?}",
                        attribute.name, def.name, envelope.guid, attribute.kind
                    )));
                }
                None if attribute.required => {
                    return Err(CohortError::InvalidParameter(format!(
                        "{} instance {} is missing required property {}",
                        def.name, envelope.guid, attribute.name
                    )));
                }
                _ => {}
            }
        }

        if envelope.kind == InstanceKind::Relationship {
            let (end1, end2) = envelope.ends()?;
            self.check_end(&envelope.guid, end1, def.end1_type.as_deref())?;
            self.check_end(&envelope.guid, end2, def.end2_type.as_deref())?;
        }
        Ok(())
    }

    fn check_end(&self, guid: &str, end: &RelationshipEnd, expected: Option<&str>) -> Result<()> {
        let Some(expected) = expected else {
            return Ok(());
        };
        // Only judge ends whose type we know.
        if self.types.contains(&end.type_name) && !self.types.is_subtype_of(&end.type_name, expected) {
            return Err(CohortError::InvalidParameter(format!(
                "relationship {} end {} is a {}, expected {}",
                guid, end.guid, end.type_name, expected
            )));
        }
        Ok(())
    }

    /// Whether an instance of `type_name` satisfies a caller's type filter.
    pub fn matches_type(&self, type_name: &str, filter: Option<&str>) -> bool {
        match filter {
            None => true,
            Some(filter) => self.types.is_subtype_of(type_name, filter),
        }
    }

    /// Flatten an entity envelope into a lineage vertex.
    pub fn to_lineage_vertex(&self, envelope: &InstanceEnvelope) -> LineageVertex {
        let display_name = DISPLAY_NAME_KEYS
            .iter()
            .find_map(|k| envelope.property_str(k))
            .unwrap_or_default();
        let qualified_name = envelope.property_str(QUALIFIED_NAME_KEY).unwrap_or_default();

        let mut vertex = LineageVertex::new(&envelope.guid, &envelope.type_name)
            .with_display_name(display_name)
            .with_qualified_name(qualified_name)
            .with_home(&envelope.home_metadata_collection_id);
        for (key, value) in &envelope.properties {
            vertex.properties.insert(key.clone(), value.to_display_string());
        }
        vertex
    }

    /// Derive a lineage fact from a relationship and its two end entities.
    pub fn to_lineage_fact(
        &self,
        relationship: &InstanceEnvelope,
        end1: &InstanceEnvelope,
        end2: &InstanceEnvelope,
    ) -> Result<LineageFact> {
        self.validate(relationship)?;
        let (e1, e2) = relationship.ends()?;
        if e1.guid != end1.guid || e2.guid != end2.guid {
            return Err(CohortError::RelationshipEndsUnknown(format!(
                "relationship {} ends ({}, {}) do not match supplied entities ({}, {})",
                relationship.guid, e1.guid, e2.guid, end1.guid, end2.guid
            )));
        }
        Ok(LineageFact {
            relationship_guid: relationship.guid.clone(),
            edge_type: relationship.type_name.clone(),
            from: self.to_lineage_vertex(end1),
            to: self.to_lineage_vertex(end2),
        })
    }
}

impl Default for InstanceCodec {
    fn default() -> Self {
        Self::new(Arc::new(TypeRegistry::with_lineage_types()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::types::names;
    use crate::instance::PropertyValue;

    fn props(pairs: &[(&str, PropertyValue)]) -> PropertyMap {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn test_encode_entity_checks_kinds() {
        let codec = InstanceCodec::default();
        let ok = codec.encode_entity(
            names::RELATIONAL_COLUMN,
            "c1",
            "M1",
            props(&[("name", "id".into()), ("position", PropertyValue::Int(1))]),
        );
        assert!(ok.is_ok());

        let bad = codec.encode_entity(
            names::RELATIONAL_COLUMN,
            "c1",
            "M1",
            props(&[("position", "first".into())]),
        );
        assert!(matches!(bad, Err(CohortError::InvalidParameter(_))));
    }

    #[test]
    fn test_category_mismatch() {
        let codec = InstanceCodec::default();
        let env = InstanceEnvelope::entity("r1", names::LINEAGE_MAPPING, "M1");
        assert!(matches!(codec.validate(&env), Err(CohortError::InvalidParameter(_))));
    }

    #[test]
    fn test_relationship_end_types() {
        let codec = InstanceCodec::default();
        let bad = codec.encode_relationship(
            names::PROCESS_PORT,
            "r1",
            "M1",
            RelationshipEnd::new("c1", names::TABULAR_COLUMN),
            RelationshipEnd::new("p1", names::PORT_IMPLEMENTATION),
            PropertyMap::new(),
        );
        assert!(bad.is_err());

        let unknown_end = codec.encode_relationship(
            names::PROCESS_PORT,
            "r1",
            "M1",
            RelationshipEnd::new("x1", "CustomProcess"),
            RelationshipEnd::new("p1", names::PORT_IMPLEMENTATION),
            PropertyMap::new(),
        );
        assert!(unknown_end.is_ok());
    }

    #[test]
    fn test_unknown_type_passes_through() {
        let codec = InstanceCodec::default();
        let env = InstanceEnvelope::entity("g1", "GlossaryTerm", "M1").with_property("x", 1i64);
        assert!(codec.validate(&env).is_ok());
    }

    #[test]
    fn test_to_lineage_vertex() {
        let codec = InstanceCodec::default();
        let env = InstanceEnvelope::entity("c1", names::TABULAR_COLUMN, "M2")
            .with_property("name", "amount")
            .with_property("qualifiedName", "db.orders.amount")
            .with_property("position", 4i64);
        let vertex = codec.to_lineage_vertex(&env);

        assert_eq!(vertex.display_name, "amount");
        assert_eq!(vertex.qualified_name, "db.orders.amount");
        assert_eq!(vertex.property("position"), Some("4"));
        assert_eq!(vertex.home_collection_id.as_deref(), Some("M2"));
    }

    #[test]
    fn test_to_lineage_fact_requires_matching_ends() {
        let codec = InstanceCodec::default();
        let a = InstanceEnvelope::entity("a", names::TABULAR_COLUMN, "M2");
        let b = InstanceEnvelope::entity("b", names::TABULAR_COLUMN, "M2");
        let rel = InstanceEnvelope::relationship(
            "r1",
            names::LINEAGE_MAPPING,
            "M2",
            RelationshipEnd::new("a", names::TABULAR_COLUMN),
            RelationshipEnd::new("b", names::TABULAR_COLUMN),
        );

        let fact = codec.to_lineage_fact(&rel, &a, &b).unwrap();
        assert_eq!(fact.from.guid, "a");
        assert_eq!(fact.to.guid, "b");
        assert!(codec.to_lineage_fact(&rel, &b, &a).is_err());
    }

    #[test]
    fn test_matches_type_uses_hierarchy() {
        let codec = InstanceCodec::default();
        assert!(codec.matches_type(names::RELATIONAL_COLUMN, Some(names::SCHEMA_ATTRIBUTE)));
        assert!(!codec.matches_type(names::PROCESS, Some(names::SCHEMA_ATTRIBUTE)));
        assert!(codec.matches_type(names::PROCESS, None));
    }
}
