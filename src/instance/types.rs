//! Type-schema table driving the generic instance codec.
//!
//! Instead of one mapper per open-metadata type, every type is described by a
//! [`TypeDef`] row: its category, its supertype and its declared attributes.

use super::envelope::{InstanceKind, PropertyValue};
use crate::error::{CohortError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Well-known type names used by lineage promotion.
pub mod names {
    pub const REFERENCEABLE: &str = "Referenceable";
    pub const ASSET: &str = "Asset";
    pub const PROCESS: &str = "Process";
    pub const SUB_PROCESS: &str = "SubProcess";
    pub const PORT: &str = "Port";
    pub const PORT_IMPLEMENTATION: &str = "PortImplementation";
    pub const PORT_ALIAS: &str = "PortAlias";
    pub const SCHEMA_TYPE: &str = "SchemaType";
    pub const TABULAR_SCHEMA_TYPE: &str = "TabularSchemaType";
    pub const SCHEMA_ATTRIBUTE: &str = "SchemaAttribute";
    pub const TABULAR_COLUMN: &str = "TabularColumn";
    pub const RELATIONAL_COLUMN: &str = "RelationalColumn";
    pub const RELATIONAL_TABLE: &str = "RelationalTable";
    pub const DATA_FILE: &str = "DataFile";
    pub const DATABASE: &str = "Database";

    pub const LINEAGE_MAPPING: &str = "LineageMapping";
    pub const SCHEMA_ATTRIBUTE_TYPE: &str = "SchemaAttributeType";
    pub const PORT_DELEGATION: &str = "PortDelegation";
    pub const PROCESS_PORT: &str = "ProcessPort";
    pub const PORT_SCHEMA: &str = "PortSchema";
    pub const ATTRIBUTE_FOR_SCHEMA: &str = "AttributeForSchema";
    pub const NESTED_SCHEMA_ATTRIBUTE: &str = "NestedSchemaAttribute";
    pub const DATA_CONTENT_FOR_DATA_SET: &str = "DataContentForDataSet";
}

/// Primitive kind of a declared attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeKind {
    String,
    Int,
    Float,
    Boolean,
    Date,
    Array,
    Map,
    Any,
}

impl AttributeKind {
    /// Whether a value is acceptable for this kind; `Null` is always accepted.
    pub fn accepts(&self, value: &PropertyValue) -> bool {
        matches!(
            (self, value),
            (AttributeKind::Any, _)
                | (_, PropertyValue::Null)
                | (AttributeKind::String, PropertyValue::String(_))
                | (AttributeKind::Int, PropertyValue::Int(_))
                | (AttributeKind::Float, PropertyValue::Float(_))
                | (AttributeKind::Float, PropertyValue::Int(_))
                | (AttributeKind::Boolean, PropertyValue::Boolean(_))
                | (AttributeKind::Date, PropertyValue::Date(_))
                | (AttributeKind::Array, PropertyValue::Array(_))
                | (AttributeKind::Map, PropertyValue::Map(_))
        )
    }
}

/// A declared attribute of a type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeDef {
    pub name: String,
    pub kind: AttributeKind,
    #[serde(default)]
    pub required: bool,
}

impl AttributeDef {
    pub fn optional(name: &str, kind: AttributeKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            required: false,
        }
    }

    pub fn required(name: &str, kind: AttributeKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            required: true,
        }
    }
}

/// One row of the type table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeDef {
    pub name: String,
    pub category: InstanceKind,
    #[serde(default)]
    pub super_type: Option<String>,
    #[serde(default)]
    pub attributes: Vec<AttributeDef>,
    #[serde(default)]
    pub end1_type: Option<String>,
    #[serde(default)]
    pub end2_type: Option<String>,
}

impl TypeDef {
    pub fn entity(name: &str, super_type: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            category: InstanceKind::Entity,
            super_type: super_type.map(str::to_string),
            attributes: Vec::new(),
            end1_type: None,
            end2_type: None,
        }
    }

    pub fn relationship(name: &str, end1_type: &str, end2_type: &str) -> Self {
        Self {
            name: name.to_string(),
            category: InstanceKind::Relationship,
            super_type: None,
            attributes: Vec::new(),
            end1_type: Some(end1_type.to_string()),
            end2_type: Some(end2_type.to_string()),
        }
    }

    pub fn with_attribute(mut self, attribute: AttributeDef) -> Self {
        self.attributes.push(attribute);
        self
    }
}

/// Registry of known types.
#[derive(Debug, Clone, Default)]
pub struct TypeRegistry {
    types: HashMap<String, TypeDef>,
}

impl TypeRegistry {
    /// An empty registry: every type is unknown and accepted as-is.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the types lineage promotion relies on.
    pub fn with_lineage_types() -> Self {
        use names::*;
        use AttributeKind as K;

        let mut registry = Self::new();
        let entities = [
            TypeDef::entity(REFERENCEABLE, None)
                .with_attribute(AttributeDef::optional("qualifiedName", K::String)),
            TypeDef::entity(ASSET, Some(REFERENCEABLE))
                .with_attribute(AttributeDef::optional("name", K::String))
                .with_attribute(AttributeDef::optional("displayName", K::String)),
            TypeDef::entity(PROCESS, Some(ASSET))
                .with_attribute(AttributeDef::optional("formula", K::String)),
            TypeDef::entity(SUB_PROCESS, Some(PROCESS)),
            TypeDef::entity(DATABASE, Some(ASSET)),
            TypeDef::entity(DATA_FILE, Some(ASSET)),
            TypeDef::entity(PORT, Some(REFERENCEABLE))
                .with_attribute(AttributeDef::optional("displayName", K::String))
                .with_attribute(AttributeDef::optional("portType", K::String)),
            TypeDef::entity(PORT_IMPLEMENTATION, Some(PORT)),
            TypeDef::entity(PORT_ALIAS, Some(PORT)),
            TypeDef::entity(SCHEMA_TYPE, Some(REFERENCEABLE))
                .with_attribute(AttributeDef::optional("displayName", K::String)),
            TypeDef::entity(TABULAR_SCHEMA_TYPE, Some(SCHEMA_TYPE)),
            TypeDef::entity(SCHEMA_ATTRIBUTE, Some(REFERENCEABLE))
                .with_attribute(AttributeDef::optional("name", K::String))
                .with_attribute(AttributeDef::optional("displayName", K::String))
                .with_attribute(AttributeDef::optional("position", K::Int)),
            TypeDef::entity(TABULAR_COLUMN, Some(SCHEMA_ATTRIBUTE)),
            TypeDef::entity(RELATIONAL_COLUMN, Some(TABULAR_COLUMN)),
            TypeDef::entity(RELATIONAL_TABLE, Some(SCHEMA_ATTRIBUTE)),
        ];
        let relationships = [
            TypeDef::relationship(LINEAGE_MAPPING, REFERENCEABLE, REFERENCEABLE),
            TypeDef::relationship(SCHEMA_ATTRIBUTE_TYPE, SCHEMA_ATTRIBUTE, REFERENCEABLE),
            TypeDef::relationship(PORT_DELEGATION, REFERENCEABLE, REFERENCEABLE),
            TypeDef::relationship(PROCESS_PORT, PROCESS, PORT),
            TypeDef::relationship(PORT_SCHEMA, PORT, SCHEMA_TYPE),
            TypeDef::relationship(ATTRIBUTE_FOR_SCHEMA, SCHEMA_TYPE, SCHEMA_ATTRIBUTE),
            TypeDef::relationship(NESTED_SCHEMA_ATTRIBUTE, SCHEMA_ATTRIBUTE, SCHEMA_ATTRIBUTE),
            TypeDef::relationship(DATA_CONTENT_FOR_DATA_SET, ASSET, ASSET),
        ];

        for def in entities.into_iter().chain(relationships) {
            registry.types.insert(def.name.clone(), def);
        }
        registry
    }

    /// Add a type. Re-registering an identical definition is a no-op.
    pub fn register(&mut self, def: TypeDef) -> Result<()> {
        if def.name.trim().is_empty() {
            return Err(CohortError::InvalidParameter("type name must not be empty".into()));
        }
        match self.types.get(&def.name) {
            Some(existing) if *existing == def => Ok(()),
            Some(_) => Err(CohortError::Conflict(format!(
                "type {} is already registered with a different definition",
                def.name
            ))),
            None => {
                self.types.insert(def.name.clone(), def);
                Ok(())
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&TypeDef> {
        self.types.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Whether `type_name` is `ancestor` or inherits from it.
    pub fn is_subtype_of(&self, type_name: &str, ancestor: &str) -> bool {
        let mut seen = HashSet::new();
        let mut current = Some(type_name);
        while let Some(name) = current {
            if name == ancestor {
                return true;
            }
            if !seen.insert(name) {
                return false;
            }
            current = self.types.get(name).and_then(|d| d.super_type.as_deref());
        }
        false
    }

    /// Declared attributes of a type, including inherited ones (nearest wins).
    pub fn attributes_of(&self, type_name: &str) -> Vec<&AttributeDef> {
        let mut seen_types = HashSet::new();
        let mut seen_attrs = HashSet::new();
        let mut attributes = Vec::new();
        let mut current = self.types.get(type_name);

        while let Some(def) = current {
            if !seen_types.insert(def.name.as_str()) {
                break;
            }
            for attr in &def.attributes {
                if seen_attrs.insert(attr.name.as_str()) {
                    attributes.push(attr);
                }
            }
            current = def.super_type.as_deref().and_then(|s| self.types.get(s));
        }
        attributes
    }
}
