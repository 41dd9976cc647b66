//! Instance model for cohort replication.
//!
//! - [`envelope`]: the generic entity/relationship carrier
//! - [`types`]: the type-schema table
//! - [`codec`]: conversions driven by the type table

pub mod codec;
pub mod envelope;
pub mod types;

pub use codec::InstanceCodec;
pub use envelope::{
    InstanceEnvelope, InstanceKind, InstanceStatus, PropertyMap, PropertyValue, RelationshipEnd,
};
pub use types::{names, AttributeDef, AttributeKind, TypeDef, TypeRegistry};
