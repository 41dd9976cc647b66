//! The capability interface every cohort member's repository exposes.

use crate::cohort::MemberRegistration;
use crate::error::Result;
use crate::instance::InstanceEnvelope;
use async_trait::async_trait;
use std::sync::Arc;

/// Read/write access to one repository, in-process or remote.
///
/// Every operation is safe to retry, except `add_entity` and
/// `add_relationship`, which reject guids that already exist.
#[async_trait]
pub trait MetadataCollectionClient: Send + Sync {
    /// Collection id of the repository behind this client.
    fn metadata_collection_id(&self) -> &str;

    /// Fetch an entity, or `NotFound`.
    async fn get_entity(&self, guid: &str) -> Result<InstanceEnvelope>;

    /// Relationships with `guid` at either end, optionally of one type (or its subtypes).
    async fn get_relationships_for_entity(
        &self,
        guid: &str,
        relationship_type: Option<&str>,
    ) -> Result<Vec<InstanceEnvelope>>;

    /// Entities of a type (or any type), at most `limit`.
    async fn find_entities(&self, type_name: Option<&str>, limit: usize) -> Result<Vec<InstanceEnvelope>>;

    /// Store a copy of an entity homed elsewhere.
    async fn save_entity_reference_copy(&self, envelope: InstanceEnvelope) -> Result<()>;

    /// Store a copy of a relationship homed elsewhere.
    async fn save_relationship_reference_copy(&self, envelope: InstanceEnvelope) -> Result<()>;

    /// Create a new entity homed in this repository.
    async fn add_entity(&self, envelope: InstanceEnvelope) -> Result<()>;

    /// Create a new relationship homed in this repository.
    async fn add_relationship(&self, envelope: InstanceEnvelope) -> Result<()>;
}

/// Shared handle to a client.
pub type SharedClient = Arc<dyn MetadataCollectionClient>;

/// Builds a client for a member that just joined the cohort.
pub trait ConnectorFactory: Send + Sync {
    fn connect(&self, member: &MemberRegistration) -> Result<SharedClient>;
}
