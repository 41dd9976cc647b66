//! In-process repository: home instances plus replicated reference copies.

use super::client::MetadataCollectionClient;
use crate::error::{CohortError, Result};
use crate::instance::{InstanceCodec, InstanceEnvelope, InstanceKind};
use crate::refcopy::{ReferenceCopyStore, SaveOutcome};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

/// The local member's repository.
pub struct LocalRepository {
    metadata_collection_id: String,
    codec: InstanceCodec,
    entities: DashMap<String, InstanceEnvelope>,
    relationships: DashMap<String, InstanceEnvelope>,
    copies: Arc<ReferenceCopyStore>,
}

impl LocalRepository {
    pub fn new(
        metadata_collection_id: impl Into<String>,
        codec: InstanceCodec,
        copies: Arc<ReferenceCopyStore>,
    ) -> Self {
        Self {
            metadata_collection_id: metadata_collection_id.into(),
            codec,
            entities: DashMap::new(),
            relationships: DashMap::new(),
            copies,
        }
    }

    pub fn reference_copies(&self) -> &Arc<ReferenceCopyStore> {
        &self.copies
    }

    pub fn home_entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Save an entity copy, reporting whether it was stored or stale.
    pub async fn accept_entity_copy(&self, envelope: InstanceEnvelope) -> Result<SaveOutcome> {
        self.reject_home_guid(&envelope)?;
        self.copies.save_entity_reference_copy(envelope).await
    }

    pub async fn accept_relationship_copy(&self, envelope: InstanceEnvelope) -> Result<SaveOutcome> {
        self.reject_home_guid(&envelope)?;
        self.copies.save_relationship_reference_copy(envelope).await
    }

    fn entity_exists(&self, guid: &str) -> bool {
        self.entities.contains_key(guid) || self.copies.get_entity(guid).is_some()
    }

    fn check_new_instance(&self, envelope: &InstanceEnvelope, kind: InstanceKind) -> Result<()> {
        if envelope.kind != kind {
            return Err(CohortError::InvalidParameter(format!(
                "{} was sent as {:?}, expected {:?}",
                envelope.guid, envelope.kind, kind
            )));
        }
        if envelope.home_metadata_collection_id != self.metadata_collection_id {
            return Err(CohortError::InvalidParameter(format!(
                "new instance {} must be homed at {}, not {}",
                envelope.guid, self.metadata_collection_id, envelope.home_metadata_collection_id
            )));
        }
        self.codec.validate(envelope)
    }

    fn reject_home_guid(&self, envelope: &InstanceEnvelope) -> Result<()> {
        let homed_here = match envelope.kind {
            InstanceKind::Entity => self.entities.contains_key(&envelope.guid),
            InstanceKind::Relationship => self.relationships.contains_key(&envelope.guid),
        };
        if homed_here {
            return Err(CohortError::Conflict(format!(
                "{} is homed in {} and cannot be overwritten by a reference copy",
                envelope.guid, self.metadata_collection_id
            )));
        }
        Ok(())
    }

    fn sorted(mut instances: Vec<InstanceEnvelope>) -> Vec<InstanceEnvelope> {
        instances.sort_by(|a, b| a.guid.cmp(&b.guid));
        instances
    }
}

#[async_trait]
impl MetadataCollectionClient for LocalRepository {
    fn metadata_collection_id(&self) -> &str {
        &self.metadata_collection_id
    }

    async fn get_entity(&self, guid: &str) -> Result<InstanceEnvelope> {
        if let Some(entity) = self.entities.get(guid) {
            if !entity.is_deleted() {
                return Ok(entity.value().clone());
            }
        }
        match self.copies.get_entity(guid) {
            Some(copy) if !copy.is_deleted() => Ok(copy),
            _ => Err(CohortError::NotFound(format!(
                "entity {} not found in {}",
                guid, self.metadata_collection_id
            ))),
        }
    }

    async fn get_relationships_for_entity(
        &self,
        guid: &str,
        relationship_type: Option<&str>,
    ) -> Result<Vec<InstanceEnvelope>> {
        let accept = |r: &InstanceEnvelope| {
            !r.is_deleted() && self.codec.matches_type(&r.type_name, relationship_type)
        };

        let mut found: Vec<InstanceEnvelope> = self
            .relationships
            .iter()
            .filter(|r| r.touches(guid) && accept(r.value()))
            .map(|r| r.value().clone())
            .collect();
        found.extend(self.copies.relationships_for_entity(guid, accept));

        Ok(Self::sorted(found))
    }

    async fn find_entities(&self, type_name: Option<&str>, limit: usize) -> Result<Vec<InstanceEnvelope>> {
        let accept = |e: &InstanceEnvelope| {
            !e.is_deleted() && self.codec.matches_type(&e.type_name, type_name)
        };

        let mut found: Vec<InstanceEnvelope> = self
            .entities
            .iter()
            .filter(|e| accept(e.value()))
            .map(|e| e.value().clone())
            .collect();
        found.extend(self.copies.find_entities(accept, usize::MAX));

        let mut found = Self::sorted(found);
        found.truncate(limit);
        Ok(found)
    }

    async fn save_entity_reference_copy(&self, envelope: InstanceEnvelope) -> Result<()> {
        let outcome = self.accept_entity_copy(envelope).await?;
        debug!(?outcome, "Entity reference copy saved");
        Ok(())
    }

    async fn save_relationship_reference_copy(&self, envelope: InstanceEnvelope) -> Result<()> {
        let outcome = self.accept_relationship_copy(envelope).await?;
        debug!(?outcome, "Relationship reference copy saved");
        Ok(())
    }

    async fn add_entity(&self, envelope: InstanceEnvelope) -> Result<()> {
        self.check_new_instance(&envelope, InstanceKind::Entity)?;
        if self.copies.get_entity(&envelope.guid).is_some() {
            return Err(CohortError::Conflict(format!(
                "entity {} already exists as a reference copy",
                envelope.guid
            )));
        }
        match self.entities.entry(envelope.guid.clone()) {
            Entry::Occupied(_) => Err(CohortError::Conflict(format!(
                "entity {} already exists",
                envelope.guid
            ))),
            Entry::Vacant(vacant) => {
                vacant.insert(envelope);
                Ok(())
            }
        }
    }

    async fn add_relationship(&self, envelope: InstanceEnvelope) -> Result<()> {
        self.check_new_instance(&envelope, InstanceKind::Relationship)?;
        let (end1, end2) = envelope.ends()?;
        for end in [end1, end2] {
            if !self.entity_exists(&end.guid) {
                return Err(CohortError::RelationshipEndsUnknown(format!(
                    "relationship {} refers to unknown entity {}",
                    envelope.guid, end.guid
                )));
            }
        }
        if self.copies.get_relationship(&envelope.guid).is_some() {
            return Err(CohortError::Conflict(format!(
                "relationship {} already exists as a reference copy",
                envelope.guid
            )));
        }
        match self.relationships.entry(envelope.guid.clone()) {
            Entry::Occupied(_) => Err(CohortError::Conflict(format!(
                "relationship {} already exists",
                envelope.guid
            ))),
            Entry::Vacant(vacant) => {
                vacant.insert(envelope);
                Ok(())
            }
        }
    }
}
