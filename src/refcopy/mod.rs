//! Reference copy replication.
//!
//! Accepts and validates copies of entities and relationships homed at other
//! cohort members and keeps them for the local repository to serve.
//!
//! Copies are version-monotonic per guid: a copy older than the one already
//! stored is ignored, which tolerates out-of-order delivery.

use crate::cohort::MemberRegistry;
use crate::error::{CohortError, Result};
use crate::instance::{InstanceCodec, InstanceEnvelope, InstanceKind};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use metrics::counter;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What a save did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// First copy of this guid.
    Stored,
    /// An older or equal version was replaced.
    Replaced,
    /// A newer version is already stored; nothing changed.
    Stale { stored_version: i64 },
}

/// Store of reference copies received from remote members.
pub struct ReferenceCopyStore {
    registry: Arc<MemberRegistry>,
    codec: Option<InstanceCodec>,
    entities: DashMap<String, InstanceEnvelope>,
    relationships: DashMap<String, InstanceEnvelope>,
}

impl ReferenceCopyStore {
    /// Create a store that accepts copies from registered remote members.
    pub fn new(registry: Arc<MemberRegistry>) -> Self {
        Self {
            registry,
            codec: None,
            entities: DashMap::new(),
            relationships: DashMap::new(),
        }
    }

    /// Validate copies of known types against the type table.
    pub fn with_codec(mut self, codec: InstanceCodec) -> Self {
        self.codec = Some(codec);
        self
    }

    /// Save a reference copy of an entity.
    pub async fn save_entity_reference_copy(&self, envelope: InstanceEnvelope) -> Result<SaveOutcome> {
        if envelope.kind != InstanceKind::Entity {
            return Err(CohortError::InvalidParameter(format!(
                "{} is not an entity",
                envelope.guid
            )));
        }
        self.check(&envelope).await?;
        let outcome = Self::store(&self.entities, envelope)?;
        counter!("cohort_refcopies_total", "kind" => "entity", "outcome" => outcome_label(outcome))
            .increment(1);
        Ok(outcome)
    }

    /// Save a reference copy of a relationship.
    pub async fn save_relationship_reference_copy(
        &self,
        envelope: InstanceEnvelope,
    ) -> Result<SaveOutcome> {
        if envelope.kind != InstanceKind::Relationship {
            return Err(CohortError::InvalidParameter(format!(
                "{} is not a relationship",
                envelope.guid
            )));
        }
        self.check(&envelope).await?;
        envelope.ends()?;
        let outcome = Self::store(&self.relationships, envelope)?;
        counter!("cohort_refcopies_total", "kind" => "relationship", "outcome" => outcome_label(outcome))
            .increment(1);
        Ok(outcome)
    }

    async fn check(&self, envelope: &InstanceEnvelope) -> Result<()> {
        envelope.validate_identity()?;

        let home = &envelope.home_metadata_collection_id;
        if self.registry.is_local(home) {
            return Err(CohortError::HomeEntity(format!(
                "{} is homed in the local repository and cannot be saved as a reference copy",
                envelope.guid
            )));
        }
        if !self.registry.is_known_member(home).await {
            return Err(CohortError::HomeEntity(format!(
                "{} is homed at {}, which is not a cohort member",
                envelope.guid, home
            )));
        }

        if let Some(codec) = &self.codec {
            codec.validate(envelope)?;
        }
        Ok(())
    }

    fn store(map: &DashMap<String, InstanceEnvelope>, envelope: InstanceEnvelope) -> Result<SaveOutcome> {
        match map.entry(envelope.guid.clone()) {
            Entry::Occupied(mut occupied) => {
                let stored = occupied.get();
                if stored.home_metadata_collection_id != envelope.home_metadata_collection_id {
                    return Err(CohortError::Conflict(format!(
                        "{} is already replicated from {}, refusing copy from {}",
                        envelope.guid,
                        stored.home_metadata_collection_id,
                        envelope.home_metadata_collection_id
                    )));
                }
                if stored.version > envelope.version {
                    debug!(
                        guid = %envelope.guid,
                        stored = stored.version,
                        received = envelope.version,
                        "Ignoring stale reference copy"
                    );
                    return Ok(SaveOutcome::Stale {
                        stored_version: stored.version,
                    });
                }
                occupied.insert(envelope);
                Ok(SaveOutcome::Replaced)
            }
            Entry::Vacant(vacant) => {
                vacant.insert(envelope);
                Ok(SaveOutcome::Stored)
            }
        }
    }

    /// Remove every copy homed at `metadata_collection_id`.
    pub async fn purge_for_member(&self, metadata_collection_id: &str) -> usize {
        let before = self.entities.len() + self.relationships.len();
        self.relationships
            .retain(|_, r| r.home_metadata_collection_id != metadata_collection_id);
        tokio::task::yield_now().await;
        self.entities
            .retain(|_, e| e.home_metadata_collection_id != metadata_collection_id);
        let removed = before.saturating_sub(self.entities.len() + self.relationships.len());

        info!(member = %metadata_collection_id, removed, "Purged reference copies");
        counter!("cohort_refcopies_purged_total").increment(removed as u64);
        removed
    }

    /// Delete an entity copy after an explicit delete event.
    pub fn delete_entity(&self, guid: &str) -> Option<InstanceEnvelope> {
        let removed = self.entities.remove(guid).map(|(_, e)| e);
        if removed.is_none() {
            warn!(guid = %guid, "Delete for unknown entity copy");
        }
        removed
    }

    /// Delete a relationship copy after an explicit delete event.
    pub fn delete_relationship(&self, guid: &str) -> Option<InstanceEnvelope> {
        self.relationships.remove(guid).map(|(_, r)| r)
    }

    pub fn get_entity(&self, guid: &str) -> Option<InstanceEnvelope> {
        self.entities.get(guid).map(|e| e.value().clone())
    }

    pub fn get_relationship(&self, guid: &str) -> Option<InstanceEnvelope> {
        self.relationships.get(guid).map(|r| r.value().clone())
    }

    /// Relationship copies with `entity_guid` at either end.
    pub fn relationships_for_entity<F>(&self, entity_guid: &str, filter: F) -> Vec<InstanceEnvelope>
    where
        F: Fn(&InstanceEnvelope) -> bool,
    {
        self.relationships
            .iter()
            .filter(|r| r.touches(entity_guid) && filter(r.value()))
            .map(|r| r.value().clone())
            .collect()
    }

    /// Entity copies accepted by `filter`, at most `limit`.
    pub fn find_entities<F>(&self, filter: F, limit: usize) -> Vec<InstanceEnvelope>
    where
        F: Fn(&InstanceEnvelope) -> bool,
    {
        self.entities
            .iter()
            .filter(|e| filter(e.value()))
            .take(limit)
            .map(|e| e.value().clone())
            .collect()
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn relationship_count(&self) -> usize {
        self.relationships.len()
    }
}

fn outcome_label(outcome: SaveOutcome) -> &'static str {
    match outcome {
        SaveOutcome::Stored => "stored",
        SaveOutcome::Replaced => "replaced",
        SaveOutcome::Stale { .. } => "stale",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cohort::{ConnectionDescriptor, MemberRegistration};
    use crate::instance::{names, RelationshipEnd};

    async fn store_with_members(remotes: &[&str]) -> ReferenceCopyStore {
        let registry = Arc::new(MemberRegistry::new(MemberRegistration::new(
            "M1",
            "local",
            ConnectionDescriptor::in_process(),
        )));
        for id in remotes {
            registry
                .register(MemberRegistration::new(
                    *id,
                    format!("server-{}", id),
                    ConnectionDescriptor::http(format!("{}:9000", id)),
                ))
                .await
                .unwrap();
        }
        ReferenceCopyStore::new(registry).with_codec(InstanceCodec::default())
    }

    fn column(guid: &str, home: &str, version: i64) -> InstanceEnvelope {
        InstanceEnvelope::entity(guid, names::RELATIONAL_COLUMN, home).with_version(version)
    }

    #[tokio::test]
    async fn test_version_monotonicity() {
        let store = store_with_members(&["M2"]).await;

        let first = store.save_entity_reference_copy(column("e1", "M2", 5)).await.unwrap();
        assert_eq!(first, SaveOutcome::Stored);

        let stale = store.save_entity_reference_copy(column("e1", "M2", 3)).await.unwrap();
        assert_eq!(stale, SaveOutcome::Stale { stored_version: 5 });
        assert_eq!(store.get_entity("e1").unwrap().version, 5);

        let newer = store.save_entity_reference_copy(column("e1", "M2", 6)).await.unwrap();
        assert_eq!(newer, SaveOutcome::Replaced);
        assert_eq!(store.get_entity("e1").unwrap().version, 6);
    }

    #[tokio::test]
    async fn test_rejects_empty_guid() {
        let store = store_with_members(&["M2"]).await;
        let result = store.save_entity_reference_copy(column("", "M2", 1)).await;
        assert!(matches!(result, Err(CohortError::InvalidParameter(_))));
    }

    #[tokio::test]
    async fn test_rejects_unknown_or_local_home() {
        let store = store_with_members(&["M2"]).await;

        let unknown = store.save_entity_reference_copy(column("e1", "M9", 1)).await;
        assert!(matches!(unknown, Err(CohortError::HomeEntity(_))));

        let local = store.save_entity_reference_copy(column("e1", "M1", 1)).await;
        assert!(matches!(local, Err(CohortError::HomeEntity(_))));
        assert_eq!(store.entity_count(), 0);
    }

    #[tokio::test]
    async fn test_conflicting_home() {
        let store = store_with_members(&["M2", "M3"]).await;
        store.save_entity_reference_copy(column("e1", "M2", 1)).await.unwrap();

        let result = store.save_entity_reference_copy(column("e1", "M3", 2)).await;
        assert!(matches!(result, Err(CohortError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_relationship_needs_ends() {
        let store = store_with_members(&["M2"]).await;
        let mut rel = InstanceEnvelope::relationship(
            "r1",
            names::LINEAGE_MAPPING,
            "M2",
            RelationshipEnd::new("a", names::TABULAR_COLUMN),
            RelationshipEnd::new("b", names::TABULAR_COLUMN),
        );
        rel.end2 = None;

        let result = store.save_relationship_reference_copy(rel).await;
        assert!(matches!(result, Err(CohortError::RelationshipEndsUnknown(_))));
    }

    #[tokio::test]
    async fn test_purge_for_member() {
        let store = store_with_members(&["M2", "M3"]).await;
        store.save_entity_reference_copy(column("a", "M2", 1)).await.unwrap();
        store.save_entity_reference_copy(column("b", "M3", 1)).await.unwrap();
        store
            .save_relationship_reference_copy(InstanceEnvelope::relationship(
                "r1",
                names::LINEAGE_MAPPING,
                "M2",
                RelationshipEnd::new("a", names::RELATIONAL_COLUMN),
                RelationshipEnd::new("b", names::RELATIONAL_COLUMN),
            ))
            .await
            .unwrap();

        assert_eq!(store.relationships_for_entity("b", |_| true).len(), 1);
        assert_eq!(store.purge_for_member("M2").await, 2);
        assert!(store.get_entity("a").is_none());
        assert!(store.get_entity("b").is_some());
        assert_eq!(store.relationship_count(), 0);
    }
}
