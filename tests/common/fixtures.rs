// Test fixtures: fake cohort members and node builders

use async_trait::async_trait;
use cohort::cohort::{ConnectionDescriptor, MemberRegistration, MemberRegistry};
use cohort::error::{CohortError, Result};
use cohort::graph::LineageVertex;
use cohort::instance::{InstanceCodec, InstanceEnvelope};
use cohort::lineage::LineageFact;
use cohort::node::CohortNode;
use cohort::refcopy::ReferenceCopyStore;
use cohort::repository::{ConnectorFactory, LocalRepository, MetadataCollectionClient, SharedClient};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Registration of a remote member reachable at a made-up endpoint.
pub fn member(id: &str) -> MemberRegistration {
    MemberRegistration::new(id, format!("{}-server", id), ConnectionDescriptor::http(format!("{}.test:9443", id)))
}

/// The in-process registration of the local member.
pub fn local_member(id: &str) -> MemberRegistration {
    MemberRegistration::new(id, format!("{}-server", id), ConnectionDescriptor::in_process())
}

/// An empty repository standing in for a member's own store.
pub fn member_repository(id: &str) -> Arc<LocalRepository> {
    let registry = Arc::new(MemberRegistry::new(local_member(id)));
    let copies = Arc::new(ReferenceCopyStore::new(registry));
    Arc::new(LocalRepository::new(id, InstanceCodec::default(), copies))
}

/// A member repository seeded with home entities.
pub async fn seeded_repository(id: &str, entities: &[(&str, &str)]) -> Arc<LocalRepository> {
    let repo = member_repository(id);
    for (guid, type_name) in entities {
        repo.add_entity(InstanceEnvelope::entity(*guid, *type_name, id))
            .await
            .expect("seed entity");
    }
    repo
}

/// A relationship homed at `home` between two entities.
pub fn relationship(guid: &str, type_name: &str, home: &str, end1: &str, end2: &str) -> InstanceEnvelope {
    use cohort::instance::RelationshipEnd;
    InstanceEnvelope::relationship(
        guid,
        type_name,
        home,
        RelationshipEnd::new(end1, "Asset"),
        RelationshipEnd::new(end2, "Asset"),
    )
}

/// Answers every call after sleeping.
pub struct SlowMember {
    inner: SharedClient,
    delay: Duration,
}

impl SlowMember {
    pub fn new(inner: SharedClient, delay: Duration) -> Self {
        Self { inner, delay }
    }
}

#[async_trait]
impl MetadataCollectionClient for SlowMember {
    fn metadata_collection_id(&self) -> &str {
        self.inner.metadata_collection_id()
    }

    async fn get_entity(&self, guid: &str) -> Result<InstanceEnvelope> {
        tokio::time::sleep(self.delay).await;
        self.inner.get_entity(guid).await
    }

    async fn get_relationships_for_entity(
        &self,
        guid: &str,
        relationship_type: Option<&str>,
    ) -> Result<Vec<InstanceEnvelope>> {
        tokio::time::sleep(self.delay).await;
        self.inner.get_relationships_for_entity(guid, relationship_type).await
    }

    async fn find_entities(&self, type_name: Option<&str>, limit: usize) -> Result<Vec<InstanceEnvelope>> {
        tokio::time::sleep(self.delay).await;
        self.inner.find_entities(type_name, limit).await
    }

    async fn save_entity_reference_copy(&self, envelope: InstanceEnvelope) -> Result<()> {
        self.inner.save_entity_reference_copy(envelope).await
    }

    async fn save_relationship_reference_copy(&self, envelope: InstanceEnvelope) -> Result<()> {
        self.inner.save_relationship_reference_copy(envelope).await
    }

    async fn add_entity(&self, envelope: InstanceEnvelope) -> Result<()> {
        self.inner.add_entity(envelope).await
    }

    async fn add_relationship(&self, envelope: InstanceEnvelope) -> Result<()> {
        self.inner.add_relationship(envelope).await
    }
}

/// A member whose every call fails with a network error, counting the calls.
pub struct FailingMember {
    id: String,
    calls: AtomicUsize,
}

impl FailingMember {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn fail<T>(&self) -> Result<T> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(CohortError::Network(format!("{} is unreachable", self.id)))
    }
}

#[async_trait]
impl MetadataCollectionClient for FailingMember {
    fn metadata_collection_id(&self) -> &str {
        &self.id
    }

    async fn get_entity(&self, _guid: &str) -> Result<InstanceEnvelope> {
        self.fail()
    }

    async fn get_relationships_for_entity(
        &self,
        _guid: &str,
        _relationship_type: Option<&str>,
    ) -> Result<Vec<InstanceEnvelope>> {
        self.fail()
    }

    async fn find_entities(&self, _type_name: Option<&str>, _limit: usize) -> Result<Vec<InstanceEnvelope>> {
        self.fail()
    }

    async fn save_entity_reference_copy(&self, _envelope: InstanceEnvelope) -> Result<()> {
        self.fail()
    }

    async fn save_relationship_reference_copy(&self, _envelope: InstanceEnvelope) -> Result<()> {
        self.fail()
    }

    async fn add_entity(&self, _envelope: InstanceEnvelope) -> Result<()> {
        self.fail()
    }

    async fn add_relationship(&self, _envelope: InstanceEnvelope) -> Result<()> {
        self.fail()
    }
}

/// Hands out pre-built clients by collection id; unknown ids get an empty
/// repository of their own.
#[derive(Default)]
pub struct StaticConnector {
    clients: Mutex<HashMap<String, SharedClient>>,
}

impl StaticConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(self, client: SharedClient) -> Self {
        self.clients
            .lock()
            .insert(client.metadata_collection_id().to_string(), client);
        self
    }
}

impl ConnectorFactory for StaticConnector {
    fn connect(&self, member: &MemberRegistration) -> Result<SharedClient> {
        let mut clients = self.clients.lock();
        let client = clients
            .entry(member.metadata_collection_id.clone())
            .or_insert_with(|| member_repository(&member.metadata_collection_id) as SharedClient);
        Ok(client.clone())
    }
}

/// A node for `local_id` whose members connect through `connector`.
pub fn test_node(local_id: &str, connector: StaticConnector) -> CohortNode {
    let registry = Arc::new(MemberRegistry::new(local_member(local_id)));
    CohortNode::new(registry, Arc::new(connector))
}

/// A lineage fact between two vertices given as `(guid, type)`.
pub fn lineage_fact(guid: &str, edge_type: &str, from: (&str, &str), to: (&str, &str)) -> LineageFact {
    LineageFact {
        relationship_guid: guid.to_string(),
        edge_type: edge_type.to_string(),
        from: LineageVertex::new(from.0, from.1).with_display_name(from.0),
        to: LineageVertex::new(to.0, to.1).with_display_name(to.0),
    }
}
