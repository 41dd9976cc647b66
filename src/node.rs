//! A cohort node: one local repository wired into the cohort.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                           CohortNode                             │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  Registration events ──► MemberRegistry ──► Federator clients    │
//! │  Refcopy events      ──► LocalRepository / ReferenceCopyStore    │
//! │  Lineage events      ──► LineageIngestor ──► BufferGraph         │
//! │                          LineagePromoter ──► MainGraph           │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Events are routed one at a time in arrival order. Malformed payloads are
//! logged and dropped; nothing is retried.

use crate::cohort::{CohortEvent, CohortStatus, MemberRegistration, MemberRegistry, RegistrationOutcome};
use crate::config::CohortConfig;
use crate::error::{CohortError, Result};
use crate::events::{
    ChangeEvent, DeletedInstance, EventOutcome, InboundEvent, RegistrationAction, RegistrationEvent,
};
use crate::federation::{EnterpriseFederator, DEFAULT_FEDERATION_TIMEOUT, DEFAULT_MAX_CONCURRENCY};
use crate::graph::{BufferGraph, GraphCounts, LineageGraphView, MainGraph, MemoryGraphStore};
use crate::instance::{InstanceCodec, InstanceEnvelope};
use crate::lineage::{
    resolve_lineage, IngestOutcome, LineageIngestor, LineagePromoter, LineageScope, PromotionReport,
};
use crate::observability;
use crate::refcopy::{ReferenceCopyStore, SaveOutcome};
use crate::repository::{ConnectorFactory, HttpConnectorFactory, LocalRepository, SharedClient};
use crate::shutdown::ShutdownCoordinator;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Tunables of a node that are not part of its identity.
#[derive(Clone)]
pub struct NodeOptions {
    pub codec: InstanceCodec,
    pub federation_timeout: Duration,
    pub max_concurrency: usize,
    pub shutdown_timeout: Duration,
}

impl Default for NodeOptions {
    fn default() -> Self {
        Self {
            codec: InstanceCodec::default(),
            federation_timeout: DEFAULT_FEDERATION_TIMEOUT,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// What purging a member removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurgeReport {
    pub reference_copies: usize,
    pub buffer_vertices: usize,
}

/// Counts of replicated copies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceCopyCounts {
    pub entities: usize,
    pub relationships: usize,
}

/// Operational summary of a node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeStatus {
    pub cohort: CohortStatus,
    /// Remote members with a connected client
    pub federated_members: Vec<String>,
    pub home_entities: usize,
    pub reference_copies: ReferenceCopyCounts,
    pub buffer_graph: GraphCounts,
    pub main_graph: GraphCounts,
}

/// A running member of the cohort.
pub struct CohortNode {
    registry: Arc<MemberRegistry>,
    codec: InstanceCodec,
    local: Arc<LocalRepository>,
    federator: Arc<EnterpriseFederator>,
    connectors: Arc<dyn ConnectorFactory>,
    buffer: BufferGraph,
    main: MainGraph,
    ingestor: LineageIngestor,
    promoter: Arc<LineagePromoter>,
    shutdown: ShutdownCoordinator,
}

impl CohortNode {
    /// Node with default options and in-memory graphs.
    pub fn new(registry: Arc<MemberRegistry>, connectors: Arc<dyn ConnectorFactory>) -> Self {
        Self::with_options(registry, connectors, NodeOptions::default())
    }

    pub fn with_options(
        registry: Arc<MemberRegistry>,
        connectors: Arc<dyn ConnectorFactory>,
        options: NodeOptions,
    ) -> Self {
        let local_id = registry.local().metadata_collection_id.clone();
        let codec = options.codec;

        let copies = Arc::new(ReferenceCopyStore::new(registry.clone()).with_codec(codec.clone()));
        let local = Arc::new(LocalRepository::new(local_id, codec.clone(), copies));
        let federator = Arc::new(
            EnterpriseFederator::new(local.clone(), codec.clone())
                .with_max_concurrency(options.max_concurrency)
                .with_default_timeout(options.federation_timeout),
        );

        let buffer = BufferGraph::new(Arc::new(MemoryGraphStore::new()));
        let main = MainGraph::new(Arc::new(MemoryGraphStore::new()));
        let ingestor = LineageIngestor::new(buffer.clone(), main.clone());
        let promoter = Arc::new(LineagePromoter::new(buffer.clone(), main.clone()));

        Self {
            registry,
            codec,
            local,
            federator,
            connectors,
            buffer,
            main,
            ingestor,
            promoter,
            shutdown: ShutdownCoordinator::with_timeout(options.shutdown_timeout),
        }
    }

    /// Build a node from configuration, reloading the registry file if one is
    /// configured and connecting every member found in it.
    pub async fn from_config(config: &CohortConfig) -> Result<Self> {
        config.validate()?;
        let local = config.local_registration();
        let registry = match &config.registry_file {
            Some(path) => {
                if let Some(dir) = path.parent() {
                    tokio::fs::create_dir_all(dir).await?;
                }
                MemberRegistry::open(local, path).await?
            }
            None => MemberRegistry::new(local),
        };

        let connectors = Arc::new(HttpConnectorFactory::new(
            config.federation.connect_timeout,
            config.federation.request_timeout,
        ));
        let options = NodeOptions {
            codec: InstanceCodec::default(),
            federation_timeout: config.federation.timeout,
            max_concurrency: config.federation.max_concurrency,
            shutdown_timeout: config.shutdown_timeout,
        };

        let node = Self::with_options(Arc::new(registry), connectors, options);
        node.connect_known_members().await;
        Ok(node)
    }

    pub fn local_id(&self) -> &str {
        &self.registry.local().metadata_collection_id
    }

    pub fn registry(&self) -> &Arc<MemberRegistry> {
        &self.registry
    }

    pub fn codec(&self) -> &InstanceCodec {
        &self.codec
    }

    pub fn local_repository(&self) -> &Arc<LocalRepository> {
        &self.local
    }

    pub fn federator(&self) -> &Arc<EnterpriseFederator> {
        &self.federator
    }

    pub fn buffer_graph(&self) -> &BufferGraph {
        &self.buffer
    }

    pub fn main_graph(&self) -> &MainGraph {
        &self.main
    }

    pub fn shutdown_coordinator(&self) -> &ShutdownCoordinator {
        &self.shutdown
    }

    // ---- Membership ----

    /// Register a remote member and connect a federated client to it.
    ///
    /// The client is built before the registry changes, so a member that
    /// cannot be connected is never registered.
    pub async fn register_member(&self, member: MemberRegistration) -> Result<RegistrationOutcome> {
        let client = self.connectors.connect(&member)?;
        let outcome = self.registry.register(member.clone()).await?;
        if outcome == RegistrationOutcome::Joined {
            self.attach_client(&member, client);
        }
        Ok(outcome)
    }

    /// Remove a remote member, its client and everything replicated from it.
    pub async fn unregister_member(&self, metadata_collection_id: &str) -> Result<Option<PurgeReport>> {
        match self.registry.unregister(metadata_collection_id).await? {
            Some(_) => Ok(Some(self.disconnect_member(metadata_collection_id).await?)),
            None => Ok(None),
        }
    }

    fn connect_member(&self, member: &MemberRegistration) -> Result<()> {
        let client = self.connectors.connect(member)?;
        self.attach_client(member, client);
        Ok(())
    }

    fn attach_client(&self, member: &MemberRegistration, client: SharedClient) {
        self.federator.add_member(client);
        info!(
            member = %member.metadata_collection_id,
            endpoint = %member.connection.endpoint,
            "Federated client connected"
        );
    }

    async fn disconnect_member(&self, metadata_collection_id: &str) -> Result<PurgeReport> {
        if self.federator.remove_member(metadata_collection_id) {
            info!(member = %metadata_collection_id, "Federated client disconnected");
        }
        self.purge_member(metadata_collection_id).await
    }

    fn is_connected(&self, metadata_collection_id: &str) -> bool {
        self.federator
            .member_ids()
            .iter()
            .any(|id| id == metadata_collection_id)
    }

    /// Connect a client for every registered member that lacks one.
    pub async fn connect_known_members(&self) -> usize {
        let mut connected = 0;
        for member in self.registry.list_members().await {
            if self.is_connected(&member.metadata_collection_id) {
                continue;
            }
            match self.connect_member(&member) {
                Ok(()) => connected += 1,
                Err(e) => warn!(
                    member = %member.metadata_collection_id,
                    error = %e,
                    "Cannot connect to cohort member"
                ),
            }
        }
        connected
    }

    /// Remove replicated copies and buffered lineage homed at a member.
    pub async fn purge_member(&self, metadata_collection_id: &str) -> Result<PurgeReport> {
        if self.registry.is_local(metadata_collection_id) {
            return Err(CohortError::InvalidParameter(format!(
                "{} is the local member and cannot be purged",
                metadata_collection_id
            )));
        }
        let reference_copies = self
            .local
            .reference_copies()
            .purge_for_member(metadata_collection_id)
            .await;
        let buffer_vertices = self.buffer.purge_member(metadata_collection_id).await?;
        Ok(PurgeReport {
            reference_copies,
            buffer_vertices,
        })
    }

    // ---- Event routing ----

    /// Route one inbound event. Never fails: errors become `Dropped`.
    pub async fn handle_event(&self, event: InboundEvent) -> EventOutcome {
        let event_type = match &event {
            InboundEvent::Registration(r) => match r.action {
                RegistrationAction::Join => "JOIN",
                RegistrationAction::Leave => "LEAVE",
            },
            InboundEvent::Change(c) => c.event_type(),
        };

        let result = match event {
            InboundEvent::Registration(registration) => self.route_registration(registration).await,
            InboundEvent::Change(change) => self.route_change(change).await,
        };

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) if e.is_malformed_payload() => {
                warn!(event_type, error = %e, "Dropping malformed event");
                EventOutcome::Dropped(e.kind())
            }
            Err(e) => {
                error!(event_type, error = %e, "Event could not be applied");
                EventOutcome::Dropped(e.kind())
            }
        };
        debug!(event_type, ?outcome, "Event routed");
        observability::record_event(event_type, &outcome);
        outcome
    }

    async fn route_registration(&self, event: RegistrationEvent) -> Result<EventOutcome> {
        match event.action {
            RegistrationAction::Join => match self.register_member(event.member).await? {
                RegistrationOutcome::Joined => Ok(EventOutcome::Applied),
                RegistrationOutcome::Unchanged => Ok(EventOutcome::Ignored),
            },
            RegistrationAction::Leave => {
                match self
                    .unregister_member(&event.member.metadata_collection_id)
                    .await?
                {
                    Some(_) => Ok(EventOutcome::Applied),
                    None => Ok(EventOutcome::Ignored),
                }
            }
        }
    }

    async fn route_change(&self, event: ChangeEvent) -> Result<EventOutcome> {
        match event {
            ChangeEvent::EntityRefcopy(envelope) => {
                Ok(save_outcome(self.local.accept_entity_copy(envelope).await?))
            }
            ChangeEvent::RelationshipRefcopy(envelope) => {
                Ok(save_outcome(self.local.accept_relationship_copy(envelope).await?))
            }
            ChangeEvent::LineageEdge(fact) => match self.ingestor.ingest(fact).await? {
                IngestOutcome::Added => Ok(EventOutcome::Applied),
                IngestOutcome::Duplicate => Ok(EventOutcome::Ignored),
            },
            ChangeEvent::EntityDeleted(deleted) => self.apply_entity_delete(deleted).await,
            ChangeEvent::RelationshipDeleted(deleted) => self.apply_relationship_delete(deleted).await,
        }
    }

    async fn apply_entity_delete(&self, deleted: DeletedInstance) -> Result<EventOutcome> {
        self.check_delete_home(&deleted)?;
        let copies = self.local.reference_copies();
        if let Some(stored) = copies.get_entity(&deleted.guid) {
            check_stored_home(&deleted, &stored)?;
        }

        let copy_removed = copies.delete_entity(&deleted.guid).is_some();
        let vertex_removed = match self.buffer.vertex(&deleted.guid).await {
            Some(vertex) if homed_at(&vertex.home_collection_id, &deleted) => {
                self.ingestor.remove_entity(&deleted.guid).await?
            }
            _ => false,
        };
        Ok(applied_if(copy_removed || vertex_removed))
    }

    async fn apply_relationship_delete(&self, deleted: DeletedInstance) -> Result<EventOutcome> {
        self.check_delete_home(&deleted)?;
        let copies = self.local.reference_copies();
        if let Some(stored) = copies.get_relationship(&deleted.guid) {
            check_stored_home(&deleted, &stored)?;
        }

        let copy_removed = copies.delete_relationship(&deleted.guid).is_some();
        let edge_removed = self.ingestor.remove_relationship(&deleted.guid).await?;
        Ok(applied_if(copy_removed || edge_removed))
    }

    fn check_delete_home(&self, deleted: &DeletedInstance) -> Result<()> {
        if deleted.guid.trim().is_empty() {
            return Err(CohortError::InvalidParameter("deleted guid is empty".into()));
        }
        if self.registry.is_local(&deleted.home_metadata_collection_id) {
            return Err(CohortError::HomeEntity(format!(
                "{} is homed locally and cannot be deleted by a replicated event",
                deleted.guid
            )));
        }
        Ok(())
    }

    /// Consume events until the channel closes or the node shuts down.
    pub fn spawn_event_pump(self: &Arc<Self>, mut events: mpsc::Receiver<InboundEvent>) -> JoinHandle<()> {
        let node = Arc::clone(self);
        tokio::spawn(async move {
            info!("Event pump started");
            loop {
                tokio::select! {
                    event = events.recv() => match event {
                        Some(event) => {
                            node.handle_event(event).await;
                        }
                        None => {
                            info!("Event channel closed");
                            break;
                        }
                    },
                    _ = node.shutdown.wait_for_shutdown() => {
                        info!("Event pump stopping");
                        break;
                    }
                }
            }
        })
    }

    /// Keep federated clients in step with registry changes made outside the
    /// event pump, e.g. through the admin API.
    pub fn spawn_cohort_watcher(self: &Arc<Self>) -> JoinHandle<()> {
        let node = Arc::clone(self);
        let mut cohort_events = self.registry.subscribe();
        tokio::spawn(async move {
            node.connect_known_members().await;
            loop {
                tokio::select! {
                    event = cohort_events.recv() => match event {
                        Ok(CohortEvent::MemberJoined(member)) => {
                            if node.is_connected(&member.metadata_collection_id) {
                                continue;
                            }
                            if let Err(e) = node.connect_member(&member) {
                                warn!(
                                    member = %member.metadata_collection_id,
                                    error = %e,
                                    "Cannot connect to cohort member"
                                );
                            }
                        }
                        Ok(CohortEvent::MemberLeft(id)) => {
                            if let Err(e) = node.disconnect_member(&id).await {
                                warn!(member = %id, error = %e, "Purge after leave failed");
                            }
                        }
                        Err(RecvError::Lagged(missed)) => {
                            warn!(missed, "Cohort watcher lagged, resynchronizing");
                            node.resync_members().await;
                        }
                        Err(RecvError::Closed) => break,
                    },
                    _ = node.shutdown.wait_for_shutdown() => break,
                }
            }
            debug!("Cohort watcher stopped");
        })
    }

    async fn resync_members(&self) {
        let registered: Vec<String> = self
            .registry
            .list_members()
            .await
            .into_iter()
            .map(|m| m.metadata_collection_id)
            .collect();
        for id in self.federator.member_ids() {
            if !registered.contains(&id) {
                if let Err(e) = self.disconnect_member(&id).await {
                    warn!(member = %id, error = %e, "Purge after leave failed");
                }
            }
        }
        self.connect_known_members().await;
    }

    // ---- Lineage ----

    /// Run one promotion pass now.
    pub async fn trigger_promotion(&self) -> PromotionReport {
        self.promoter.run_once(&self.shutdown).await
    }

    pub fn spawn_promoter(&self, every: Duration) -> JoinHandle<()> {
        Arc::clone(&self.promoter).spawn(every, self.shutdown.clone())
    }

    /// Discard the main graph and promotion markers so the next promotion
    /// rebuilds lineage from the buffer graph.
    pub async fn reset_lineage(&self) -> Result<usize> {
        self.main.reset().await;
        let markers = self.buffer.clear_markers().await?;
        let mirrored = self.ingestor.reseed_main().await?;
        info!(markers, mirrored, "Lineage reset");
        Ok(markers)
    }

    pub async fn lineage(
        &self,
        scope: LineageScope,
        guid: &str,
        include_processes: bool,
    ) -> Result<LineageGraphView> {
        resolve_lineage(&self.main, scope, guid, include_processes).await
    }

    // ---- Status ----

    pub async fn cohort_status(&self) -> NodeStatus {
        let cohort = self.registry.status().await;
        let copies = self.local.reference_copies();
        let status = NodeStatus {
            federated_members: self.federator.member_ids(),
            home_entities: self.local.home_entity_count(),
            reference_copies: ReferenceCopyCounts {
                entities: copies.entity_count(),
                relationships: copies.relationship_count(),
            },
            buffer_graph: self.buffer.counts().await,
            main_graph: self.main.counts().await,
            cohort,
        };
        observability::update_cohort_metrics(&status.cohort, status.buffer_graph, status.main_graph);
        status
    }
}

fn save_outcome(outcome: SaveOutcome) -> EventOutcome {
    match outcome {
        SaveOutcome::Stored | SaveOutcome::Replaced => EventOutcome::Applied,
        SaveOutcome::Stale { .. } => EventOutcome::Ignored,
    }
}

fn applied_if(changed: bool) -> EventOutcome {
    if changed {
        EventOutcome::Applied
    } else {
        EventOutcome::Ignored
    }
}

fn homed_at(home: &Option<String>, deleted: &DeletedInstance) -> bool {
    match home {
        Some(home) => *home == deleted.home_metadata_collection_id,
        None => true,
    }
}

fn check_stored_home(deleted: &DeletedInstance, stored: &InstanceEnvelope) -> Result<()> {
    if stored.home_metadata_collection_id != deleted.home_metadata_collection_id {
        return Err(CohortError::HomeEntity(format!(
            "{} is homed at {}, delete came from {}",
            deleted.guid, stored.home_metadata_collection_id, deleted.home_metadata_collection_id
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cohort::ConnectionDescriptor;
    use crate::error::ErrorKind;
    use crate::graph::LineageVertex;
    use crate::instance::names;
    use crate::lineage::LineageFact;
    use crate::repository::{MetadataCollectionClient, SharedClient};

    /// Connects members to an empty in-process repository of their own.
    struct LoopbackConnector;

    impl ConnectorFactory for LoopbackConnector {
        fn connect(&self, member: &MemberRegistration) -> Result<SharedClient> {
            let registry = Arc::new(MemberRegistry::new(member.clone()));
            let copies = Arc::new(ReferenceCopyStore::new(registry));
            Ok(Arc::new(LocalRepository::new(
                member.metadata_collection_id.clone(),
                InstanceCodec::default(),
                copies,
            )))
        }
    }

    fn member(id: &str) -> MemberRegistration {
        MemberRegistration::new(id, id, ConnectionDescriptor::http(format!("{}:9443", id)))
    }

    fn node() -> CohortNode {
        let registry = Arc::new(MemberRegistry::new(MemberRegistration::new(
            "M1",
            "local",
            ConnectionDescriptor::in_process(),
        )));
        CohortNode::new(registry, Arc::new(LoopbackConnector))
    }

    async fn joined(node: &CohortNode, id: &str) {
        let outcome = node
            .handle_event(RegistrationEvent::join(member(id)).into())
            .await;
        assert_eq!(outcome, EventOutcome::Applied);
    }

    #[tokio::test]
    async fn test_join_connects_and_leave_purges() {
        let node = node();
        joined(&node, "M2").await;
        assert_eq!(node.federator().member_ids(), vec!["M2".to_string()]);

        let copy = InstanceEnvelope::entity("e1", "Asset", "M2").with_version(1);
        assert_eq!(
            node.handle_event(ChangeEvent::EntityRefcopy(copy).into()).await,
            EventOutcome::Applied
        );
        assert!(node.local_repository().get_entity("e1").await.is_ok());

        assert_eq!(
            node.handle_event(RegistrationEvent::leave(member("M2")).into()).await,
            EventOutcome::Applied
        );
        assert!(node.federator().member_ids().is_empty());
        assert!(node.local_repository().get_entity("e1").await.is_err());

        assert_eq!(
            node.handle_event(RegistrationEvent::leave(member("M2")).into()).await,
            EventOutcome::Ignored
        );
    }

    #[tokio::test]
    async fn test_duplicate_join_ignored_and_local_join_dropped() {
        let node = node();
        joined(&node, "M2").await;
        assert_eq!(
            node.handle_event(RegistrationEvent::join(member("M2")).into()).await,
            EventOutcome::Ignored
        );
        assert_eq!(
            node.handle_event(RegistrationEvent::join(member("M1")).into()).await,
            EventOutcome::Dropped(ErrorKind::InvalidParameter)
        );
    }

    struct RefusingConnector;

    impl ConnectorFactory for RefusingConnector {
        fn connect(&self, member: &MemberRegistration) -> Result<SharedClient> {
            Err(CohortError::InvalidParameter(format!(
                "no connector for {}",
                member.metadata_collection_id
            )))
        }
    }

    #[tokio::test]
    async fn test_unconnectable_member_is_not_registered() {
        let registry = Arc::new(MemberRegistry::new(MemberRegistration::new(
            "M1",
            "local",
            ConnectionDescriptor::in_process(),
        )));
        let node = CohortNode::new(registry, Arc::new(RefusingConnector));
        let mut cohort_events = node.registry().subscribe();

        assert_eq!(
            node.handle_event(RegistrationEvent::join(member("M2")).into()).await,
            EventOutcome::Dropped(ErrorKind::InvalidParameter)
        );
        assert!(node.registry().list_members().await.is_empty());
        assert!(node.federator().member_ids().is_empty());
        assert!(cohort_events.try_recv().is_err());

        let copy = InstanceEnvelope::entity("e1", "Asset", "M2");
        assert_eq!(
            node.handle_event(ChangeEvent::EntityRefcopy(copy).into()).await,
            EventOutcome::Dropped(ErrorKind::HomeEntity)
        );
    }

    #[tokio::test]
    async fn test_refcopy_routing() {
        let node = node();
        joined(&node, "M2").await;

        let v2 = InstanceEnvelope::entity("e1", "Asset", "M2").with_version(2);
        let v1 = InstanceEnvelope::entity("e1", "Asset", "M2").with_version(1);
        assert_eq!(
            node.handle_event(ChangeEvent::EntityRefcopy(v2).into()).await,
            EventOutcome::Applied
        );
        assert_eq!(
            node.handle_event(ChangeEvent::EntityRefcopy(v1).into()).await,
            EventOutcome::Ignored
        );

        let from_stranger = InstanceEnvelope::entity("e2", "Asset", "M9");
        assert_eq!(
            node.handle_event(ChangeEvent::EntityRefcopy(from_stranger).into()).await,
            EventOutcome::Dropped(ErrorKind::HomeEntity)
        );

        let local_home = InstanceEnvelope::entity("e3", "Asset", "M1");
        assert_eq!(
            node.handle_event(ChangeEvent::EntityRefcopy(local_home).into()).await,
            EventOutcome::Dropped(ErrorKind::HomeEntity)
        );
    }

    #[tokio::test]
    async fn test_delete_must_match_home() {
        let node = node();
        joined(&node, "M2").await;
        joined(&node, "M3").await;
        let copy = InstanceEnvelope::entity("e1", "Asset", "M2");
        node.handle_event(ChangeEvent::EntityRefcopy(copy).into()).await;

        let wrong_home = DeletedInstance {
            guid: "e1".to_string(),
            home_metadata_collection_id: "M3".to_string(),
        };
        assert_eq!(
            node.handle_event(ChangeEvent::EntityDeleted(wrong_home).into()).await,
            EventOutcome::Dropped(ErrorKind::HomeEntity)
        );

        let delete = DeletedInstance {
            guid: "e1".to_string(),
            home_metadata_collection_id: "M2".to_string(),
        };
        assert_eq!(
            node.handle_event(ChangeEvent::EntityDeleted(delete.clone()).into()).await,
            EventOutcome::Applied
        );
        assert_eq!(
            node.handle_event(ChangeEvent::EntityDeleted(delete).into()).await,
            EventOutcome::Ignored
        );
    }

    #[tokio::test]
    async fn test_lineage_edge_routing_and_reset() {
        let node = node();
        let fact = LineageFact {
            relationship_guid: "n1".to_string(),
            edge_type: names::NESTED_SCHEMA_ATTRIBUTE.to_string(),
            from: LineageVertex::new("table", names::RELATIONAL_TABLE),
            to: LineageVertex::new("col", names::RELATIONAL_COLUMN),
        };
        assert_eq!(
            node.handle_event(ChangeEvent::LineageEdge(fact.clone()).into()).await,
            EventOutcome::Applied
        );
        assert_eq!(
            node.handle_event(ChangeEvent::LineageEdge(fact).into()).await,
            EventOutcome::Ignored
        );

        assert_eq!(node.reset_lineage().await.unwrap(), 0);
        assert_eq!(node.main_graph().counts().await, GraphCounts { vertices: 2, edges: 1 });

        let status = node.cohort_status().await;
        assert_eq!(status.buffer_graph, GraphCounts { vertices: 2, edges: 1 });
        assert_eq!(status.cohort.total_members, 1);
    }

    #[tokio::test]
    async fn test_event_pump_and_watcher() {
        let node = Arc::new(node());
        let watcher = node.spawn_cohort_watcher();
        let (tx, rx) = mpsc::channel(8);
        let pump = node.spawn_event_pump(rx);

        // Registered outside the pump; the watcher connects it.
        node.registry().register(member("M2")).await.unwrap();
        tx.send(ChangeEvent::EntityRefcopy(InstanceEnvelope::entity("e1", "Asset", "M2")).into())
            .await
            .unwrap();

        tokio::time::timeout(Duration::from_secs(1), async {
            while node.local_repository().get_entity("e1").await.is_err()
                || node.federator().member_ids().is_empty()
            {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        node.shutdown_coordinator().shutdown();
        pump.await.unwrap();
        watcher.await.unwrap();
    }

    #[tokio::test]
    async fn test_purge_local_rejected() {
        let node = node();
        assert!(matches!(
            node.purge_member("M1").await,
            Err(CohortError::InvalidParameter(_))
        ));
    }
}
