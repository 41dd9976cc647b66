//! Repository and admin API over HTTP against a served node.

mod common;

use cohort::client::AdminClient;
use cohort::cohort::{ConnectionDescriptor, MemberRegistration, MemberRegistry};
use cohort::error::CohortError;
use cohort::events::{ChangeEvent, EventOutcome, RegistrationEvent};
use cohort::instance::{names, InstanceEnvelope, RelationshipEnd};
use cohort::lineage::LineageScope;
use cohort::node::CohortNode;
use cohort::repository::{HttpConnectorFactory, MetadataCollectionClient, RemoteRepository};
use cohort::server::{self, ServerState};
use common::*;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Serve a node on an ephemeral port; the pump consumes `/events`.
async fn serve(node: Arc<CohortNode>) -> SocketAddr {
    let (listener, addr) = bind_local().await;
    let (events, rx) = mpsc::channel(16);
    node.spawn_event_pump(rx);

    let app = server::router(ServerState {
        node: node.clone(),
        events,
    });
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    assert!(wait_for_server(&addr, 5).await, "server did not start");
    addr
}

fn http_node(id: &str) -> Arc<CohortNode> {
    let registry = Arc::new(MemberRegistry::new(local_member(id)));
    Arc::new(CohortNode::new(
        registry,
        Arc::new(HttpConnectorFactory::new(
            Duration::from_secs(1),
            Duration::from_secs(2),
        )),
    ))
}

#[tokio::test]
async fn test_remote_repository_round_trip() {
    let node = http_node("M2");
    let addr = serve(node).await;
    let remote = RemoteRepository::new("M2", &addr.to_string());
    assert_eq!(remote.base_url(), format!("http://{}", addr));

    remote
        .add_entity(InstanceEnvelope::entity("t1", names::RELATIONAL_TABLE, "M2"))
        .await
        .unwrap();
    remote
        .add_entity(
            InstanceEnvelope::entity("c1", names::RELATIONAL_COLUMN, "M2").with_property("name", "id"),
        )
        .await
        .unwrap();

    let fetched = remote.get_entity("c1").await.unwrap();
    assert_eq!(fetched.type_name, names::RELATIONAL_COLUMN);
    assert_eq!(fetched.property_str("name"), Some("id"));

    let nested = InstanceEnvelope::relationship(
        "n1",
        names::NESTED_SCHEMA_ATTRIBUTE,
        "M2",
        RelationshipEnd::new("t1", names::RELATIONAL_TABLE),
        RelationshipEnd::new("c1", names::RELATIONAL_COLUMN),
    );
    remote.add_relationship(nested).await.unwrap();

    let relationships = remote.get_relationships_for_entity("c1", None).await.unwrap();
    assert_eq!(relationships.len(), 1);
    assert_eq!(relationships[0].guid, "n1");

    let columns = remote
        .find_entities(Some(names::SCHEMA_ATTRIBUTE), 10)
        .await
        .unwrap();
    assert_eq!(columns.len(), 2);
}

#[tokio::test]
async fn test_remote_errors_keep_their_kind() {
    let addr = serve(http_node("M2")).await;
    let remote = RemoteRepository::new("M2", &addr.to_string());

    assert!(matches!(
        remote.get_entity("missing").await,
        Err(CohortError::NotFound(_))
    ));

    let entity = InstanceEnvelope::entity("e1", names::ASSET, "M2");
    remote.add_entity(entity.clone()).await.unwrap();
    assert!(matches!(
        remote.add_entity(entity).await,
        Err(CohortError::Conflict(_))
    ));

    let dangling = relationship("r1", names::DATA_CONTENT_FOR_DATA_SET, "M2", "e1", "nowhere");
    assert!(matches!(
        remote.add_relationship(dangling).await,
        Err(CohortError::RelationshipEndsUnknown(_))
    ));

    // M9 is not a member of M2's cohort.
    let stranger = InstanceEnvelope::entity("s1", names::ASSET, "M9");
    assert!(matches!(
        remote.save_entity_reference_copy(stranger).await,
        Err(CohortError::HomeEntity(_))
    ));
}

#[tokio::test]
async fn test_unreachable_member_is_a_network_error() {
    let (listener, addr) = bind_local().await;
    drop(listener);
    let remote = RemoteRepository::with_timeouts(
        "M2",
        &addr.to_string(),
        Duration::from_millis(200),
        Duration::from_millis(500),
    );
    let err = remote.get_entity("e1").await.unwrap_err();
    assert!(err.is_retryable(), "unexpected error {:?}", err);
}

#[tokio::test]
async fn test_admin_client_membership_and_events() {
    let addr = serve(http_node("M1")).await;
    let admin = AdminClient::new(&addr.to_string());
    assert!(admin.health().await.unwrap());

    let m2 = MemberRegistration::new("M2", "m2", ConnectionDescriptor::http("127.0.0.1:1"));
    assert!(admin.join(&m2).await.unwrap());
    assert!(!admin.join(&m2).await.unwrap());
    assert_eq!(admin.members().await.unwrap().len(), 1);

    let copy = InstanceEnvelope::entity("e1", names::ASSET, "M2").with_version(2);
    let outcome = admin
        .apply_event(&ChangeEvent::EntityRefcopy(copy).into())
        .await
        .unwrap();
    assert_eq!(outcome, EventOutcome::Applied);

    let status = admin.status().await.unwrap();
    assert_eq!(status.cohort.total_members, 2);
    assert_eq!(status.reference_copies.entities, 1);
    assert_eq!(status.federated_members, vec!["M2".to_string()]);

    let report = admin.leave("M2").await.unwrap();
    assert_eq!(report.reference_copies, 1);
    assert!(admin.members().await.unwrap().is_empty());
    assert!(matches!(admin.leave("M2").await, Err(CohortError::NotFound(_))));
}

#[tokio::test]
async fn test_admin_lineage_routes() {
    let addr = serve(http_node("M1")).await;
    let admin = AdminClient::new(&addr.to_string());

    for fact in [
        lineage_fact("r1", names::LINEAGE_MAPPING, ("in", names::RELATIONAL_COLUMN), ("mid", names::TABULAR_COLUMN)),
        lineage_fact("r2", names::SCHEMA_ATTRIBUTE_TYPE, ("mid", names::TABULAR_COLUMN), ("p", names::PROCESS)),
        lineage_fact("r3", names::PORT_DELEGATION, ("p", names::PROCESS), ("out", names::RELATIONAL_COLUMN)),
    ] {
        let outcome = admin
            .apply_event(&ChangeEvent::LineageEdge(fact).into())
            .await
            .unwrap();
        assert_eq!(outcome, EventOutcome::Applied);
    }

    let report = admin.promote().await.unwrap();
    assert_eq!(report.processes_promoted, 1);

    let view = admin
        .lineage("out", LineageScope::UltimateSource, false)
        .await
        .unwrap();
    assert!(view.has_edge_between("in", "out"));

    assert_eq!(admin.reset_lineage().await.unwrap(), 1);
    assert!(matches!(
        admin.lineage("nope", LineageScope::EndToEnd, true).await,
        Err(CohortError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_federated_lookup_over_http() {
    let m2 = http_node("M2");
    m2.local_repository()
        .add_entity(InstanceEnvelope::entity("e2", names::PROCESS, "M2"))
        .await
        .unwrap();
    let m2_addr = serve(m2).await;

    let m1 = http_node("M1");
    let m1_addr = serve(m1.clone()).await;

    let join = RegistrationEvent::join(MemberRegistration::new(
        "M2",
        "m2",
        ConnectionDescriptor::http(m2_addr.to_string()),
    ));
    assert_eq!(m1.handle_event(join.into()).await, EventOutcome::Applied);

    let admin = AdminClient::new(&m1_addr.to_string());
    let lookup = admin
        .federated_entity("e2", Some(names::ASSET))
        .await
        .unwrap();
    assert_eq!(lookup.value.answered_by, "M2");
    assert_eq!(lookup.value.entity.home_metadata_collection_id, "M2");
    assert!(!lookup.is_partial());
}

#[tokio::test]
async fn test_published_events_reach_the_pump() {
    let node = http_node("M1");
    let addr = serve(node.clone()).await;
    let admin = AdminClient::new(&addr.to_string());

    let m2 = MemberRegistration::new("M2", "m2", ConnectionDescriptor::http("127.0.0.1:1"));
    admin
        .publish_event(&RegistrationEvent::join(m2).into())
        .await
        .unwrap();
    let copy = InstanceEnvelope::entity("e1", names::ASSET, "M2");
    admin
        .publish_event(&ChangeEvent::EntityRefcopy(copy).into())
        .await
        .unwrap();

    assert_eventually!(
        node.local_repository().reference_copies().get_entity("e1").is_some(),
        2000
    );
    assert_eq!(node.federator().member_ids(), vec!["M2".to_string()]);
}
