//! HTTP surface of a cohort node.
//!
//! Serves three groups of routes:
//!
//! - `/repository/...`: the local repository, called by peers'
//!   [`RemoteRepository`](crate::repository::RemoteRepository) clients.
//! - `/cohort/...`, `/events`: membership administration and event intake.
//! - `/federation/...`, `/lineage/...`: federated reads and lineage queries.
//!
//! Errors are JSON [`ErrorBody`] values with a status derived from the kind.

use crate::cohort::{MemberRegistration, RegistrationOutcome};
use crate::error::{CohortError, ErrorBody, ErrorKind, Result};
use crate::events::InboundEvent;
use crate::instance::InstanceEnvelope;
use crate::lineage::LineageScope;
use crate::node::CohortNode;
use crate::repository::MetadataCollectionClient;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Default page size of entity listings.
const DEFAULT_LIST_LIMIT: usize = 100;

/// Shared state for handlers.
#[derive(Clone)]
pub struct ServerState {
    pub node: Arc<CohortNode>,
    /// Queue feeding the node's event pump.
    pub events: mpsc::Sender<InboundEvent>,
}

/// Build the router.
pub fn router(state: ServerState) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        // Repository
        .route("/repository/entities", get(find_entities).post(add_entity))
        .route("/repository/entities/:guid", get(get_entity))
        .route(
            "/repository/entities/:guid/relationships",
            get(get_relationships),
        )
        .route("/repository/relationships", post(add_relationship))
        .route(
            "/repository/reference-copies/entities",
            post(save_entity_copy),
        )
        .route(
            "/repository/reference-copies/relationships",
            post(save_relationship_copy),
        )
        // Cohort administration
        .route("/cohort/status", get(cohort_status))
        .route("/cohort/members", get(list_members).post(register_member))
        .route(
            "/cohort/members/:id",
            get(get_member).delete(unregister_member),
        )
        .route("/cohort/members/:id/purge", post(purge_member))
        .route("/events", post(enqueue_event))
        .route("/events/apply", post(apply_event))
        // Federation
        .route("/federation/entities/:guid", get(federated_entity))
        .route(
            "/federation/entities/:guid/relationships",
            get(federated_relationships),
        )
        .route("/federation/universe", get(federated_universe))
        // Lineage
        .route("/lineage/promote", post(trigger_promotion))
        .route("/lineage/reset", post(reset_lineage))
        .route("/lineage/:guid", get(lineage))
        .with_state(state)
}

/// Serve the router until `shutdown` resolves.
pub async fn run_server(
    bind_addr: SocketAddr,
    state: ServerState,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let listener = TcpListener::bind(bind_addr).await?;
    info!(addr = %bind_addr, "Cohort API listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| CohortError::Network(e.to_string()))
}

// Response helpers

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::InvalidParameter
        | ErrorKind::HomeEntity
        | ErrorKind::RelationshipEndsUnknown
        | ErrorKind::Serialization => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Conflict | ErrorKind::RelationshipAlreadyExists | ErrorKind::DuplicateMember => {
            StatusCode::CONFLICT
        }
        ErrorKind::RepositoryUnavailable | ErrorKind::Network => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::VertexCreation
        | ErrorKind::EdgeCreation
        | ErrorKind::Config
        | ErrorKind::Io
        | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn json_error(e: &CohortError) -> Response {
    (status_for(e.kind()), Json(ErrorBody::from(e))).into_response()
}

fn json_result<T: Serialize>(status: StatusCode, result: Result<T>) -> Response {
    match result {
        Ok(value) => (status, Json(value)).into_response(),
        Err(e) => json_error(&e),
    }
}

fn empty_result(status: StatusCode, result: Result<()>) -> Response {
    match result {
        Ok(()) => status.into_response(),
        Err(e) => json_error(&e),
    }
}

fn deadline(state: &ServerState, timeout_ms: Option<u64>) -> Duration {
    timeout_ms
        .map(Duration::from_millis)
        .unwrap_or_else(|| state.node.federator().default_timeout())
}

// Repository

#[derive(Debug, Deserialize)]
pub struct TypeQuery {
    #[serde(rename = "type")]
    pub type_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(rename = "type")]
    pub type_name: Option<String>,
    pub limit: Option<usize>,
}

async fn get_entity(State(state): State<ServerState>, Path(guid): Path<String>) -> Response {
    debug!(guid = %guid, "GetEntity");
    json_result(
        StatusCode::OK,
        state.node.local_repository().get_entity(&guid).await,
    )
}

async fn get_relationships(
    State(state): State<ServerState>,
    Path(guid): Path<String>,
    Query(query): Query<TypeQuery>,
) -> Response {
    json_result(
        StatusCode::OK,
        state
            .node
            .local_repository()
            .get_relationships_for_entity(&guid, query.type_name.as_deref())
            .await,
    )
}

async fn find_entities(State(state): State<ServerState>, Query(query): Query<ListQuery>) -> Response {
    json_result(
        StatusCode::OK,
        state
            .node
            .local_repository()
            .find_entities(
                query.type_name.as_deref(),
                query.limit.unwrap_or(DEFAULT_LIST_LIMIT),
            )
            .await,
    )
}

async fn add_entity(
    State(state): State<ServerState>,
    Json(envelope): Json<InstanceEnvelope>,
) -> Response {
    empty_result(
        StatusCode::CREATED,
        state.node.local_repository().add_entity(envelope).await,
    )
}

async fn add_relationship(
    State(state): State<ServerState>,
    Json(envelope): Json<InstanceEnvelope>,
) -> Response {
    empty_result(
        StatusCode::CREATED,
        state.node.local_repository().add_relationship(envelope).await,
    )
}

async fn save_entity_copy(
    State(state): State<ServerState>,
    Json(envelope): Json<InstanceEnvelope>,
) -> Response {
    empty_result(
        StatusCode::NO_CONTENT,
        state
            .node
            .local_repository()
            .save_entity_reference_copy(envelope)
            .await,
    )
}

async fn save_relationship_copy(
    State(state): State<ServerState>,
    Json(envelope): Json<InstanceEnvelope>,
) -> Response {
    empty_result(
        StatusCode::NO_CONTENT,
        state
            .node
            .local_repository()
            .save_relationship_reference_copy(envelope)
            .await,
    )
}

// Cohort administration

async fn cohort_status(State(state): State<ServerState>) -> Response {
    Json(state.node.cohort_status().await).into_response()
}

async fn list_members(State(state): State<ServerState>) -> Response {
    Json(state.node.registry().list_members().await).into_response()
}

async fn get_member(State(state): State<ServerState>, Path(id): Path<String>) -> Response {
    match state.node.registry().get(&id).await {
        Some(member) => Json(member).into_response(),
        None => json_error(&CohortError::NotFound(format!("member {}", id))),
    }
}

async fn register_member(
    State(state): State<ServerState>,
    Json(member): Json<MemberRegistration>,
) -> Response {
    match state.node.register_member(member).await {
        Ok(RegistrationOutcome::Joined) => StatusCode::CREATED.into_response(),
        Ok(RegistrationOutcome::Unchanged) => StatusCode::OK.into_response(),
        Err(e) => json_error(&e),
    }
}

async fn unregister_member(State(state): State<ServerState>, Path(id): Path<String>) -> Response {
    match state.node.unregister_member(&id).await {
        Ok(Some(report)) => Json(report).into_response(),
        Ok(None) => json_error(&CohortError::NotFound(format!("member {}", id))),
        Err(e) => json_error(&e),
    }
}

async fn purge_member(State(state): State<ServerState>, Path(id): Path<String>) -> Response {
    json_result(StatusCode::OK, state.node.purge_member(&id).await)
}

async fn enqueue_event(
    State(state): State<ServerState>,
    Json(event): Json<InboundEvent>,
) -> Response {
    match state.events.send(event).await {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(_) => json_error(&CohortError::Internal("event pump is not running".into())),
    }
}

/// Route an event synchronously and report what happened.
async fn apply_event(State(state): State<ServerState>, Json(event): Json<InboundEvent>) -> Response {
    Json(state.node.handle_event(event).await).into_response()
}

// Federation

#[derive(Debug, Deserialize)]
pub struct FederatedEntityQuery {
    #[serde(rename = "type")]
    pub type_name: Option<String>,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct FederatedRelationshipsQuery {
    #[serde(rename = "type")]
    pub type_name: Option<String>,
    #[serde(default)]
    pub page_start: usize,
    #[serde(default)]
    pub page_size: usize,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct UniverseQuery {
    #[serde(rename = "type")]
    pub type_name: Option<String>,
    pub cap: usize,
    pub timeout_ms: Option<u64>,
}

async fn federated_entity(
    State(state): State<ServerState>,
    Path(guid): Path<String>,
    Query(query): Query<FederatedEntityQuery>,
) -> Response {
    let timeout = deadline(&state, query.timeout_ms);
    json_result(
        StatusCode::OK,
        state
            .node
            .federator()
            .get_entity(&guid, query.type_name.as_deref(), timeout)
            .await,
    )
}

async fn federated_relationships(
    State(state): State<ServerState>,
    Path(guid): Path<String>,
    Query(query): Query<FederatedRelationshipsQuery>,
) -> Response {
    let timeout = deadline(&state, query.timeout_ms);
    json_result(
        StatusCode::OK,
        state
            .node
            .federator()
            .get_relationships_for_entity(
                &guid,
                query.type_name.as_deref(),
                query.page_start,
                query.page_size,
                timeout,
            )
            .await,
    )
}

async fn federated_universe(
    State(state): State<ServerState>,
    Query(query): Query<UniverseQuery>,
) -> Response {
    let timeout = deadline(&state, query.timeout_ms);
    json_result(
        StatusCode::OK,
        state
            .node
            .federator()
            .collect_universe(query.type_name.as_deref(), query.cap, timeout)
            .await,
    )
}

// Lineage

#[derive(Debug, Deserialize)]
pub struct LineageQuery {
    #[serde(default = "default_scope")]
    pub scope: LineageScope,
    #[serde(default)]
    pub include_processes: bool,
}

fn default_scope() -> LineageScope {
    LineageScope::EndToEnd
}

#[derive(Debug, Serialize)]
struct ResetResponse {
    markers_cleared: usize,
}

async fn trigger_promotion(State(state): State<ServerState>) -> Response {
    Json(state.node.trigger_promotion().await).into_response()
}

async fn reset_lineage(State(state): State<ServerState>) -> Response {
    json_result(
        StatusCode::OK,
        state
            .node
            .reset_lineage()
            .await
            .map(|markers_cleared| ResetResponse { markers_cleared }),
    )
}

async fn lineage(
    State(state): State<ServerState>,
    Path(guid): Path<String>,
    Query(query): Query<LineageQuery>,
) -> Response {
    json_result(
        StatusCode::OK,
        state
            .node
            .lineage(query.scope, &guid, query.include_processes)
            .await,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_for(ErrorKind::NotFound), StatusCode::NOT_FOUND);
        assert_eq!(status_for(ErrorKind::Conflict), StatusCode::CONFLICT);
        assert_eq!(status_for(ErrorKind::HomeEntity), StatusCode::BAD_REQUEST);
        assert_eq!(
            status_for(ErrorKind::RepositoryUnavailable),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_lineage_query_defaults() {
        let query: LineageQuery = serde_json::from_str("{}").unwrap();
        assert_eq!(query.scope, LineageScope::EndToEnd);
        assert!(!query.include_processes);
    }
}
