//! Client for a cohort node's administration API.

use crate::cohort::{CohortStatus, MemberRegistration};
use crate::error::Result;
use crate::events::{EventOutcome, InboundEvent};
use crate::federation::{EntityLookup, Federated};
use crate::graph::LineageGraphView;
use crate::lineage::{LineageScope, PromotionReport};
use crate::node::{NodeStatus, PurgeReport};
use crate::repository::{check_status, decode, normalize_endpoint};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

/// Default connection timeout for client requests.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default request timeout for client operations.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Client for the `/cohort`, `/events`, `/federation` and `/lineage` routes.
#[derive(Clone)]
pub struct AdminClient {
    base_url: String,
    client: Client,
}

#[derive(Deserialize)]
struct ResetResponse {
    markers_cleared: usize,
}

impl AdminClient {
    pub fn new(endpoint: &str) -> Self {
        Self::with_timeouts(endpoint, DEFAULT_CONNECT_TIMEOUT, DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn with_timeouts(endpoint: &str, connect_timeout: Duration, request_timeout: Duration) -> Self {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            base_url: normalize_endpoint(endpoint),
            client,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Check node health.
    pub async fn health(&self) -> Result<bool> {
        let response = self.client.get(self.url("/health")).send().await?;
        Ok(response.status().is_success())
    }

    pub async fn status(&self) -> Result<NodeStatus> {
        decode(self.client.get(self.url("/cohort/status")).send().await?).await
    }

    pub async fn members(&self) -> Result<Vec<MemberRegistration>> {
        decode(self.client.get(self.url("/cohort/members")).send().await?).await
    }

    /// Register a member. Returns true if it newly joined.
    pub async fn join(&self, member: &MemberRegistration) -> Result<bool> {
        let response = self
            .client
            .post(self.url("/cohort/members"))
            .json(member)
            .send()
            .await?;
        let response = check_status(response).await?;
        Ok(response.status() == reqwest::StatusCode::CREATED)
    }

    pub async fn leave(&self, metadata_collection_id: &str) -> Result<PurgeReport> {
        let response = self
            .client
            .delete(self.url(&format!("/cohort/members/{}", metadata_collection_id)))
            .send()
            .await?;
        decode(response).await
    }

    pub async fn purge(&self, metadata_collection_id: &str) -> Result<PurgeReport> {
        let response = self
            .client
            .post(self.url(&format!("/cohort/members/{}/purge", metadata_collection_id)))
            .send()
            .await?;
        decode(response).await
    }

    /// Queue an event for the node's event pump.
    pub async fn publish_event(&self, event: &InboundEvent) -> Result<()> {
        let response = self.client.post(self.url("/events")).json(event).send().await?;
        check_status(response).await.map(|_| ())
    }

    /// Route an event on the node and return the outcome.
    pub async fn apply_event(&self, event: &InboundEvent) -> Result<EventOutcome> {
        let response = self
            .client
            .post(self.url("/events/apply"))
            .json(event)
            .send()
            .await?;
        decode(response).await
    }

    pub async fn federated_entity(
        &self,
        guid: &str,
        type_name: Option<&str>,
    ) -> Result<Federated<EntityLookup>> {
        let mut request = self
            .client
            .get(self.url(&format!("/federation/entities/{}", guid)));
        if let Some(type_name) = type_name {
            request = request.query(&[("type", type_name)]);
        }
        decode(request.send().await?).await
    }

    pub async fn promote(&self) -> Result<PromotionReport> {
        decode(self.client.post(self.url("/lineage/promote")).send().await?).await
    }

    /// Reset lineage. Returns the number of promotion markers cleared.
    pub async fn reset_lineage(&self) -> Result<usize> {
        let response: ResetResponse =
            decode(self.client.post(self.url("/lineage/reset")).send().await?).await?;
        Ok(response.markers_cleared)
    }

    pub async fn lineage(
        &self,
        guid: &str,
        scope: LineageScope,
        include_processes: bool,
    ) -> Result<LineageGraphView> {
        let scope = serde_json::to_value(scope)?;
        let scope = scope.as_str().unwrap_or("end_to_end").to_string();
        let response = self
            .client
            .get(self.url(&format!("/lineage/{}", guid)))
            .query(&[
                ("scope", scope),
                ("include_processes", include_processes.to_string()),
            ])
            .send()
            .await?;
        decode(response).await
    }

    /// Membership summary without graph counts.
    pub async fn cohort(&self) -> Result<CohortStatus> {
        Ok(self.status().await?.cohort)
    }
}
