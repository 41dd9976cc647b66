//! HTTP client for a peer member's repository routes.

use super::client::MetadataCollectionClient;
use crate::error::{CohortError, ErrorBody, Result};
use crate::instance::InstanceEnvelope;
use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

/// Default connection timeout for peer requests.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default request timeout for peer requests.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Client for a remote member's repository.
#[derive(Clone)]
pub struct RemoteRepository {
    metadata_collection_id: String,
    base_url: String,
    client: Client,
}

impl RemoteRepository {
    /// Create a client with default timeouts.
    pub fn new(metadata_collection_id: impl Into<String>, endpoint: &str) -> Self {
        Self::with_timeouts(
            metadata_collection_id,
            endpoint,
            DEFAULT_CONNECT_TIMEOUT,
            DEFAULT_REQUEST_TIMEOUT,
        )
    }

    /// Create a client with custom timeouts.
    pub fn with_timeouts(
        metadata_collection_id: impl Into<String>,
        endpoint: &str,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> Self {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            metadata_collection_id: metadata_collection_id.into(),
            base_url: normalize_endpoint(endpoint),
            client,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/repository{}", self.base_url, path)
    }

    async fn post(&self, path: &str, envelope: &InstanceEnvelope) -> Result<()> {
        let response = self.client.post(self.url(path)).json(envelope).send().await?;
        check_status(response).await.map(|_| ())
    }
}

pub(crate) fn normalize_endpoint(endpoint: &str) -> String {
    let trimmed = endpoint.trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("http://{}", trimmed)
    }
}

/// Turn a non-success response into the error the peer reported.
pub(crate) async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let text = response.text().await?;
    match serde_json::from_str::<ErrorBody>(&text) {
        Ok(body) => Err(CohortError::from_kind(body.kind, body.message)),
        Err(_) => Err(CohortError::Network(format!("HTTP {}: {}", status, text))),
    }
}

pub(crate) async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
    let response = check_status(response).await?;
    response
        .json()
        .await
        .map_err(|e| CohortError::Serialization(e.to_string()))
}

#[async_trait]
impl MetadataCollectionClient for RemoteRepository {
    fn metadata_collection_id(&self) -> &str {
        &self.metadata_collection_id
    }

    async fn get_entity(&self, guid: &str) -> Result<InstanceEnvelope> {
        debug!(member = %self.metadata_collection_id, guid = %guid, "Remote get_entity");
        let response = self
            .client
            .get(self.url(&format!("/entities/{}", guid)))
            .send()
            .await?;
        decode(response).await
    }

    async fn get_relationships_for_entity(
        &self,
        guid: &str,
        relationship_type: Option<&str>,
    ) -> Result<Vec<InstanceEnvelope>> {
        let mut request = self
            .client
            .get(self.url(&format!("/entities/{}/relationships", guid)));
        if let Some(type_name) = relationship_type {
            request = request.query(&[("type", type_name)]);
        }
        decode(request.send().await?).await
    }

    async fn find_entities(&self, type_name: Option<&str>, limit: usize) -> Result<Vec<InstanceEnvelope>> {
        let limit = limit.to_string();
        let mut query = vec![("limit", limit.as_str())];
        if let Some(type_name) = type_name {
            query.push(("type", type_name));
        }
        let response = self
            .client
            .get(self.url("/entities"))
            .query(&query)
            .send()
            .await?;
        decode(response).await
    }

    async fn save_entity_reference_copy(&self, envelope: InstanceEnvelope) -> Result<()> {
        self.post("/reference-copies/entities", &envelope).await
    }

    async fn save_relationship_reference_copy(&self, envelope: InstanceEnvelope) -> Result<()> {
        self.post("/reference-copies/relationships", &envelope).await
    }

    async fn add_entity(&self, envelope: InstanceEnvelope) -> Result<()> {
        self.post("/entities", &envelope).await
    }

    async fn add_relationship(&self, envelope: InstanceEnvelope) -> Result<()> {
        self.post("/relationships", &envelope).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_normalization() {
        let remote = RemoteRepository::new("M2", "127.0.0.1:9000/");
        assert_eq!(remote.base_url(), "http://127.0.0.1:9000");
        assert_eq!(remote.url("/entities/e1"), "http://127.0.0.1:9000/repository/entities/e1");

        let tls = RemoteRepository::new("M3", "https://m3.example.org");
        assert_eq!(tls.base_url(), "https://m3.example.org");
        assert_eq!(tls.metadata_collection_id(), "M3");
    }

    #[tokio::test]
    async fn test_unreachable_peer_is_network_error() {
        let remote = RemoteRepository::with_timeouts(
            "M2",
            "127.0.0.1:1",
            Duration::from_millis(200),
            Duration::from_millis(500),
        );
        let err = remote.get_entity("e1").await.unwrap_err();
        assert!(err.is_retryable());
    }
}
