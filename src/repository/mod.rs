//! Repository access for cohort members.
//!
//! [`MetadataCollectionClient`] is the seam the federator talks through. The
//! local member is served by [`LocalRepository`]; peers are reached over HTTP
//! through [`RemoteRepository`].

mod client;
mod local;
mod remote;

pub use client::{ConnectorFactory, MetadataCollectionClient, SharedClient};
pub use local::LocalRepository;
pub use remote::RemoteRepository;
pub(crate) use remote::{check_status, decode, normalize_endpoint};

use crate::cohort::MemberRegistration;
use crate::error::{CohortError, Result};
use std::sync::Arc;
use std::time::Duration;

/// Connector type served by [`HttpConnectorFactory`].
pub const HTTP_CONNECTOR: &str = "http";

/// Builds [`RemoteRepository`] clients from member connection descriptors.
#[derive(Debug, Clone)]
pub struct HttpConnectorFactory {
    connect_timeout: Duration,
    request_timeout: Duration,
}

impl HttpConnectorFactory {
    pub fn new(connect_timeout: Duration, request_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            request_timeout,
        }
    }
}

impl Default for HttpConnectorFactory {
    fn default() -> Self {
        Self::new(Duration::from_secs(5), Duration::from_secs(30))
    }
}

impl ConnectorFactory for HttpConnectorFactory {
    fn connect(&self, member: &MemberRegistration) -> Result<SharedClient> {
        let connection = &member.connection;
        if connection.connector_type != HTTP_CONNECTOR {
            return Err(CohortError::InvalidParameter(format!(
                "member {} uses unsupported connector type {}",
                member.metadata_collection_id, connection.connector_type
            )));
        }
        if connection.endpoint.is_empty() {
            return Err(CohortError::InvalidParameter(format!(
                "member {} has no endpoint",
                member.metadata_collection_id
            )));
        }
        Ok(Arc::new(RemoteRepository::with_timeouts(
            member.metadata_collection_id.clone(),
            &connection.endpoint,
            self.connect_timeout,
            self.request_timeout,
        )))
    }
}
