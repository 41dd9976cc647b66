//! Member registry for a metadata cohort.
//!
//! Tracks the local member and every remote member that joined the cohort,
//! together with the connection metadata needed to reach it.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                       Member Registry                           │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  Local Member (immutable) │ Remote Members (join / leave)       │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  Registry File (JSON)     │ Cohort Events (broadcast)           │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use crate::error::{CohortError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info};

/// Capacity of the cohort event channel.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// How to reach a member's repository. Opaque to the registry beyond equality.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionDescriptor {
    /// Connector implementation, e.g. `"http"` or `"in-process"`.
    pub connector_type: String,
    /// Network endpoint of the member's repository service.
    pub endpoint: String,
    /// Connector-specific configuration.
    #[serde(default)]
    pub configuration: serde_json::Value,
}

impl ConnectionDescriptor {
    pub fn http(endpoint: impl Into<String>) -> Self {
        Self {
            connector_type: "http".to_string(),
            endpoint: endpoint.into(),
            configuration: serde_json::Value::Null,
        }
    }

    pub fn in_process() -> Self {
        Self {
            connector_type: "in-process".to_string(),
            endpoint: String::new(),
            configuration: serde_json::Value::Null,
        }
    }
}

/// Identity of one repository in the cohort.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberRegistration {
    /// Globally unique, never reused.
    pub metadata_collection_id: String,
    pub metadata_collection_name: String,
    pub server_name: String,
    pub server_type: String,
    pub organization_name: String,
    pub registration_time: DateTime<Utc>,
    pub connection: ConnectionDescriptor,
}

impl MemberRegistration {
    /// Registration stamped with the current time.
    pub fn new(
        metadata_collection_id: impl Into<String>,
        server_name: impl Into<String>,
        connection: ConnectionDescriptor,
    ) -> Self {
        let id = metadata_collection_id.into();
        Self {
            metadata_collection_name: id.clone(),
            metadata_collection_id: id,
            server_name: server_name.into(),
            server_type: "Metadata Repository".to_string(),
            organization_name: String::new(),
            registration_time: Utc::now(),
            connection,
        }
    }

    pub fn with_collection_name(mut self, name: &str) -> Self {
        self.metadata_collection_name = name.to_string();
        self
    }

    pub fn with_organization(mut self, organization: &str) -> Self {
        self.organization_name = organization.to_string();
        self
    }

    pub fn with_server_type(mut self, server_type: &str) -> Self {
        self.server_type = server_type.to_string();
        self
    }
}

/// Events emitted by the member registry.
#[derive(Debug, Clone, PartialEq)]
pub enum CohortEvent {
    /// A remote member joined the cohort.
    MemberJoined(MemberRegistration),
    /// A remote member left the cohort.
    MemberLeft(String),
}

/// Outcome of a registration request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationOutcome {
    /// The member was added and a join notification sent.
    Joined,
    /// The member was already registered with the same descriptor.
    Unchanged,
}

/// Summary of cohort membership.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CohortStatus {
    pub local: MemberRegistration,
    pub remote_members: Vec<MemberRegistration>,
    pub total_members: usize,
}

#[derive(Debug, Clone)]
struct MemberEntry {
    registration: MemberRegistration,
    join_sequence: u64,
}

#[derive(Debug, Default)]
struct Remotes {
    members: HashMap<String, MemberEntry>,
    next_sequence: u64,
}

impl Remotes {
    fn ordered(&self) -> Vec<MemberRegistration> {
        let mut entries: Vec<&MemberEntry> = self.members.values().collect();
        entries.sort_by_key(|e| e.join_sequence);
        entries.into_iter().map(|e| e.registration.clone()).collect()
    }
}

/// On-disk form of the registry.
#[derive(Debug, Serialize, Deserialize)]
struct RegistryFile {
    local_metadata_collection_id: String,
    remotes: Vec<MemberRegistration>,
}

/// Member Registry - owns cohort membership.
pub struct MemberRegistry {
    local: MemberRegistration,
    remotes: RwLock<Remotes>,
    registry_file: Option<PathBuf>,
    event_tx: broadcast::Sender<CohortEvent>,
}

impl MemberRegistry {
    /// Create an in-memory registry.
    pub fn new(local: MemberRegistration) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            local,
            remotes: RwLock::new(Remotes::default()),
            registry_file: None,
            event_tx,
        }
    }

    /// Open a durable registry, reloading remotes recorded in `path`.
    pub async fn open(local: MemberRegistration, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut registry = Self::new(local);

        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let file: RegistryFile = serde_json::from_slice(&bytes)?;
                if file.local_metadata_collection_id != registry.local.metadata_collection_id {
                    return Err(CohortError::Config(format!(
                        "registry file {} belongs to member {}, not {}",
                        path.display(),
                        file.local_metadata_collection_id,
                        registry.local.metadata_collection_id
                    )));
                }
                let remotes = registry.remotes.get_mut();
                for registration in file.remotes {
                    let join_sequence = remotes.next_sequence;
                    remotes.next_sequence += 1;
                    remotes.members.insert(
                        registration.metadata_collection_id.clone(),
                        MemberEntry {
                            registration,
                            join_sequence,
                        },
                    );
                }
                info!(
                    path = %path.display(),
                    members = remotes.members.len(),
                    "Reloaded cohort registry"
                );
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No registry file yet");
            }
            Err(e) => return Err(e.into()),
        }

        registry.registry_file = Some(path);
        Ok(registry)
    }

    /// The local member.
    pub fn local(&self) -> &MemberRegistration {
        &self.local
    }

    /// Subscribe to join/leave notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<CohortEvent> {
        self.event_tx.subscribe()
    }

    /// Register a remote member.
    pub async fn register(&self, remote: MemberRegistration) -> Result<RegistrationOutcome> {
        let id = remote.metadata_collection_id.clone();
        if id.trim().is_empty() {
            return Err(CohortError::InvalidParameter(
                "metadata collection id must not be empty".into(),
            ));
        }
        if id == self.local.metadata_collection_id {
            return Err(CohortError::InvalidParameter(format!(
                "{} is the local member and cannot join as a remote",
                id
            )));
        }

        let mut remotes = self.remotes.write().await;

        if let Some(existing) = remotes.members.get(&id) {
            if existing.registration.connection == remote.connection {
                debug!(member = %id, "Member re-registered with identical descriptor");
                return Ok(RegistrationOutcome::Unchanged);
            }
            return Err(CohortError::DuplicateMember(format!(
                "member {} is already registered with a different connection",
                id
            )));
        }

        let join_sequence = remotes.next_sequence;
        remotes.next_sequence += 1;
        remotes.members.insert(
            id.clone(),
            MemberEntry {
                registration: remote.clone(),
                join_sequence,
            },
        );

        if let Err(e) = self.persist(&remotes).await {
            remotes.members.remove(&id);
            return Err(e);
        }
        drop(remotes);

        info!(member = %id, server = %remote.server_name, "Member joined cohort");
        let _ = self.event_tx.send(CohortEvent::MemberJoined(remote));

        Ok(RegistrationOutcome::Joined)
    }

    /// Remove a remote member. Returns the removed registration, if any.
    pub async fn unregister(&self, metadata_collection_id: &str) -> Result<Option<MemberRegistration>> {
        let mut remotes = self.remotes.write().await;

        let Some(entry) = remotes.members.remove(metadata_collection_id) else {
            debug!(member = %metadata_collection_id, "Unregister of unknown member ignored");
            return Ok(None);
        };

        if let Err(e) = self.persist(&remotes).await {
            remotes
                .members
                .insert(metadata_collection_id.to_string(), entry);
            return Err(e);
        }
        drop(remotes);

        info!(member = %metadata_collection_id, "Member left cohort");
        let _ = self
            .event_tx
            .send(CohortEvent::MemberLeft(metadata_collection_id.to_string()));

        Ok(Some(entry.registration))
    }

    /// Snapshot of remote members in join order.
    pub async fn list_members(&self) -> Vec<MemberRegistration> {
        self.remotes.read().await.ordered()
    }

    /// Look up a remote member.
    pub async fn get(&self, metadata_collection_id: &str) -> Option<MemberRegistration> {
        self.remotes
            .read()
            .await
            .members
            .get(metadata_collection_id)
            .map(|e| e.registration.clone())
    }

    /// Whether `metadata_collection_id` is a registered remote member.
    pub async fn is_known_member(&self, metadata_collection_id: &str) -> bool {
        self.remotes
            .read()
            .await
            .members
            .contains_key(metadata_collection_id)
    }

    pub fn is_local(&self, metadata_collection_id: &str) -> bool {
        self.local.metadata_collection_id == metadata_collection_id
    }

    /// Membership summary.
    pub async fn status(&self) -> CohortStatus {
        let remote_members = self.list_members().await;
        CohortStatus {
            local: self.local.clone(),
            total_members: remote_members.len() + 1,
            remote_members,
        }
    }

    async fn persist(&self, remotes: &Remotes) -> Result<()> {
        let Some(path) = &self.registry_file else {
            return Ok(());
        };

        let file = RegistryFile {
            local_metadata_collection_id: self.local.metadata_collection_id.clone(),
            remotes: remotes.ordered(),
        };
        let bytes = serde_json::to_vec_pretty(&file)?;

        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}
