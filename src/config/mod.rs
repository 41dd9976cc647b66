//! Configuration module for cohort nodes.

use crate::cohort::{ConnectionDescriptor, MemberRegistration};
use crate::error::{CohortError, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration for a cohort node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CohortConfig {
    /// The local member.
    pub local: LocalMemberConfig,
    /// File the registry persists remote members to.
    #[serde(default)]
    pub registry_file: Option<PathBuf>,
    /// HTTP server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Federated read configuration.
    #[serde(default)]
    pub federation: FederationConfig,
    /// Lineage synchronization configuration.
    #[serde(default)]
    pub lineage: LineageConfig,
    /// Observability configuration.
    #[serde(default)]
    pub observability: ObservabilityConfig,
    /// Time allowed for graceful shutdown.
    #[serde(with = "humantime_serde", default = "default_shutdown_timeout")]
    pub shutdown_timeout: Duration,
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(30)
}

impl Default for CohortConfig {
    fn default() -> Self {
        Self {
            local: LocalMemberConfig::default(),
            registry_file: None,
            server: ServerConfig::default(),
            federation: FederationConfig::default(),
            lineage: LineageConfig::default(),
            observability: ObservabilityConfig::default(),
            shutdown_timeout: default_shutdown_timeout(),
        }
    }
}

impl CohortConfig {
    /// Load configuration from a file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| CohortError::Config(format!("Failed to read config file: {}", e)))?;

        let config: Self = serde_json::from_str(&content)
            .map_err(|e| CohortError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        if self.local.metadata_collection_id.trim().is_empty() {
            return Err(CohortError::InvalidConfig {
                field: "local.metadata_collection_id".to_string(),
                reason: "Metadata collection id must not be empty".to_string(),
            });
        }

        if self.local.server_name.trim().is_empty() {
            return Err(CohortError::InvalidConfig {
                field: "local.server_name".to_string(),
                reason: "Server name must not be empty".to_string(),
            });
        }

        if self.federation.max_concurrency == 0 {
            return Err(CohortError::InvalidConfig {
                field: "federation.max_concurrency".to_string(),
                reason: "At least one concurrent member call is required".to_string(),
            });
        }

        if self.federation.timeout.is_zero() {
            return Err(CohortError::InvalidConfig {
                field: "federation.timeout".to_string(),
                reason: "Federation timeout must be non-zero".to_string(),
            });
        }

        if self.lineage.promotion_interval.is_zero() {
            return Err(CohortError::InvalidConfig {
                field: "lineage.promotion_interval".to_string(),
                reason: "Promotion interval must be non-zero".to_string(),
            });
        }

        if self.lineage.event_queue_capacity == 0 {
            return Err(CohortError::InvalidConfig {
                field: "lineage.event_queue_capacity".to_string(),
                reason: "Event queue capacity must be non-zero".to_string(),
            });
        }

        Ok(())
    }

    /// Create a minimal development configuration.
    pub fn development() -> Self {
        Self {
            local: LocalMemberConfig {
                metadata_collection_id: "dev-collection".to_string(),
                metadata_collection_name: "Development collection".to_string(),
                server_name: "dev-server".to_string(),
                server_type: "cohort".to_string(),
                organization_name: "dev".to_string(),
            },
            registry_file: Some(PathBuf::from("/tmp/cohort/registry.json")),
            server: ServerConfig {
                bind_addr: SocketAddr::from(([127, 0, 0, 1], 9443)),
                advertised_endpoint: None,
            },
            federation: FederationConfig {
                timeout: Duration::from_secs(2),
                ..FederationConfig::default()
            },
            lineage: LineageConfig {
                promotion_interval: Duration::from_secs(5),
                ..LineageConfig::default()
            },
            observability: ObservabilityConfig {
                metrics_enabled: false,
                log_level: "debug".to_string(),
                ..ObservabilityConfig::default()
            },
            shutdown_timeout: Duration::from_secs(5),
        }
    }

    /// Registration of the local member, as announced to the cohort.
    pub fn local_registration(&self) -> MemberRegistration {
        let endpoint = self
            .server
            .advertised_endpoint
            .clone()
            .unwrap_or_else(|| format!("http://{}", self.server.bind_addr));
        let mut registration = MemberRegistration::new(
            self.local.metadata_collection_id.clone(),
            self.local.server_name.clone(),
            ConnectionDescriptor::http(endpoint),
        )
        .with_organization(&self.local.organization_name)
        .with_server_type(&self.local.server_type);
        if !self.local.metadata_collection_name.is_empty() {
            registration = registration.with_collection_name(&self.local.metadata_collection_name);
        }
        registration
    }
}

/// Identity of the local member.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalMemberConfig {
    /// Unique, never reused collection id.
    pub metadata_collection_id: String,
    #[serde(default)]
    pub metadata_collection_name: String,
    pub server_name: String,
    #[serde(default = "default_server_type")]
    pub server_type: String,
    #[serde(default)]
    pub organization_name: String,
}

fn default_server_type() -> String {
    "cohort".to_string()
}

impl Default for LocalMemberConfig {
    fn default() -> Self {
        Self {
            metadata_collection_id: "local-collection".to_string(),
            metadata_collection_name: String::new(),
            server_name: "cohort-server".to_string(),
            server_type: default_server_type(),
            organization_name: String::new(),
        }
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind the repository and admin API.
    pub bind_addr: SocketAddr,
    /// Endpoint peers should use, if different from the bind address.
    #[serde(default)]
    pub advertised_endpoint: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 9443)),
            advertised_endpoint: None,
        }
    }
}

/// Federated read configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FederationConfig {
    /// Default deadline of a federated call.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Maximum concurrent member calls per federated call.
    pub max_concurrency: usize,
    /// Connection timeout for remote members.
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// Request timeout for remote members.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for FederationConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            max_concurrency: 16,
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Lineage synchronization configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineageConfig {
    /// Interval between promotion runs.
    #[serde(with = "humantime_serde")]
    pub promotion_interval: Duration,
    /// Capacity of the inbound event queue.
    pub event_queue_capacity: usize,
}

impl Default for LineageConfig {
    fn default() -> Self {
        Self {
            promotion_interval: Duration::from_secs(60),
            event_queue_capacity: 1024,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Enable Prometheus metrics.
    pub metrics_enabled: bool,
    /// Metrics bind address.
    pub metrics_addr: SocketAddr,
    /// Log level.
    pub log_level: String,
    /// Enable JSON logging.
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            metrics_enabled: true,
            metrics_addr: SocketAddr::from(([0, 0, 0, 0], 9090)),
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

/// Serde helper for Duration using humantime format.
pub mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{}ms", duration.as_millis()))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    pub(crate) fn parse_duration(s: &str) -> Result<Duration, String> {
        let s = s.trim();
        if let Some(ms) = s.strip_suffix("ms") {
            ms.parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|e| e.to_string())
        } else if let Some(s_val) = s.strip_suffix('s') {
            s_val
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|e| e.to_string())
        } else if let Some(m) = s.strip_suffix('m') {
            m.parse::<u64>()
                .map(|v| Duration::from_secs(v * 60))
                .map_err(|e| e.to_string())
        } else {
            s.parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|e| e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = CohortConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.federation.max_concurrency, 16);
    }

    #[test]
    fn test_development_config() {
        let config = CohortConfig::development();
        assert!(config.validate().is_ok());
        let registration = config.local_registration();
        assert_eq!(registration.metadata_collection_id, "dev-collection");
        assert_eq!(registration.connection.endpoint, "http://127.0.0.1:9443");
    }

    #[test]
    fn test_validation_rejects_empty_id() {
        let mut config = CohortConfig::development();
        config.local.metadata_collection_id = " ".to_string();
        assert!(matches!(
            config.validate(),
            Err(CohortError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_parse_from_json() {
        let json = r#"{
            "local": { "metadata_collection_id": "M1", "server_name": "s1" },
            "federation": {
                "timeout": "2s",
                "max_concurrency": 4,
                "connect_timeout": "500ms",
                "request_timeout": "5s"
            },
            "shutdown_timeout": "10s"
        }"#;
        let config: CohortConfig = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.federation.timeout, Duration::from_secs(2));
        assert_eq!(config.federation.connect_timeout, Duration::from_millis(500));
        assert_eq!(config.lineage.promotion_interval, Duration::from_secs(60));
        assert_eq!(config.local.server_type, "cohort");
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cohort.json");
        let config = CohortConfig::development();
        std::fs::write(&path, serde_json::to_string_pretty(&config).unwrap()).unwrap();

        let loaded = CohortConfig::from_file(&path).unwrap();
        assert_eq!(loaded.local.server_name, "dev-server");
        assert_eq!(loaded.shutdown_timeout, Duration::from_secs(5));
    }
}
