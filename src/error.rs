//! Error types for cohort operations.
//!
//! This module provides a unified error type [`CohortError`] for registry,
//! federation, replication and lineage operations, along with a convenient
//! [`Result`] type alias.
//!
//! # Error Categories
//!
//! - **Caller errors**: malformed input that retrying cannot fix
//!   ([`CohortError::InvalidParameter`]).
//! - **Instance errors**: missing instances and duplicate creation
//!   ([`CohortError::NotFound`], [`CohortError::Conflict`],
//!   [`CohortError::RelationshipAlreadyExists`]).
//! - **Replication errors**: malformed reference copies, dropped by the event
//!   router ([`CohortError::HomeEntity`], [`CohortError::RelationshipEndsUnknown`]).
//! - **Federation errors**: no cohort member answered
//!   ([`CohortError::RepositoryUnavailable`]).
//! - **Graph errors**: a vertex or edge transaction was rolled back.
//!
//! Every variant maps to a stable [`ErrorKind`], which is what crosses the HTTP
//! boundary alongside the human-readable message.
//!
//! # Example
//!
//! ```rust
//! use cohort::error::{CohortError, ErrorKind, Result};
//!
//! fn require_guid(guid: &str) -> Result<()> {
//!     if guid.is_empty() {
//!         return Err(CohortError::InvalidParameter("guid must not be empty".into()));
//!     }
//!     Ok(())
//! }
//!
//! let err = require_guid("").unwrap_err();
//! assert_eq!(err.kind(), ErrorKind::InvalidParameter);
//! assert!(!err.is_retryable());
//! ```

use serde::{Deserialize, Serialize};
use std::io;
use thiserror::Error;

/// Main error type for cohort operations.
#[derive(Error, Debug)]
pub enum CohortError {
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Relationship already exists: {0}")]
    RelationshipAlreadyExists(String),

    #[error("Repository unavailable: {0}")]
    RepositoryUnavailable(String),

    #[error("Home entity error: {0}")]
    HomeEntity(String),

    #[error("Relationship ends unknown: {0}")]
    RelationshipEndsUnknown(String),

    #[error("Duplicate member: {0}")]
    DuplicateMember(String),

    #[error("Vertex creation failed: {0}")]
    VertexCreation(String),

    #[error("Edge creation failed: {0}")]
    EdgeCreation(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration: {field}: {reason}")]
    InvalidConfig { field: String, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Stable, machine-readable error kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidParameter,
    NotFound,
    Conflict,
    RelationshipAlreadyExists,
    RepositoryUnavailable,
    HomeEntity,
    RelationshipEndsUnknown,
    DuplicateMember,
    VertexCreation,
    EdgeCreation,
    Timeout,
    Config,
    Serialization,
    Network,
    Io,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidParameter => "invalid_parameter",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::RelationshipAlreadyExists => "relationship_already_exists",
            ErrorKind::RepositoryUnavailable => "repository_unavailable",
            ErrorKind::HomeEntity => "home_entity",
            ErrorKind::RelationshipEndsUnknown => "relationship_ends_unknown",
            ErrorKind::DuplicateMember => "duplicate_member",
            ErrorKind::VertexCreation => "vertex_creation",
            ErrorKind::EdgeCreation => "edge_creation",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Config => "config",
            ErrorKind::Serialization => "serialization",
            ErrorKind::Network => "network",
            ErrorKind::Io => "io",
            ErrorKind::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl CohortError {
    /// The stable kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CohortError::InvalidParameter(_) => ErrorKind::InvalidParameter,
            CohortError::NotFound(_) => ErrorKind::NotFound,
            CohortError::Conflict(_) => ErrorKind::Conflict,
            CohortError::RelationshipAlreadyExists(_) => ErrorKind::RelationshipAlreadyExists,
            CohortError::RepositoryUnavailable(_) => ErrorKind::RepositoryUnavailable,
            CohortError::HomeEntity(_) => ErrorKind::HomeEntity,
            CohortError::RelationshipEndsUnknown(_) => ErrorKind::RelationshipEndsUnknown,
            CohortError::DuplicateMember(_) => ErrorKind::DuplicateMember,
            CohortError::VertexCreation(_) => ErrorKind::VertexCreation,
            CohortError::EdgeCreation(_) => ErrorKind::EdgeCreation,
            CohortError::Timeout(_) => ErrorKind::Timeout,
            CohortError::Config(_) | CohortError::InvalidConfig { .. } => ErrorKind::Config,
            CohortError::Serialization(_) => ErrorKind::Serialization,
            CohortError::Network(_) => ErrorKind::Network,
            CohortError::Io(_) => ErrorKind::Io,
            CohortError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Rebuild an error from a kind and message received over the wire.
    pub fn from_kind(kind: ErrorKind, message: impl Into<String>) -> Self {
        let message = message.into();
        match kind {
            ErrorKind::InvalidParameter => CohortError::InvalidParameter(message),
            ErrorKind::NotFound => CohortError::NotFound(message),
            ErrorKind::Conflict => CohortError::Conflict(message),
            ErrorKind::RelationshipAlreadyExists => CohortError::RelationshipAlreadyExists(message),
            ErrorKind::RepositoryUnavailable => CohortError::RepositoryUnavailable(message),
            ErrorKind::HomeEntity => CohortError::HomeEntity(message),
            ErrorKind::RelationshipEndsUnknown => CohortError::RelationshipEndsUnknown(message),
            ErrorKind::DuplicateMember => CohortError::DuplicateMember(message),
            ErrorKind::VertexCreation => CohortError::VertexCreation(message),
            ErrorKind::EdgeCreation => CohortError::EdgeCreation(message),
            ErrorKind::Timeout => CohortError::Timeout(message),
            ErrorKind::Config => CohortError::Config(message),
            ErrorKind::Serialization => CohortError::Serialization(message),
            ErrorKind::Network => CohortError::Network(message),
            ErrorKind::Io => CohortError::Io(io::Error::new(io::ErrorKind::Other, message)),
            ErrorKind::Internal => CohortError::Internal(message),
        }
    }

    /// Check if the caller may retry the operation (with backoff).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CohortError::RepositoryUnavailable(_)
                | CohortError::Timeout(_)
                | CohortError::Network(_)
        )
    }

    /// Malformed replication payloads are dropped rather than retried.
    pub fn is_malformed_payload(&self) -> bool {
        matches!(
            self,
            CohortError::InvalidParameter(_)
                | CohortError::HomeEntity(_)
                | CohortError::RelationshipEndsUnknown(_)
        )
    }
}

impl From<serde_json::Error> for CohortError {
    fn from(e: serde_json::Error) -> Self {
        CohortError::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for CohortError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            CohortError::Timeout(e.to_string())
        } else if e.is_decode() {
            CohortError::Serialization(e.to_string())
        } else {
            CohortError::Network(e.to_string())
        }
    }
}

/// Error body exchanged over HTTP.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&CohortError> for ErrorBody {
    fn from(e: &CohortError) -> Self {
        Self {
            kind: e.kind(),
            message: e.to_string(),
        }
    }
}

/// Result type alias for cohort operations.
pub type Result<T> = std::result::Result<T, CohortError>;
