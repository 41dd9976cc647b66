//! Result types of federated reads.

use crate::instance::InstanceEnvelope;
use serde::{Deserialize, Serialize};

/// Why a member is missing from a federated result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    Timeout,
    Error,
}

/// A member that did not contribute to a federated result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberDiagnostic {
    pub metadata_collection_id: String,
    pub kind: DiagnosticKind,
    pub message: String,
}

impl MemberDiagnostic {
    pub fn timeout(metadata_collection_id: impl Into<String>) -> Self {
        Self {
            metadata_collection_id: metadata_collection_id.into(),
            kind: DiagnosticKind::Timeout,
            message: "no answer before the deadline".to_string(),
        }
    }

    pub fn error(metadata_collection_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            metadata_collection_id: metadata_collection_id.into(),
            kind: DiagnosticKind::Error,
            message: message.into(),
        }
    }
}

/// A federated result, with diagnostics for members that were left out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Federated<T> {
    pub value: T,
    #[serde(default)]
    pub diagnostics: Vec<MemberDiagnostic>,
}

impl<T> Federated<T> {
    pub fn new(value: T, diagnostics: Vec<MemberDiagnostic>) -> Self {
        Self { value, diagnostics }
    }

    /// Some members did not contribute.
    pub fn is_partial(&self) -> bool {
        !self.diagnostics.is_empty()
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Federated<U> {
        Federated {
            value: f(self.value),
            diagnostics: self.diagnostics,
        }
    }
}

/// One member's answer to an entity lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub metadata_collection_id: String,
    pub home_metadata_collection_id: String,
    pub version: i64,
    pub is_proxy: bool,
}

impl Provenance {
    pub(crate) fn of(metadata_collection_id: &str, entity: &InstanceEnvelope) -> Self {
        Self {
            metadata_collection_id: metadata_collection_id.to_string(),
            home_metadata_collection_id: entity.home_metadata_collection_id.clone(),
            version: entity.version,
            is_proxy: entity.is_proxy,
        }
    }
}

/// Result of a federated entity lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityLookup {
    pub entity: InstanceEnvelope,
    /// Member whose copy was returned
    pub answered_by: String,
    /// Every member that returned the entity, in cohort order
    pub provenance: Vec<Provenance>,
    /// Members disagree on which collection is the entity's home
    pub conflicting_homes: bool,
}

impl EntityLookup {
    pub(crate) fn from_answers(answers: Vec<(String, InstanceEnvelope)>) -> Option<Self> {
        let provenance: Vec<Provenance> = answers
            .iter()
            .map(|(member, entity)| Provenance::of(member, entity))
            .collect();
        let conflicting_homes = provenance
            .iter()
            .any(|p| p.home_metadata_collection_id != provenance[0].home_metadata_collection_id);

        // First full copy wins; a proxy only if nobody has more.
        let chosen = answers
            .iter()
            .position(|(_, entity)| !entity.is_proxy)
            .unwrap_or(0);
        let (answered_by, entity) = answers.into_iter().nth(chosen)?;

        Some(Self {
            entity,
            answered_by,
            provenance,
            conflicting_homes,
        })
    }
}
