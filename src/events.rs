//! Inbound cohort events.
//!
//! Registration events change cohort membership; change events carry
//! replicated instances and lineage facts. Both arrive on one queue and are
//! routed by the node.

use crate::cohort::MemberRegistration;
use crate::error::ErrorKind;
use crate::instance::InstanceEnvelope;
use crate::lineage::LineageFact;
use serde::{Deserialize, Serialize};

/// Membership change requested by the cohort.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RegistrationAction {
    Join,
    Leave,
}

/// A member joining or leaving.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrationEvent {
    pub action: RegistrationAction,
    pub member: MemberRegistration,
}

impl RegistrationEvent {
    pub fn join(member: MemberRegistration) -> Self {
        Self {
            action: RegistrationAction::Join,
            member,
        }
    }

    pub fn leave(member: MemberRegistration) -> Self {
        Self {
            action: RegistrationAction::Leave,
            member,
        }
    }
}

/// Identity of a deleted instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletedInstance {
    pub guid: String,
    pub home_metadata_collection_id: String,
}

/// A replicated change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeEvent {
    EntityRefcopy(InstanceEnvelope),
    RelationshipRefcopy(InstanceEnvelope),
    LineageEdge(LineageFact),
    EntityDeleted(DeletedInstance),
    RelationshipDeleted(DeletedInstance),
}

impl ChangeEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            ChangeEvent::EntityRefcopy(_) => "ENTITY_REFCOPY",
            ChangeEvent::RelationshipRefcopy(_) => "RELATIONSHIP_REFCOPY",
            ChangeEvent::LineageEdge(_) => "LINEAGE_EDGE",
            ChangeEvent::EntityDeleted(_) => "ENTITY_DELETED",
            ChangeEvent::RelationshipDeleted(_) => "RELATIONSHIP_DELETED",
        }
    }

    /// Guid of the instance the event is about.
    pub fn subject(&self) -> &str {
        match self {
            ChangeEvent::EntityRefcopy(e) | ChangeEvent::RelationshipRefcopy(e) => &e.guid,
            ChangeEvent::LineageEdge(fact) => &fact.relationship_guid,
            ChangeEvent::EntityDeleted(d) | ChangeEvent::RelationshipDeleted(d) => &d.guid,
        }
    }
}

/// Anything that can arrive on the node's event queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "channel", content = "event", rename_all = "snake_case")]
pub enum InboundEvent {
    Registration(RegistrationEvent),
    Change(ChangeEvent),
}

impl From<RegistrationEvent> for InboundEvent {
    fn from(event: RegistrationEvent) -> Self {
        InboundEvent::Registration(event)
    }
}

impl From<ChangeEvent> for InboundEvent {
    fn from(event: ChangeEvent) -> Self {
        InboundEvent::Change(event)
    }
}

/// What routing an event did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "kind", rename_all = "snake_case")]
pub enum EventOutcome {
    /// State changed.
    Applied,
    /// Nothing to do: a redelivery, a stale copy or an unknown guid.
    Ignored,
    /// Malformed or rejected payload, logged and discarded.
    Dropped(ErrorKind),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cohort::ConnectionDescriptor;

    #[test]
    fn test_change_event_wire_shape() {
        let event = ChangeEvent::EntityDeleted(DeletedInstance {
            guid: "e1".to_string(),
            home_metadata_collection_id: "M2".to_string(),
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event_type"], "ENTITY_DELETED");
        assert_eq!(json["payload"]["guid"], "e1");
        assert_eq!(event.event_type(), "ENTITY_DELETED");
        assert_eq!(event.subject(), "e1");
    }

    #[test]
    fn test_inbound_event_decodes() {
        let member = MemberRegistration::new("M2", "m2", ConnectionDescriptor::http("m2:9000"));
        let inbound: InboundEvent = RegistrationEvent::join(member).into();
        let json = serde_json::to_string(&inbound).unwrap();
        assert!(json.contains("\"JOIN\""));

        let decoded: InboundEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, inbound);
    }

    #[test]
    fn test_outcome_serialization() {
        let dropped = serde_json::to_value(EventOutcome::Dropped(ErrorKind::HomeEntity)).unwrap();
        assert_eq!(dropped["outcome"], "dropped");
        assert_eq!(dropped["kind"], "home_entity");
    }
}
