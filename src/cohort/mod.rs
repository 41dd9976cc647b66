//! Cohort membership.
//!
//! The [`MemberRegistry`] is the single owner of cohort membership. Join and
//! leave notifications are broadcast to subscribers; the node reacts to them by
//! connecting or disconnecting federated clients and purging replicated copies.

mod registry;

pub use registry::{
    CohortEvent, CohortStatus, ConnectionDescriptor, MemberRegistration, MemberRegistry,
    RegistrationOutcome,
};
