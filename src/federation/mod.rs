//! Enterprise federation.
//!
//! The [`EnterpriseFederator`] answers read requests on behalf of the whole
//! cohort. It fans each request out to the local repository and every
//! connected remote member, bounded by a caller deadline and a worker pool,
//! and merges the answers in cohort order with the local member first.
//!
//! Partial failures never fail a call: members that error or miss the
//! deadline are reported as [`MemberDiagnostic`]s next to the merged value.

mod federator;
mod result;

pub use federator::{EnterpriseFederator, DEFAULT_FEDERATION_TIMEOUT, DEFAULT_MAX_CONCURRENCY};
pub use result::{DiagnosticKind, EntityLookup, Federated, MemberDiagnostic, Provenance};
