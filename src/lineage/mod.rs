//! Lineage graph synchronization.
//!
//! Lineage facts arriving as change events are staged in the buffer graph by
//! the [`LineageIngestor`]. The [`LineagePromoter`] periodically resolves
//! input column, process, output column paths in the buffer graph and
//! materializes them in the main graph as `SubProcess` vertices, which
//! [`resolve_lineage`] then queries.

mod ingest;
mod paths;
mod promoter;
mod query;

pub use ingest::{is_data_asset, IngestOutcome, LineageFact, LineageIngestor};
pub use paths::{is_column, resolve_process_paths, LineageTriple, ProcessPaths, INPUT_PORT};
pub use promoter::{sub_process_guid, LineagePromoter, PromotionReport, DATA_FLOW, INCLUDED_IN};
pub use query::{resolve_lineage, LineageScope};
