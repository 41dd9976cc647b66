//! Lineage graphs.
//!
//! Both the buffer graph and the main graph sit on a [`GraphStore`], so the
//! storage engine can be swapped without touching ingestion or promotion.
//! [`MemoryGraphStore`] is the embedded implementation.

mod buffer;
mod main_graph;
mod memory;
mod model;
mod store;

pub use buffer::{marker_guid, BufferGraph, INITIAL_LOAD_MARKER, MARKS};
pub use main_graph::MainGraph;
pub use memory::MemoryGraphStore;
pub use model::{Direction, LineageEdge, LineageGraphView, LineageVertex, Upsert};
pub use store::{CommitSummary, GraphCounts, GraphOp, GraphStore, GraphTransaction};
