//! Lineage queries over the main graph.

use super::promoter::{DATA_FLOW, INCLUDED_IN};
use crate::error::{CohortError, Result};
use crate::graph::{Direction, LineageEdge, LineageGraphView, LineageVertex, MainGraph};
use crate::instance::names;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet, VecDeque};

/// Which part of the lineage around an asset to return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineageScope {
    /// Everything upstream and downstream
    EndToEnd,
    /// The origins of the data, linked straight to the asset
    UltimateSource,
    /// Where the data finally lands, linked straight from the asset
    UltimateDestination,
    /// Structural relationships of the asset (tables, files, nested columns)
    Vertical,
}

#[derive(Default)]
struct Collected {
    vertices: BTreeMap<String, LineageVertex>,
    edges: BTreeMap<String, LineageEdge>,
}

impl Collected {
    fn add_vertex(&mut self, vertex: LineageVertex) {
        self.vertices.entry(vertex.guid.clone()).or_insert(vertex);
    }

    fn add_edge(&mut self, edge: LineageEdge) {
        self.edges.entry(edge.relationship_guid.clone()).or_insert(edge);
    }

    fn into_view(self) -> LineageGraphView {
        LineageGraphView {
            vertices: self.vertices.into_values().collect(),
            edges: self.edges.into_values().collect(),
        }
    }
}

/// Resolve the lineage of `guid` in the main graph.
///
/// With `include_processes` off, subprocesses are condensed into direct
/// column-to-column edges and process vertices are left out. The ultimate
/// scopes are always condensed.
pub async fn resolve_lineage(
    main: &MainGraph,
    scope: LineageScope,
    guid: &str,
    include_processes: bool,
) -> Result<LineageGraphView> {
    let start = main
        .vertex(guid)
        .await
        .ok_or_else(|| CohortError::NotFound(format!("{} is not in the lineage graph", guid)))?;

    let view = match scope {
        LineageScope::EndToEnd => {
            let mut collected = Collected::default();
            collected.add_vertex(start);
            walk(main, guid, Direction::Incoming, &mut collected).await;
            walk(main, guid, Direction::Outgoing, &mut collected).await;
            if include_processes {
                attach_processes(main, &mut collected).await;
                collected.into_view()
            } else {
                condense(collected)
            }
        }
        LineageScope::UltimateSource => ultimate(main, start, Direction::Incoming).await,
        LineageScope::UltimateDestination => ultimate(main, start, Direction::Outgoing).await,
        LineageScope::Vertical => vertical(main, start).await,
    };
    Ok(view)
}

/// Breadth-first walk over `DataFlow` edges.
async fn walk(main: &MainGraph, start: &str, direction: Direction, collected: &mut Collected) {
    let mut visited: HashSet<String> = HashSet::from([start.to_string()]);
    let mut queue: VecDeque<String> = VecDeque::from([start.to_string()]);

    while let Some(current) = queue.pop_front() {
        for (edge, next) in main.neighbors(&current, Some(DATA_FLOW), direction).await {
            collected.add_edge(edge);
            if visited.insert(next.guid.clone()) {
                queue.push_back(next.guid.clone());
                collected.add_vertex(next);
            }
        }
    }
}

async fn attach_processes(main: &MainGraph, collected: &mut Collected) {
    let sub_processes: Vec<String> = collected
        .vertices
        .values()
        .filter(|v| v.type_name == names::SUB_PROCESS)
        .map(|v| v.guid.clone())
        .collect();
    for guid in sub_processes {
        for (edge, process) in main.neighbors(&guid, Some(INCLUDED_IN), Direction::Outgoing).await {
            collected.add_edge(edge);
            collected.add_vertex(process);
        }
    }
}

fn is_process(vertex: &LineageVertex) -> bool {
    vertex.type_name == names::SUB_PROCESS || vertex.type_name == names::PROCESS
}

/// Replace every subprocess with direct edges from its inputs to its outputs.
fn condense(collected: Collected) -> LineageGraphView {
    let hidden: HashSet<String> = collected
        .vertices
        .values()
        .filter(|v| is_process(v))
        .map(|v| v.guid.clone())
        .collect();

    let mut result = Collected::default();
    for edge in collected.edges.values() {
        let from_hidden = hidden.contains(&edge.source_guid);
        let to_hidden = hidden.contains(&edge.destination_guid);
        match (from_hidden, to_hidden) {
            (false, false) => result.add_edge(edge.clone()),
            // Input side of a subprocess: pair it with every output side.
            (false, true) => {
                for out in collected
                    .edges
                    .values()
                    .filter(|e| e.source_guid == edge.destination_guid && e.edge_type == DATA_FLOW)
                    .filter(|e| !hidden.contains(&e.destination_guid))
                {
                    result.add_edge(LineageEdge::new(
                        format!("{}:{}", edge.destination_guid, out.destination_guid),
                        DATA_FLOW,
                        edge.source_guid.clone(),
                        out.destination_guid.clone(),
                    ));
                }
            }
            _ => {}
        }
    }
    for vertex in collected.vertices.into_values() {
        if !hidden.contains(&vertex.guid) {
            result.add_vertex(vertex);
        }
    }
    result.into_view()
}

async fn ultimate(main: &MainGraph, start: LineageVertex, direction: Direction) -> LineageGraphView {
    let mut collected = Collected::default();
    walk(main, &start.guid, direction, &mut collected).await;

    // A leaf has no further edge in the walk direction.
    let continues: HashSet<&str> = collected
        .edges
        .values()
        .map(|e| match direction {
            Direction::Incoming => e.destination_guid.as_str(),
            Direction::Outgoing => e.source_guid.as_str(),
        })
        .collect();

    let mut result = Collected::default();
    for vertex in collected.vertices.values() {
        if is_process(vertex) || continues.contains(vertex.guid.as_str()) {
            continue;
        }
        let (source, destination) = match direction {
            Direction::Incoming => (vertex.guid.clone(), start.guid.clone()),
            Direction::Outgoing => (start.guid.clone(), vertex.guid.clone()),
        };
        result.add_edge(LineageEdge::new(
            format!("{}->{}", source, destination),
            DATA_FLOW,
            source,
            destination,
        ));
        result.add_vertex(vertex.clone());
    }
    result.add_vertex(start);
    result.into_view()
}

/// Breadth-first walk over structural edges in both directions.
async fn vertical(main: &MainGraph, start: LineageVertex) -> LineageGraphView {
    let mut collected = Collected::default();
    let mut visited: HashSet<String> = HashSet::from([start.guid.clone()]);
    let mut queue: VecDeque<String> = VecDeque::from([start.guid.clone()]);
    collected.add_vertex(start);

    while let Some(current) = queue.pop_front() {
        for direction in [Direction::Outgoing, Direction::Incoming] {
            for (edge, next) in main.neighbors(&current, None, direction).await {
                if edge.edge_type == DATA_FLOW || edge.edge_type == INCLUDED_IN {
                    continue;
                }
                collected.add_edge(edge);
                if visited.insert(next.guid.clone()) {
                    queue.push_back(next.guid.clone());
                    collected.add_vertex(next);
                }
            }
        }
    }
    collected.into_view()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{GraphTransaction, MemoryGraphStore};
    use crate::lineage::promoter::sub_process_guid;
    use std::sync::Arc;

    /// a -> p1 -> b -> p2 -> c, with b nested in table t.
    async fn chain() -> MainGraph {
        let main = MainGraph::new(Arc::new(MemoryGraphStore::new()));
        let mut tx = GraphTransaction::new();
        for guid in ["a", "b", "c"] {
            tx.upsert_vertex(LineageVertex::new(guid, names::RELATIONAL_COLUMN));
        }
        tx.upsert_vertex(LineageVertex::new("t", names::RELATIONAL_TABLE));
        tx.add_edge(LineageEdge::new("n1", names::NESTED_SCHEMA_ATTRIBUTE, "t", "b"));
        for (input, process, output) in [("a", "p1", "b"), ("b", "p2", "c")] {
            let sub = sub_process_guid(input, process, output);
            tx.upsert_vertex(LineageVertex::new(process, names::PROCESS))
                .upsert_vertex(LineageVertex::new(sub.clone(), names::SUB_PROCESS))
                .add_edge(LineageEdge::new(format!("{}:in", sub), DATA_FLOW, input, sub.clone()))
                .add_edge(LineageEdge::new(format!("{}:out", sub), DATA_FLOW, sub.clone(), output))
                .add_edge(LineageEdge::new(format!("{}:process", sub), INCLUDED_IN, sub, process));
        }
        main.commit(tx).await.unwrap();
        main
    }

    #[tokio::test]
    async fn test_end_to_end_with_processes() {
        let main = chain().await;
        let view = resolve_lineage(&main, LineageScope::EndToEnd, "b", true).await.unwrap();
        for guid in ["a", "b", "c", "p1", "p2"] {
            assert!(view.contains_vertex(guid), "missing {}", guid);
        }
        assert!(!view.contains_vertex("t"));
        assert_eq!(view.edges.len(), 6);
    }

    #[tokio::test]
    async fn test_end_to_end_condensed() {
        let main = chain().await;
        let view = resolve_lineage(&main, LineageScope::EndToEnd, "a", false).await.unwrap();
        assert_eq!(view.vertices.len(), 3);
        assert!(view.has_edge_between("a", "b"));
        assert!(view.has_edge_between("b", "c"));
        assert_eq!(view.edges.len(), 2);
    }

    #[tokio::test]
    async fn test_ultimate_scopes() {
        let main = chain().await;
        let source = resolve_lineage(&main, LineageScope::UltimateSource, "c", false)
            .await
            .unwrap();
        assert_eq!(source.vertices.len(), 2);
        assert!(source.has_edge_between("a", "c"));

        let destination = resolve_lineage(&main, LineageScope::UltimateDestination, "a", true)
            .await
            .unwrap();
        assert!(destination.has_edge_between("a", "c"));
        assert!(!destination.contains_vertex("b"));
    }

    #[tokio::test]
    async fn test_vertical() {
        let main = chain().await;
        let view = resolve_lineage(&main, LineageScope::Vertical, "b", false).await.unwrap();
        assert_eq!(view.vertices.len(), 2);
        assert!(view.has_edge_between("t", "b"));
    }

    #[tokio::test]
    async fn test_unknown_guid() {
        let main = chain().await;
        let result = resolve_lineage(&main, LineageScope::EndToEnd, "nope", true).await;
        assert!(matches!(result, Err(CohortError::NotFound(_))));
    }
}
