//! Resolution of column-level paths through a process in the buffer graph.

use crate::graph::{BufferGraph, Direction, LineageVertex};
use crate::instance::names;
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// `portType` value of ports that feed a process.
pub const INPUT_PORT: &str = "INPUT_PORT";

/// Edge types followed when walking from an input column towards outputs.
const FORWARD_EDGES: &[&str] = &[
    names::LINEAGE_MAPPING,
    names::SCHEMA_ATTRIBUTE_TYPE,
    names::PORT_DELEGATION,
    names::PROCESS_PORT,
    names::PORT_SCHEMA,
    names::ATTRIBUTE_FOR_SCHEMA,
];

pub fn is_column(type_name: &str) -> bool {
    type_name == names::RELATIONAL_COLUMN || type_name == names::TABULAR_COLUMN
}

/// One source column, process, target column path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineageTriple {
    pub input: LineageVertex,
    pub process_guid: String,
    pub output: LineageVertex,
}

/// Every path found through one process.
#[derive(Debug, Clone)]
pub struct ProcessPaths {
    pub process: LineageVertex,
    pub triples: Vec<LineageTriple>,
    /// Input columns from which no output column could be reached.
    pub unresolved_inputs: Vec<String>,
}

impl ProcessPaths {
    pub fn is_complete(&self) -> bool {
        !self.triples.is_empty() && self.unresolved_inputs.is_empty()
    }
}

/// Resolve the input/output column pairs of a process.
///
/// Input columns feed the process's input attributes through `LineageMapping`.
/// Each input is then walked forward; the first column reached on a branch
/// after entering the process (the vertex itself or one of its attributes) is
/// an output. A visited set bounds the walk, so cycles terminate and simply
/// yield no output.
pub async fn resolve_process_paths(buffer: &BufferGraph, process: &LineageVertex) -> ProcessPaths {
    let boundary = process_attributes(buffer, &process.guid).await;
    let inputs = input_columns(buffer, &process.guid, &boundary.inputs, &boundary.all).await;

    let mut triples = Vec::new();
    let mut unresolved_inputs = Vec::new();
    for input in inputs.into_values() {
        let outputs = output_columns(buffer, &process.guid, &input, &boundary.all).await;
        if outputs.is_empty() {
            unresolved_inputs.push(input.guid.clone());
            continue;
        }
        for output in outputs {
            triples.push(LineageTriple {
                input: input.clone(),
                process_guid: process.guid.clone(),
                output,
            });
        }
    }

    ProcessPaths {
        process: process.clone(),
        triples,
        unresolved_inputs,
    }
}

struct ProcessBoundary {
    /// Attributes data enters the process through
    inputs: BTreeSet<String>,
    /// Every attribute belonging to the process
    all: HashSet<String>,
}

async fn process_attributes(buffer: &BufferGraph, process_guid: &str) -> ProcessBoundary {
    let mut inputs = BTreeSet::new();
    let mut all = HashSet::new();

    for (_, port) in buffer
        .neighbors(process_guid, Some(names::PROCESS_PORT), Direction::Outgoing)
        .await
    {
        let is_input = port.property("portType") == Some(INPUT_PORT);
        for (_, schema) in buffer
            .neighbors(&port.guid, Some(names::PORT_SCHEMA), Direction::Outgoing)
            .await
        {
            for (_, attribute) in buffer
                .neighbors(&schema.guid, Some(names::ATTRIBUTE_FOR_SCHEMA), Direction::Outgoing)
                .await
            {
                if is_input {
                    inputs.insert(attribute.guid.clone());
                }
                all.insert(attribute.guid);
            }
        }
    }

    for (_, attribute) in buffer
        .neighbors(process_guid, Some(names::SCHEMA_ATTRIBUTE_TYPE), Direction::Incoming)
        .await
    {
        inputs.insert(attribute.guid.clone());
        all.insert(attribute.guid);
    }

    ProcessBoundary { inputs, all }
}

async fn input_columns(
    buffer: &BufferGraph,
    process_guid: &str,
    input_attributes: &BTreeSet<String>,
    boundary: &HashSet<String>,
) -> BTreeMap<String, LineageVertex> {
    let mut columns = BTreeMap::new();
    for attribute in input_attributes {
        for (_, source) in buffer
            .neighbors(attribute, Some(names::LINEAGE_MAPPING), Direction::Incoming)
            .await
        {
            if is_column(&source.type_name)
                && source.guid != process_guid
                && !boundary.contains(&source.guid)
            {
                columns.insert(source.guid.clone(), source);
            }
        }
    }
    columns
}

async fn output_columns(
    buffer: &BufferGraph,
    process_guid: &str,
    input: &LineageVertex,
    boundary: &HashSet<String>,
) -> Vec<LineageVertex> {
    let mut outputs: BTreeMap<String, LineageVertex> = BTreeMap::new();
    // Keyed on (guid, crossed): a vertex first seen before the process may
    // still be reached again through it.
    let mut visited: HashSet<(String, bool)> = HashSet::new();
    let mut stack: Vec<(String, bool)> = vec![(input.guid.clone(), false)];
    visited.insert((input.guid.clone(), false));

    while let Some((current, crossed)) = stack.pop() {
        for edge_type in FORWARD_EDGES {
            for (_, next) in buffer
                .neighbors(&current, Some(edge_type), Direction::Outgoing)
                .await
            {
                let is_own_process = next.guid == process_guid;
                let inside = is_own_process || boundary.contains(&next.guid);
                let crossed = crossed || inside;
                if !visited.insert((next.guid.clone(), crossed)) {
                    continue;
                }

                if crossed && !inside && is_column(&next.type_name) {
                    outputs.insert(next.guid.clone(), next);
                    continue;
                }
                // Another process's lineage is promoted on its own.
                if next.type_name == names::PROCESS && !is_own_process {
                    continue;
                }
                stack.push((next.guid, crossed));
            }
        }
    }

    outputs.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::MemoryGraphStore;
    use std::sync::Arc;

    async fn vertex(buffer: &BufferGraph, guid: &str, type_name: &str) {
        buffer
            .upsert_vertex(LineageVertex::new(guid, type_name))
            .await
            .unwrap();
    }

    async fn edge(buffer: &BufferGraph, guid: &str, edge_type: &str, from: &str, to: &str) {
        buffer.add_edge(guid, edge_type, from, to).await.unwrap();
    }

    fn buffer() -> BufferGraph {
        BufferGraph::new(Arc::new(MemoryGraphStore::new()))
    }

    #[tokio::test]
    async fn test_attribute_attached_to_process() {
        let buffer = buffer();
        vertex(&buffer, "col-in", names::RELATIONAL_COLUMN).await;
        vertex(&buffer, "col-mid", names::TABULAR_COLUMN).await;
        vertex(&buffer, "proc", names::PROCESS).await;
        vertex(&buffer, "col-out", names::RELATIONAL_COLUMN).await;
        edge(&buffer, "r1", names::LINEAGE_MAPPING, "col-in", "col-mid").await;
        edge(&buffer, "r2", names::SCHEMA_ATTRIBUTE_TYPE, "col-mid", "proc").await;
        edge(&buffer, "r3", names::PORT_DELEGATION, "proc", "col-out").await;

        let process = buffer.vertex("proc").await.unwrap();
        let paths = resolve_process_paths(&buffer, &process).await;
        assert!(paths.is_complete());
        assert_eq!(paths.triples.len(), 1);
        assert_eq!(paths.triples[0].input.guid, "col-in");
        assert_eq!(paths.triples[0].output.guid, "col-out");
    }

    #[tokio::test]
    async fn test_ports_with_fan_out() {
        let buffer = buffer();
        vertex(&buffer, "proc", names::PROCESS).await;
        buffer
            .upsert_vertex(
                LineageVertex::new("in-port", names::PORT_IMPLEMENTATION)
                    .with_property("portType", INPUT_PORT),
            )
            .await
            .unwrap();
        buffer
            .upsert_vertex(
                LineageVertex::new("out-port", names::PORT_IMPLEMENTATION)
                    .with_property("portType", "OUTPUT_PORT"),
            )
            .await
            .unwrap();
        for guid in ["in-schema", "out-schema"] {
            vertex(&buffer, guid, names::TABULAR_SCHEMA_TYPE).await;
        }
        for guid in ["src", "in-attr", "out-attr", "dst-a", "dst-b"] {
            vertex(&buffer, guid, names::TABULAR_COLUMN).await;
        }
        edge(&buffer, "p1", names::PROCESS_PORT, "proc", "in-port").await;
        edge(&buffer, "p2", names::PROCESS_PORT, "proc", "out-port").await;
        edge(&buffer, "s1", names::PORT_SCHEMA, "in-port", "in-schema").await;
        edge(&buffer, "s2", names::PORT_SCHEMA, "out-port", "out-schema").await;
        edge(&buffer, "a1", names::ATTRIBUTE_FOR_SCHEMA, "in-schema", "in-attr").await;
        edge(&buffer, "a2", names::ATTRIBUTE_FOR_SCHEMA, "out-schema", "out-attr").await;
        edge(&buffer, "m1", names::LINEAGE_MAPPING, "src", "in-attr").await;
        edge(&buffer, "m2", names::LINEAGE_MAPPING, "in-attr", "out-attr").await;
        edge(&buffer, "m3", names::LINEAGE_MAPPING, "out-attr", "dst-a").await;
        edge(&buffer, "m4", names::LINEAGE_MAPPING, "out-attr", "dst-b").await;

        let process = buffer.vertex("proc").await.unwrap();
        let paths = resolve_process_paths(&buffer, &process).await;
        let outputs: Vec<&str> = paths.triples.iter().map(|t| t.output.guid.as_str()).collect();
        assert_eq!(outputs, vec!["dst-a", "dst-b"]);
        assert!(paths.triples.iter().all(|t| t.input.guid == "src"));
    }

    #[tokio::test]
    async fn test_direct_mapping_does_not_hide_process_output() {
        let buffer = buffer();
        vertex(&buffer, "col-in", names::RELATIONAL_COLUMN).await;
        vertex(&buffer, "col-mid", names::TABULAR_COLUMN).await;
        vertex(&buffer, "proc", names::PROCESS).await;
        vertex(&buffer, "col-out", names::RELATIONAL_COLUMN).await;
        edge(&buffer, "r0", names::LINEAGE_MAPPING, "col-in", "col-out").await;
        edge(&buffer, "r1", names::LINEAGE_MAPPING, "col-in", "col-mid").await;
        edge(&buffer, "r2", names::SCHEMA_ATTRIBUTE_TYPE, "col-mid", "proc").await;
        edge(&buffer, "r3", names::PORT_DELEGATION, "proc", "col-out").await;

        let process = buffer.vertex("proc").await.unwrap();
        let paths = resolve_process_paths(&buffer, &process).await;
        assert!(paths.is_complete(), "unresolved: {:?}", paths.unresolved_inputs);
        assert_eq!(paths.triples.len(), 1);
        assert_eq!(paths.triples[0].input.guid, "col-in");
        assert_eq!(paths.triples[0].output.guid, "col-out");
    }

    #[tokio::test]
    async fn test_cycle_yields_no_path() {
        let buffer = buffer();
        vertex(&buffer, "col-in", names::RELATIONAL_COLUMN).await;
        vertex(&buffer, "attr", names::SCHEMA_ATTRIBUTE).await;
        vertex(&buffer, "proc", names::PROCESS).await;
        vertex(&buffer, "loop", names::SCHEMA_ATTRIBUTE).await;
        edge(&buffer, "r1", names::LINEAGE_MAPPING, "col-in", "attr").await;
        edge(&buffer, "r2", names::SCHEMA_ATTRIBUTE_TYPE, "attr", "proc").await;
        edge(&buffer, "r3", names::PORT_DELEGATION, "proc", "loop").await;
        edge(&buffer, "r4", names::LINEAGE_MAPPING, "loop", "attr").await;

        let process = buffer.vertex("proc").await.unwrap();
        let paths = resolve_process_paths(&buffer, &process).await;
        assert!(paths.triples.is_empty());
        assert_eq!(paths.unresolved_inputs, vec!["col-in".to_string()]);
        assert!(!paths.is_complete());
    }
}
