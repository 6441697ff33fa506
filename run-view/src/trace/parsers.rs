use std::collections::{BTreeMap, HashSet};

use serde::Serialize;
use serde_json::Value;
use shared_types::{
    ActionGraph, ActionGraphNode, ComponentGraph, ComponentGraphNode, GraphEdge,
};

use crate::normalize::finite_number;

// ── Built graphs ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct BuiltGraphs {
    pub action_graph: ActionGraph,
    pub component_graph: ComponentGraph,
}

// ── Helper utilities ─────────────────────────────────────────────────────────

fn identifier(value: &Value) -> Option<String> {
    match value {
        Value::String(text) if !text.is_empty() => Some(text.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Cytoscape-style elements nest their fields under `data`.
fn element_fields(value: &Value) -> Option<&serde_json::Map<String, Value>> {
    let object = value.as_object()?;
    match object.get("data").and_then(|d| d.as_object()) {
        Some(data) if !object.contains_key("id") && !object.contains_key("source") => Some(data),
        _ => Some(object),
    }
}

fn section<'a>(document: &'a Value, graph: &str, key: &str) -> &'a [Value] {
    document
        .get(graph)
        .and_then(|g| g.get(key))
        .and_then(|v| v.as_array())
        .map(Vec::as_slice)
        .unwrap_or_default()
}

/// Positional `{prefix}-{n}` ids for nodes that carry none. Candidates already
/// used by the document, or handed out earlier, are skipped.
struct FallbackIds {
    prefix: &'static str,
    taken: HashSet<String>,
}

impl FallbackIds {
    fn new(prefix: &'static str, nodes: &[Value]) -> Self {
        let taken = nodes
            .iter()
            .filter_map(|node| element_fields(node)?.get("id").and_then(identifier))
            .collect();
        Self { prefix, taken }
    }

    fn next(&mut self, index: usize) -> String {
        let mut n = index + 1;
        loop {
            let candidate = format!("{}-{n}", self.prefix);
            if self.taken.insert(candidate.clone()) {
                return candidate;
            }
            n += 1;
        }
    }
}

// ── Parse functions ──────────────────────────────────────────────────────────

pub fn parse_action_node(
    value: &Value,
    fallback_id: impl FnOnce() -> String,
) -> Option<ActionGraphNode> {
    let fields = element_fields(value)?;
    let attrs: BTreeMap<String, Value> = fields
        .get("attrs")
        .and_then(|v| v.as_object())
        .map(|obj| obj.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        .unwrap_or_default();

    Some(ActionGraphNode {
        id: fields
            .get("id")
            .and_then(identifier)
            .unwrap_or_else(fallback_id),
        label: fields
            .get("label")
            .or_else(|| fields.get("name"))
            .and_then(|v| v.as_str())
            .unwrap_or("span")
            .to_string(),
        trace_id: fields.get("trace_id").and_then(identifier),
        t0: fields.get("t0").and_then(finite_number),
        t1: fields.get("t1").and_then(finite_number),
        attrs,
    })
}

pub fn parse_component_node(
    value: &Value,
    fallback_id: impl FnOnce() -> String,
) -> Option<ComponentGraphNode> {
    let fields = element_fields(value)?;
    let id = fields
        .get("id")
        .and_then(identifier)
        .unwrap_or_else(fallback_id);
    Some(ComponentGraphNode {
        label: fields
            .get("label")
            .and_then(|v| v.as_str())
            .map(ToString::to_string)
            .unwrap_or_else(|| id.clone()),
        id,
        items: fields
            .get("items")
            .and_then(|v| v.as_array())
            .map(|items| items.iter().filter_map(identifier).collect())
            .unwrap_or_default(),
    })
}

pub fn parse_edge(value: &Value) -> Option<GraphEdge> {
    let fields = element_fields(value)?;
    Some(GraphEdge {
        source: fields.get("source").and_then(identifier)?,
        target: fields.get("target").and_then(identifier)?,
    })
}

fn parse_edges(document: &Value, graph: &str) -> Vec<GraphEdge> {
    let raw = section(document, graph, "edges");
    let edges: Vec<GraphEdge> = raw.iter().filter_map(parse_edge).collect();
    if edges.len() != raw.len() {
        tracing::warn!(
            graph,
            skipped = raw.len() - edges.len(),
            "Skipped edges without a source or target"
        );
    }
    edges
}

// ── Graph building ───────────────────────────────────────────────────────────

/// Map a `graphs.json` document into action and component graphs.
///
/// Node attributes pass through untouched. Edges pointing at unknown nodes are
/// kept; see [`dangling_edges`].
pub fn build_graphs(document: &Value) -> BuiltGraphs {
    let raw_actions = section(document, "action_graph", "nodes");
    let mut span_ids = FallbackIds::new("span", raw_actions);
    let action_nodes: Vec<ActionGraphNode> = raw_actions
        .iter()
        .enumerate()
        .filter_map(|(index, node)| parse_action_node(node, || span_ids.next(index)))
        .collect();

    let raw_components = section(document, "component_graph", "nodes");
    let mut component_ids = FallbackIds::new("component", raw_components);
    let component_nodes: Vec<ComponentGraphNode> = raw_components
        .iter()
        .enumerate()
        .filter_map(|(index, node)| parse_component_node(node, || component_ids.next(index)))
        .collect();

    let graphs = BuiltGraphs {
        action_graph: ActionGraph {
            nodes: action_nodes,
            edges: parse_edges(document, "action_graph"),
        },
        component_graph: ComponentGraph {
            nodes: component_nodes,
            edges: parse_edges(document, "component_graph"),
        },
    };

    let dangling = dangling_action_edges(&graphs.action_graph).len()
        + dangling_component_edges(&graphs.component_graph).len();
    if dangling > 0 {
        tracing::warn!(dangling, "Graph document has edges referencing unknown nodes");
    }
    let misordered = graphs
        .action_graph
        .nodes
        .iter()
        .filter(|node| !node.is_well_ordered())
        .count();
    if misordered > 0 {
        tracing::warn!(misordered, "Action graph spans end before they start");
    }

    graphs
}

pub fn dangling_edges<'a>(
    node_ids: impl IntoIterator<Item = &'a str>,
    edges: &'a [GraphEdge],
) -> Vec<&'a GraphEdge> {
    let known: HashSet<&str> = node_ids.into_iter().collect();
    edges
        .iter()
        .filter(|edge| !known.contains(edge.source.as_str()) || !known.contains(edge.target.as_str()))
        .collect()
}

pub fn dangling_action_edges(graph: &ActionGraph) -> Vec<&GraphEdge> {
    dangling_edges(graph.nodes.iter().map(|n| n.id.as_str()), &graph.edges)
}

pub fn dangling_component_edges(graph: &ComponentGraph) -> Vec<&GraphEdge> {
    dangling_edges(graph.nodes.iter().map(|n| n.id.as_str()), &graph.edges)
}

/// One line per component node, `label: item, item`.
pub fn component_summary(graph: &ComponentGraph) -> Vec<String> {
    graph
        .nodes
        .iter()
        .map(|node| {
            let items = if node.items.is_empty() {
                "-".to_string()
            } else {
                node.items.join(", ")
            };
            format!("{}: {}", node.label, items)
        })
        .collect()
}
