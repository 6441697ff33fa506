use std::collections::{HashMap, HashSet, VecDeque};

use serde::Serialize;
use shared_types::ActionGraph;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct GraphLayout {
    pub width: f32,
    pub height: f32,
    /// Node ids per column, left to right
    pub columns: Vec<Vec<String>>,
    pub positions: HashMap<String, (f32, f32)>,
}

const NODE_WIDTH: f32 = 188.0;
const NODE_HEIGHT: f32 = 66.0;
const COLUMN_GAP: f32 = 92.0;
const ROW_GAP: f32 = 20.0;
const PADDING: f32 = 22.0;

/// Breadth-first column assignment.
///
/// Roots are nodes without inbound edges, in the order given. Every node is
/// placed exactly once, so cycles do not loop; nodes only reachable through a
/// cycle start a new traversal at column zero. Dangling edges and self-loops
/// are ignored.
pub fn assign_columns(graph: &ActionGraph) -> Vec<Vec<String>> {
    let mut order: Vec<&str> = Vec::new();
    let mut known: HashSet<&str> = HashSet::new();
    for node in &graph.nodes {
        if known.insert(node.id.as_str()) {
            order.push(node.id.as_str());
        }
    }

    let mut children: HashMap<&str, Vec<&str>> = HashMap::new();
    let mut has_parent: HashSet<&str> = HashSet::new();
    for edge in &graph.edges {
        let (source, target) = (edge.source.as_str(), edge.target.as_str());
        if source == target || !known.contains(source) || !known.contains(target) {
            continue;
        }
        children.entry(source).or_default().push(target);
        has_parent.insert(target);
    }

    let mut depth: HashMap<&str, usize> = HashMap::new();
    let mut visit_order: Vec<&str> = Vec::new();
    let roots = order.iter().copied().filter(|id| !has_parent.contains(id));
    let rest = order.iter().copied();

    for start in roots.chain(rest) {
        if depth.contains_key(start) {
            continue;
        }
        depth.insert(start, 0);
        visit_order.push(start);
        let mut queue = VecDeque::from([start]);
        while let Some(current) = queue.pop_front() {
            let next_depth = depth[current] + 1;
            for child in children.get(current).into_iter().flatten().copied() {
                if !depth.contains_key(child) {
                    depth.insert(child, next_depth);
                    visit_order.push(child);
                    queue.push_back(child);
                }
            }
        }
    }

    let column_count = depth.values().copied().max().map_or(0, |max| max + 1);
    let mut columns: Vec<Vec<String>> = vec![Vec::new(); column_count];
    for id in visit_order {
        columns[depth[id]].push(id.to_string());
    }
    columns
}

pub fn layout_action_graph(graph: &ActionGraph) -> GraphLayout {
    let columns = assign_columns(graph);

    let max_rows = columns
        .iter()
        .map(std::vec::Vec::len)
        .max()
        .unwrap_or(1)
        .max(1);
    let column_count = columns.len().max(1);
    let height = PADDING * 2.0
        + (max_rows as f32 * NODE_HEIGHT)
        + ((max_rows.saturating_sub(1)) as f32 * ROW_GAP);
    let width = PADDING * 2.0
        + (column_count as f32 * NODE_WIDTH)
        + ((column_count.saturating_sub(1)) as f32 * COLUMN_GAP);

    let mut positions = HashMap::new();
    for (col_idx, column) in columns.iter().enumerate() {
        let x = PADDING + col_idx as f32 * (NODE_WIDTH + COLUMN_GAP);
        let col_height = (column.len() as f32 * NODE_HEIGHT)
            + ((column.len().saturating_sub(1)) as f32 * ROW_GAP);
        let start_y = (height - col_height) / 2.0;

        for (row_idx, key) in column.iter().enumerate() {
            let y = start_y + row_idx as f32 * (NODE_HEIGHT + ROW_GAP);
            positions.insert(key.clone(), (x, y));
        }
    }

    GraphLayout {
        width,
        height,
        columns,
        positions,
    }
}
