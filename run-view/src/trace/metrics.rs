use std::collections::HashSet;

use shared_types::{ActionGraphNode, DerivedMetrics, ATTR_TOKEN_APPROX_IN, ATTR_TOKEN_APPROX_OUT};

use crate::normalize::finite_number;

pub const NANOS_PER_MILLI: f64 = 1_000_000.0;

/// Approximate tokens for one span. Absent, non-numeric and negative values count as zero.
pub fn node_tokens(node: &ActionGraphNode) -> f64 {
    [ATTR_TOKEN_APPROX_IN, ATTR_TOKEN_APPROX_OUT]
        .iter()
        .filter_map(|key| node.attrs.get(*key))
        .filter_map(finite_number)
        .map(|value| value.max(0.0))
        .sum()
}

pub fn token_cost(nodes: &[ActionGraphNode]) -> u64 {
    let total: f64 = nodes.iter().map(node_tokens).sum();
    total.round() as u64
}

/// Wall-clock span of the run in milliseconds.
///
/// `None` when no node carries a positive finite timestamp; zero would claim
/// an instantaneous run.
pub fn duration_ms(nodes: &[ActionGraphNode]) -> Option<f64> {
    let mut bounds: Option<(f64, f64)> = None;
    for value in nodes
        .iter()
        .flat_map(|node| [node.t0, node.t1])
        .flatten()
        .filter(|value| value.is_finite() && *value > 0.0)
    {
        bounds = Some(match bounds {
            Some((min, max)) => (min.min(value), max.max(value)),
            None => (value, value),
        });
    }
    bounds.map(|(min, max)| (max - min) / NANOS_PER_MILLI)
}

/// Distinct non-empty trace ids in first-seen order.
pub fn trace_ids(nodes: &[ActionGraphNode]) -> Vec<String> {
    let mut seen = HashSet::new();
    nodes
        .iter()
        .filter_map(|node| node.trace_id.as_deref())
        .filter(|trace_id| !trace_id.is_empty())
        .filter(|trace_id| seen.insert(*trace_id))
        .map(ToString::to_string)
        .collect()
}

pub fn compute_metrics(nodes: &[ActionGraphNode]) -> DerivedMetrics {
    DerivedMetrics {
        token_cost: token_cost(nodes),
        duration_ms: duration_ms(nodes),
        trace_ids: trace_ids(nodes),
    }
}
