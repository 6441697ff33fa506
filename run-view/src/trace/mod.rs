//! Derived observability from a run's span graphs.

pub mod layout;
pub mod metrics;
pub mod parsers;

pub use layout::{layout_action_graph, GraphLayout};
pub use metrics::compute_metrics;
pub use parsers::{build_graphs, dangling_action_edges, dangling_component_edges, BuiltGraphs};
