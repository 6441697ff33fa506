//! The composed run display handed to presentation code.

use serde::Serialize;
use serde_json::Value;
use shared_types::{
    ActionGraph, ComponentGraph, DerivedMetrics, Plan, RunView, ARTEFACT_JIRA, ARTEFACT_PR_DIFF,
};

use crate::config::render_replay_command;
use crate::trace::parsers::component_summary;
use crate::trace::{compute_metrics, layout_action_graph, BuiltGraphs, GraphLayout};

pub const DEFAULT_PROVIDER_MODE: &str = "offline";
pub const REPLAY_HASH_PENDING: &str = "pending";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunDisplay {
    pub run_view: RunView,
    pub metrics: DerivedMetrics,
    pub action_graph: ActionGraph,
    pub component_graph: ComponentGraph,
    /// Rendered replay command, when the run names its thread
    pub reproduce_command: Option<String>,
}

/// Headline numbers shown above the plan cards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Ribbon {
    pub winner_confidence: Option<f64>,
    pub token_cost: u64,
    pub duration_ms: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Governance {
    pub run_id: String,
    pub provider: String,
    pub mode: String,
    pub trace_ids: Vec<String>,
    pub branch_count: usize,
    pub replay_hash: String,
    pub reproduce_command: Option<String>,
}

impl RunDisplay {
    /// `replay_template` is rendered with the run's thread id.
    pub fn compose(run_view: RunView, graphs: BuiltGraphs, replay_template: &str) -> Self {
        let metrics = compute_metrics(&graphs.action_graph.nodes);
        let reproduce_command = run_view
            .thread_id
            .as_deref()
            .map(|thread_id| render_replay_command(replay_template, thread_id));
        Self {
            run_view,
            metrics,
            action_graph: graphs.action_graph,
            component_graph: graphs.component_graph,
            reproduce_command,
        }
    }

    pub fn winner_plan(&self) -> Option<&Plan> {
        self.run_view.winner_plan()
    }

    pub fn ribbon(&self) -> Ribbon {
        Ribbon {
            winner_confidence: self.winner_plan().and_then(|plan| plan.confidence),
            token_cost: self.metrics.token_cost,
            duration_ms: self.metrics.duration_ms,
        }
    }

    pub fn governance(&self) -> Governance {
        let view = &self.run_view;
        Governance {
            run_id: view.run_id.clone(),
            provider: view
                .provider
                .clone()
                .unwrap_or_else(|| DEFAULT_PROVIDER_MODE.to_string()),
            mode: view
                .mode
                .clone()
                .unwrap_or_else(|| DEFAULT_PROVIDER_MODE.to_string()),
            trace_ids: self.metrics.trace_ids.clone(),
            branch_count: view.plans.len(),
            replay_hash: view
                .replay_hash
                .clone()
                .unwrap_or_else(|| REPLAY_HASH_PENDING.to_string()),
            reproduce_command: self.reproduce_command.clone(),
        }
    }

    pub fn has_diff(&self) -> bool {
        has_diff(&self.run_view)
    }

    pub fn has_jira(&self) -> bool {
        has_jira(&self.run_view)
    }

    pub fn component_summary(&self) -> Vec<String> {
        component_summary(&self.component_graph)
    }

    pub fn layout(&self) -> GraphLayout {
        layout_action_graph(&self.action_graph)
    }
}

fn non_empty(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(text) => !text.trim().is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(fields) => !fields.is_empty(),
        Value::Bool(flag) => *flag,
        Value::Number(_) => true,
    }
}

pub fn has_diff(view: &RunView) -> bool {
    view.artefacts.get(ARTEFACT_PR_DIFF).is_some_and(non_empty)
}

pub fn has_jira(view: &RunView) -> bool {
    view.artefacts
        .get(ARTEFACT_JIRA)
        .and_then(Value::as_object)
        .is_some_and(|ticket| !ticket.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::normalize;
    use crate::trace::build_graphs;
    use serde_json::json;

    const TEMPLATE: &str = "replay --thread {thread_id}";

    fn display(payload: Value, graphs: Value) -> RunDisplay {
        RunDisplay::compose(normalize(&payload), build_graphs(&graphs), TEMPLATE)
    }

    #[test]
    fn test_ribbon_uses_winner_confidence_and_metrics() {
        let display = display(
            json!({
                "run_id": "r1",
                "plans": [{"id": "p1", "confidence": 0.62}, {"id": "p2", "confidence": 0.4}],
                "verdict": {"winner_plan_id": "p1"}
            }),
            json!({"action_graph": {"nodes": [
                {"id": "a", "t0": 1_000_000_000i64, "t1": 2_500_000_000i64,
                 "attrs": {"token.approx_in": 100, "token.approx_out": 20}}
            ]}}),
        );

        let ribbon = display.ribbon();
        assert_eq!(ribbon.winner_confidence, Some(0.62));
        assert_eq!(ribbon.token_cost, 120);
        assert_eq!(ribbon.duration_ms, Some(1500.0));
    }

    #[test]
    fn test_governance_defaults() {
        let display = display(json!({"run_id": "r2", "plans": []}), json!({}));
        let governance = display.governance();
        assert_eq!(governance.provider, "offline");
        assert_eq!(governance.mode, "offline");
        assert_eq!(governance.replay_hash, "pending");
        assert_eq!(governance.branch_count, 0);
        assert_eq!(governance.reproduce_command, None);
    }

    #[test]
    fn test_governance_reports_run_details() {
        let display = display(
            json!({
                "run_id": "r3",
                "thread_id": "ci_flake",
                "provider": "anthropic",
                "mode": "live",
                "replay_hash": "abc123",
                "plans": [{"id": "p1"}, {"id": "p2"}]
            }),
            json!({"action_graph": {"nodes": [{"id": "a", "trace_id": "t-1"}]}}),
        );
        let governance = display.governance();
        assert_eq!(governance.provider, "anthropic");
        assert_eq!(governance.mode, "live");
        assert_eq!(governance.replay_hash, "abc123");
        assert_eq!(governance.branch_count, 2);
        assert_eq!(governance.trace_ids, vec!["t-1"]);
        assert_eq!(governance.reproduce_command.as_deref(), Some("replay --thread ci_flake"));
    }

    #[test]
    fn test_diff_and_jira_need_content() {
        let empty = display(
            json!({"plans": [], "artefacts": {"pr_diff": "  ", "jira": {}}}),
            json!({}),
        );
        assert!(!empty.has_diff());
        assert!(!empty.has_jira());

        let full = display(
            json!({"plans": [], "artefacts": {
                "pr_diff": "--- a/ci.yml\n+++ b/ci.yml",
                "jira": {"key": "OPS-12", "summary": "Flaky test"}
            }}),
            json!({}),
        );
        assert!(full.has_diff());
        assert!(full.has_jira());
    }

    #[test]
    fn test_winner_falls_back_to_verdict_plan() {
        let display = display(
            json!({
                "plans": [{"id": "p1"}],
                "verdict": {"winner": {"plan": {"id": "p9", "title": "Pin dependency", "confidence": 0.7}}}
            }),
            json!({}),
        );
        let winner = display.winner_plan().map(|plan| plan.id.as_str());
        assert_eq!(winner, Some("p9"));
        assert_eq!(display.ribbon().winner_confidence, Some(0.7));
    }
}
