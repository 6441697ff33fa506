//! Shared types between the run-view core and presentation code
//!
//! These types are used by both:
//! - the `run-view` core (native Rust: normalizer, metrics, graph builder)
//! - presentation code (TypeScript bindings generated with ts-rs)
//!
//! Canonical records are version-independent. Wire records mirror what the
//! pipeline service actually sends over HTTP/WebSocket.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

// ============================================================================
// Run View (canonical)
// ============================================================================

/// Which payload generation(s) a run payload was recognized as.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "../../bindings/run_view.ts")]
pub enum PayloadShape {
    /// `plans`, `verdict`, `gate`, `artefacts.safety`
    Flat,
    /// `final_state.{executions,judgement,uncertainty}`, top-level `safety`
    Staged,
    /// Fields from both generations present
    Mixed,
    /// Neither generation matched; every field is defaulted
    #[default]
    Unrecognized,
}

/// Candidate remediation proposal. Identity is `id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[ts(export, export_to = "../../bindings/run_view.ts")]
pub struct Plan {
    pub id: String,
    pub title: String,
    pub hypothesis: String,
    /// Always within [0, 1] when present
    pub confidence: Option<f64>,
    pub blast_radius: Option<String>,
    pub steps: Vec<String>,
}

/// Safety verdict as reported by the pipeline.
///
/// `Unknown` means the service omitted the safety block entirely. It renders
/// like `Allowed` but must not be mistaken for an explicit pass.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "../../bindings/run_view.ts")]
pub enum SafetyStatus {
    Allowed,
    Blocked,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[ts(export, export_to = "../../bindings/run_view.ts")]
pub struct Safety {
    pub status: SafetyStatus,
    /// Distinct categories, first-seen order
    pub categories: Vec<String>,
    pub justification: Option<String>,
}

impl Safety {
    pub fn unknown() -> Self {
        Self {
            status: SafetyStatus::Unknown,
            categories: Vec::new(),
            justification: None,
        }
    }

    /// Rendered pass/block decision. An omitted block counts as allowed.
    pub fn allowed(&self) -> bool {
        !matches!(self.status, SafetyStatus::Blocked)
    }

    pub fn is_known(&self) -> bool {
        !matches!(self.status, SafetyStatus::Unknown)
    }
}

/// Go/no-go decision of the pipeline's uncertainty gate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default, TS)]
#[ts(export, export_to = "../../bindings/run_view.ts")]
pub struct Gate {
    pub action: Option<String>,
    /// Always within [0, 1] when present
    pub certainty: Option<f64>,
}

/// Canonical, version-independent view of one run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[ts(export, export_to = "../../bindings/run_view.ts")]
pub struct RunView {
    pub run_id: String,
    pub shape: PayloadShape,
    /// Generation order
    pub plans: Vec<Plan>,
    /// Not guaranteed to reference an entry of `plans`
    pub winner_plan_id: Option<String>,
    /// Plan object embedded in the verdict, if any
    pub verdict_plan: Option<Plan>,
    pub rationale: Option<String>,
    pub uncertainty_label: Option<String>,
    pub safety: Safety,
    pub gate: Gate,
    #[ts(type = "Record<string, unknown>")]
    pub artefacts: BTreeMap<String, serde_json::Value>,
    #[ts(type = "Record<string, unknown>")]
    pub artefacts_by_plan: BTreeMap<String, serde_json::Value>,
    pub provider: Option<String>,
    pub mode: Option<String>,
    pub thread_id: Option<String>,
    pub replay_hash: Option<String>,
}

impl RunView {
    pub fn plan(&self, plan_id: &str) -> Option<&Plan> {
        self.plans.iter().find(|plan| plan.id == plan_id)
    }

    /// Winner from the plan list, falling back to the verdict's embedded plan.
    pub fn winner_plan(&self) -> Option<&Plan> {
        self.winner_plan_id
            .as_deref()
            .and_then(|id| self.plan(id))
            .or(self.verdict_plan.as_ref())
    }
}

// ============================================================================
// Graphs (canonical)
// ============================================================================

/// One span of the execution trace.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[ts(export, export_to = "../../bindings/run_view.ts")]
pub struct ActionGraphNode {
    pub id: String,
    pub label: String,
    pub trace_id: Option<String>,
    /// Start, nanoseconds
    pub t0: Option<f64>,
    /// End, nanoseconds
    pub t1: Option<f64>,
    /// Span attributes, passed through untouched
    #[ts(type = "Record<string, unknown>")]
    pub attrs: BTreeMap<String, serde_json::Value>,
}

impl ActionGraphNode {
    /// False only when both timestamps are present and end precedes start.
    pub fn is_well_ordered(&self) -> bool {
        match (self.t0, self.t1) {
            (Some(t0), Some(t1)) => t1 >= t0,
            _ => true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, TS)]
#[ts(export, export_to = "../../bindings/run_view.ts")]
pub struct GraphEdge {
    pub source: String,
    pub target: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default, TS)]
#[ts(export, export_to = "../../bindings/run_view.ts")]
pub struct ActionGraph {
    pub nodes: Vec<ActionGraphNode>,
    pub edges: Vec<GraphEdge>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, TS)]
#[ts(export, export_to = "../../bindings/run_view.ts")]
pub struct ComponentGraphNode {
    pub id: String,
    pub label: String,
    pub items: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default, TS)]
#[ts(export, export_to = "../../bindings/run_view.ts")]
pub struct ComponentGraph {
    pub nodes: Vec<ComponentGraphNode>,
    pub edges: Vec<GraphEdge>,
}

/// Metrics computed from action graph nodes; never persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default, TS)]
#[ts(export, export_to = "../../bindings/run_view.ts")]
pub struct DerivedMetrics {
    pub token_cost: u64,
    /// `None` when no valid timestamp exists (not zero)
    pub duration_ms: Option<f64>,
    /// Distinct, first-seen order
    pub trace_ids: Vec<String>,
}

// ============================================================================
// Thread timeline
// ============================================================================

/// Chat message as displayed in the thread timeline
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[ts(export, export_to = "../../bindings/run_view.ts")]
pub struct ChatMessage {
    pub id: String,
    pub reply_to_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub author: String,
    pub content: String,
}

// ============================================================================
// Wire Types
// ============================================================================

/// One frame of the live thread feed (Teams-shaped message).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "../../bindings/run_view.ts")]
pub struct WireChatMessage {
    pub id: String,
    #[serde(default)]
    pub reply_to_id: Option<String>,
    pub created_date_time: DateTime<Utc>,
    #[serde(default)]
    pub from: Option<WireSender>,
    #[serde(default)]
    pub body: Option<WireBody>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[ts(export, export_to = "../../bindings/run_view.ts")]
pub struct WireSender {
    #[serde(default)]
    pub user: Option<WireUser>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "../../bindings/run_view.ts")]
pub struct WireUser {
    #[serde(default)]
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[ts(export, export_to = "../../bindings/run_view.ts")]
pub struct WireBody {
    #[serde(default)]
    pub content: String,
}

pub const UNKNOWN_AUTHOR: &str = "unknown";

impl From<WireChatMessage> for ChatMessage {
    fn from(wire: WireChatMessage) -> Self {
        let author = wire
            .from
            .and_then(|from| from.user)
            .and_then(|user| user.display_name)
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| UNKNOWN_AUTHOR.to_string());
        Self {
            id: wire.id,
            reply_to_id: wire.reply_to_id,
            created_at: wire.created_date_time,
            author,
            content: wire.body.map(|body| body.content).unwrap_or_default(),
        }
    }
}

/// Response of `POST /run/{thread_id}`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[ts(export, export_to = "../../bindings/run_view.ts")]
pub struct RunTriggerResponse {
    pub run_id: String,
    #[serde(default)]
    #[ts(type = "unknown")]
    pub verdict: serde_json::Value,
}

/// Response of `GET /threads`: thread id → message count
pub type ThreadCounts = BTreeMap<String, u64>;

// ============================================================================
// Constants
// ============================================================================

/// Span attribute keys the metrics engine reads
pub const ATTR_TOKEN_APPROX_IN: &str = "token.approx_in";
pub const ATTR_TOKEN_APPROX_OUT: &str = "token.approx_out";

/// Artefact kinds presentation code knows how to open
pub const ARTEFACT_PR_DIFF: &str = "pr_diff";
pub const ARTEFACT_JIRA: &str = "jira";
pub const ARTEFACT_SAFETY: &str = "safety";

// ============================================================================
// Tests
// ============================================================================
