//! Run payload normalization.
//!
//! The pipeline service has shipped two payload generations:
//!
//! - **flat**: `plans`, `verdict.winner_plan_id`, `gate.{action,certainty}`,
//!   `artefacts.safety`
//! - **staged**: `final_state.executions`, `final_state.judgement.winner_plan_id`,
//!   `final_state.uncertainty.{decision,certainty}`, top-level
//!   `safety.{allowed,category,justification}`
//!
//! Every canonical field is resolved through a precedence table of JSON
//! pointers tagged with the generation they belong to. The first entry that
//! yields a usable value wins; flat entries always come first. Resolution is
//! total: entries with missing, null or mistyped values are skipped, and a
//! field with no usable entry falls back to `None`/empty.

use std::collections::BTreeMap;

use serde_json::Value;
use shared_types::{Gate, PayloadShape, Plan, RunView, Safety, SafetyStatus};

// ── Precedence tables ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Generation {
    Flat,
    Staged,
}

type FieldTable = &'static [(Generation, &'static str)];

const RUN_ID: FieldTable = &[
    (Generation::Flat, "/run_id"),
    (Generation::Staged, "/final_state/run_id"),
];
const PLANS: FieldTable = &[
    (Generation::Flat, "/plans"),
    (Generation::Staged, "/final_state/executions"),
];
const WINNER_PLAN_ID: FieldTable = &[
    (Generation::Flat, "/verdict/winner_plan_id"),
    (Generation::Flat, "/verdict/winner/plan/id"),
    (Generation::Staged, "/final_state/judgement/winner_plan_id"),
];
const VERDICT_PLAN: FieldTable = &[
    (Generation::Flat, "/verdict/winner/plan"),
    (Generation::Staged, "/final_state/judgement/winner/plan"),
];
const GATE_ACTION: FieldTable = &[
    (Generation::Flat, "/gate/action"),
    (Generation::Flat, "/verdict/action"),
    (Generation::Staged, "/final_state/uncertainty/decision"),
];
const GATE_CERTAINTY: FieldTable = &[
    (Generation::Flat, "/gate/certainty"),
    (Generation::Flat, "/verdict/certainty"),
    (Generation::Staged, "/final_state/uncertainty/certainty"),
];
const SAFETY: FieldTable = &[
    (Generation::Flat, "/artefacts/safety"),
    (Generation::Staged, "/safety"),
];
const RATIONALE: FieldTable = &[
    (Generation::Flat, "/verdict/rationale"),
    (Generation::Staged, "/final_state/judgement/rationale"),
];
const UNCERTAINTY_LABEL: FieldTable = &[
    (Generation::Flat, "/verdict/uncertainty"),
    (Generation::Staged, "/final_state/judgement/uncertainty"),
];
const ARTEFACTS: FieldTable = &[
    (Generation::Flat, "/artefacts"),
    (Generation::Staged, "/final_state/artefacts"),
];
const ARTEFACTS_BY_PLAN: FieldTable = &[
    (Generation::Flat, "/artefacts_by_plan"),
    (Generation::Staged, "/final_state/artefacts_by_plan"),
];
const THREAD_ID: FieldTable = &[
    (Generation::Flat, "/thread_id"),
    (Generation::Staged, "/final_state/thread_id"),
];
const PROVIDER: FieldTable = &[(Generation::Flat, "/provider")];
const MODE: FieldTable = &[(Generation::Flat, "/mode")];
const REPLAY_HASH: FieldTable = &[(Generation::Flat, "/replay_hash")];

/// Top-level keys that mark each generation.
const FLAT_MARKERS: &[&str] = &["plans", "verdict", "gate", "artefacts"];
const STAGED_MARKERS: &[&str] = &["final_state", "safety"];

fn resolve<T>(payload: &Value, table: FieldTable, accept: impl Fn(&Value) -> Option<T>) -> Option<T> {
    table.iter().find_map(|(generation, pointer)| {
        let value = accept(payload.pointer(pointer)?)?;
        tracing::trace!(field = *pointer, ?generation, "Resolved run field");
        Some(value)
    })
}

// ── Scalar coercions ─────────────────────────────────────────────────────────

fn non_empty_string(value: &Value) -> Option<String> {
    match value {
        Value::String(text) if !text.trim().is_empty() => Some(text.clone()),
        _ => None,
    }
}

/// Identifiers occasionally arrive as numbers.
fn identifier(value: &Value) -> Option<String> {
    match value {
        Value::Number(n) => Some(n.to_string()),
        other => non_empty_string(other),
    }
}

/// Numbers or numeric strings, finite only.
pub(crate) fn finite_number(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    number.is_finite().then_some(number)
}

fn unit_interval(value: &Value) -> Option<f64> {
    finite_number(value).map(|n| n.clamp(0.0, 1.0))
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(text) => !text.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn object_map(value: &Value) -> Option<BTreeMap<String, Value>> {
    value
        .as_object()
        .map(|obj| obj.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
}

// ── Plans ────────────────────────────────────────────────────────────────────

fn parse_plan(value: &Value, fallback_id: impl FnOnce() -> String) -> Option<Plan> {
    let mut object = value.as_object()?;
    // Staged executions wrap the plan in a branch record.
    if !object.contains_key("id") && !object.contains_key("plan_id") {
        if let Some(inner) = object.get("plan").and_then(|v| v.as_object()) {
            object = inner;
        }
    }
    if object.is_empty() {
        return None;
    }

    let id = object
        .get("id")
        .and_then(identifier)
        .or_else(|| object.get("plan_id").and_then(identifier))
        .unwrap_or_else(fallback_id);
    let text = |key: &str| {
        object
            .get(key)
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string()
    };
    let steps = object
        .get("steps")
        .and_then(|v| v.as_array())
        .map(|steps| {
            steps
                .iter()
                .filter_map(|step| match step {
                    Value::String(text) => Some(text.clone()),
                    Value::Number(n) => Some(n.to_string()),
                    Value::Bool(b) => Some(b.to_string()),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default();

    Some(Plan {
        id,
        title: text("title"),
        hypothesis: text("hypothesis"),
        confidence: object.get("confidence").and_then(unit_interval),
        blast_radius: object
            .get("blast_radius")
            .or_else(|| object.get("blastRadius"))
            .and_then(non_empty_string),
        steps,
    })
}

fn parse_plans(value: &Value) -> Option<Vec<Plan>> {
    let entries = value.as_array()?;
    let plans: Vec<Plan> = entries
        .iter()
        .enumerate()
        .filter_map(|(index, entry)| parse_plan(entry, || format!("plan-{}", index + 1)))
        .collect();
    if plans.len() != entries.len() {
        let non_objects = entries.iter().filter(|entry| !entry.is_object()).count();
        tracing::warn!(
            received = entries.len(),
            kept = plans.len(),
            non_objects,
            empty = entries.len() - plans.len() - non_objects,
            "Skipped plan entries that were not plan objects"
        );
    }
    Some(plans)
}

// ── Safety ───────────────────────────────────────────────────────────────────

fn parse_safety(value: &Value) -> Option<Safety> {
    let object = value.as_object()?;
    let status = if object.get("allowed").is_some_and(truthy) {
        SafetyStatus::Allowed
    } else {
        SafetyStatus::Blocked
    };

    let mut categories: Vec<String> = Vec::new();
    let listed = object
        .get("categories")
        .and_then(|v| v.as_array())
        .into_iter()
        .flatten()
        .filter_map(non_empty_string);
    let single = object.get("category").and_then(non_empty_string);
    for category in listed.chain(single) {
        if !categories.contains(&category) {
            categories.push(category);
        }
    }

    Some(Safety {
        status,
        categories,
        justification: object.get("justification").and_then(non_empty_string),
    })
}

// ── Entry points ─────────────────────────────────────────────────────────────

pub fn detect_shape(payload: &Value) -> PayloadShape {
    let Some(object) = payload.as_object() else {
        return PayloadShape::Unrecognized;
    };
    let flat = FLAT_MARKERS.iter().any(|key| object.contains_key(*key));
    let staged = STAGED_MARKERS.iter().any(|key| object.contains_key(*key));
    match (flat, staged) {
        (true, true) => PayloadShape::Mixed,
        (true, false) => PayloadShape::Flat,
        (false, true) => PayloadShape::Staged,
        (false, false) => PayloadShape::Unrecognized,
    }
}

/// Normalize any run payload into a [`RunView`]. Never fails.
pub fn normalize(payload: &Value) -> RunView {
    let shape = detect_shape(payload);
    let run_id = resolve(payload, RUN_ID, identifier).unwrap_or_default();

    match shape {
        PayloadShape::Unrecognized => tracing::warn!(
            run_id = %run_id,
            "Run payload matched no known schema generation; using defaults"
        ),
        PayloadShape::Mixed => tracing::debug!(
            run_id = %run_id,
            "Run payload carries both schema generations; flat fields take precedence"
        ),
        _ => {}
    }

    let safety = resolve(payload, SAFETY, parse_safety).unwrap_or_else(|| {
        tracing::debug!(run_id = %run_id, "No safety block in run payload; safety unknown");
        Safety::unknown()
    });

    RunView {
        run_id,
        shape,
        plans: resolve(payload, PLANS, parse_plans).unwrap_or_default(),
        winner_plan_id: resolve(payload, WINNER_PLAN_ID, identifier),
        verdict_plan: resolve(payload, VERDICT_PLAN, |v| {
            parse_plan(v, || "winner".to_string())
        }),
        rationale: resolve(payload, RATIONALE, non_empty_string),
        uncertainty_label: resolve(payload, UNCERTAINTY_LABEL, non_empty_string),
        safety,
        gate: Gate {
            action: resolve(payload, GATE_ACTION, non_empty_string),
            certainty: resolve(payload, GATE_CERTAINTY, unit_interval),
        },
        artefacts: resolve(payload, ARTEFACTS, object_map).unwrap_or_default(),
        artefacts_by_plan: resolve(payload, ARTEFACTS_BY_PLAN, object_map).unwrap_or_default(),
        provider: resolve(payload, PROVIDER, non_empty_string),
        mode: resolve(payload, MODE, non_empty_string),
        thread_id: resolve(payload, THREAD_ID, identifier),
        replay_hash: resolve(payload, REPLAY_HASH, non_empty_string),
    }
}

/// Normalize a payload fetched for `run_id`, keeping the requested id when
/// the payload does not carry one.
pub fn normalize_for(run_id: &str, payload: &Value) -> RunView {
    let mut view = normalize(payload);
    if view.run_id.is_empty() {
        view.run_id = run_id.to_string();
    }
    view
}
