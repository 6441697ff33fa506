//! Run view controller.
//!
//! `Idle -> Loading -> {Loaded, Failed}`. A load fetches the run payload and
//! the graph document concurrently and waits for both. The newest request
//! always wins: a load that completes after a newer one started publishes
//! nothing.

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use shared_types::{DerivedMetrics, RunView};
use tokio::sync::watch;
use tracing::Instrument;

use crate::config::DEFAULT_REPLAY_COMMAND;
use crate::error::ClientError;
use crate::normalize::normalize_for;
use crate::trace::{build_graphs, compute_metrics, BuiltGraphs};
use crate::view::{has_diff, has_jira, RunDisplay};

#[async_trait]
pub trait RunSource: Send + Sync + 'static {
    /// `GET /runs/{run_id}`
    async fn fetch_run(&self, run_id: &str) -> Result<Value, ClientError>;
    /// `GET /runs/{run_id}/graphs.json`
    async fn fetch_graphs(&self, run_id: &str) -> Result<Value, ClientError>;
}

// ── State ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Artefact {
    RunPayload,
    GraphDocument,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadFailure {
    pub artefact: Artefact,
    pub error: String,
}

/// Whatever did arrive for a load that failed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedLoad {
    pub run_id: String,
    pub run_view: Option<RunView>,
    pub graphs: Option<BuiltGraphs>,
    pub metrics: Option<DerivedMetrics>,
    pub failures: Vec<LoadFailure>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum LoadState {
    #[default]
    Idle,
    Loading {
        run_id: String,
    },
    Loaded(Arc<RunDisplay>),
    Failed(Arc<FailedLoad>),
}

impl LoadState {
    pub fn run_view(&self) -> Option<&RunView> {
        match self {
            LoadState::Loaded(display) => Some(&display.run_view),
            LoadState::Failed(failed) => failed.run_view.as_ref(),
            LoadState::Idle | LoadState::Loading { .. } => None,
        }
    }

    /// Failed loads can be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LoadState::Failed(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    Applied,
    /// A newer load started before this one completed
    Superseded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Modal {
    Governance,
    Diff,
    Jira,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ModalState {
    pub governance: bool,
    pub diff: bool,
    pub jira: bool,
}

impl ModalState {
    fn slot(&mut self, modal: Modal) -> &mut bool {
        match modal {
            Modal::Governance => &mut self.governance,
            Modal::Diff => &mut self.diff,
            Modal::Jira => &mut self.jira,
        }
    }

    pub fn is_open(&self, modal: Modal) -> bool {
        match modal {
            Modal::Governance => self.governance,
            Modal::Diff => self.diff,
            Modal::Jira => self.jira,
        }
    }
}

// ── Controller ───────────────────────────────────────────────────────────────

struct Requests {
    latest: u64,
    run_id: Option<String>,
}

pub struct RunViewController<S: RunSource> {
    source: Arc<S>,
    requests: Mutex<Requests>,
    modals: Mutex<ModalState>,
    state: watch::Sender<LoadState>,
    replay_command: String,
}

impl<S: RunSource> RunViewController<S> {
    pub fn new(source: Arc<S>) -> Self {
        let (state, _) = watch::channel(LoadState::Idle);
        Self {
            source,
            requests: Mutex::new(Requests {
                latest: 0,
                run_id: None,
            }),
            modals: Mutex::new(ModalState::default()),
            state,
            replay_command: DEFAULT_REPLAY_COMMAND.to_string(),
        }
    }

    /// Template for the governance reproduce line; `{thread_id}` is substituted.
    pub fn with_replay_command(mut self, template: impl Into<String>) -> Self {
        self.replay_command = template.into();
        self
    }

    pub fn watch(&self) -> watch::Receiver<LoadState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> LoadState {
        self.state.borrow().clone()
    }

    pub fn requested_run(&self) -> Option<String> {
        self.requests().run_id.clone()
    }

    fn requests(&self) -> MutexGuard<'_, Requests> {
        self.requests.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn modal_guard(&self) -> MutexGuard<'_, ModalState> {
        self.modals.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Load `run_id`, replacing whatever is displayed.
    pub async fn load(&self, run_id: &str) -> LoadOutcome {
        let token = {
            let mut requests = self.requests();
            requests.latest += 1;
            requests.run_id = Some(run_id.to_string());
            *self.modal_guard() = ModalState::default();
            self.state.send_replace(LoadState::Loading {
                run_id: run_id.to_string(),
            });
            requests.latest
        };

        let span = tracing::info_span!("ui.action", action = "ui.load_run", run_id, token);
        async {
            let (run, graphs) = tokio::join!(
                self.source.fetch_run(run_id),
                self.source.fetch_graphs(run_id)
            );
            let next = settle(run_id, run, graphs, &self.replay_command);

            let requests = self.requests();
            if requests.latest != token {
                tracing::debug!(latest = requests.latest, "Discarding superseded run load");
                return LoadOutcome::Superseded;
            }
            match &next {
                LoadState::Loaded(_) => tracing::info!("Run loaded"),
                LoadState::Failed(failed) => tracing::warn!(
                    failures = failed.failures.len(),
                    partial_run = failed.run_view.is_some(),
                    partial_graphs = failed.graphs.is_some(),
                    "Run load failed"
                ),
                LoadState::Idle | LoadState::Loading { .. } => {}
            }
            self.state.send_replace(next);
            LoadOutcome::Applied
        }
        .instrument(span)
        .await
    }

    /// Reload the most recently requested run. `None` if nothing was requested.
    pub async fn retry(&self) -> Option<LoadOutcome> {
        let run_id = self.requested_run()?;
        Some(self.load(&run_id).await)
    }

    /// Back to `Idle`; any in-flight load becomes stale.
    pub fn reset(&self) {
        let mut requests = self.requests();
        requests.latest += 1;
        requests.run_id = None;
        *self.modal_guard() = ModalState::default();
        self.state.send_replace(LoadState::Idle);
    }

    pub fn modals(&self) -> ModalState {
        *self.modal_guard()
    }

    /// Returns false when the modal has nothing to show.
    pub fn open_modal(&self, modal: Modal) -> bool {
        let available = {
            let state = self.state.borrow();
            match modal {
                Modal::Governance => true,
                Modal::Diff => state.run_view().is_some_and(has_diff),
                Modal::Jira => state.run_view().is_some_and(has_jira),
            }
        };
        if available {
            *self.modal_guard().slot(modal) = true;
        }
        available
    }

    pub fn close_modal(&self, modal: Modal) {
        *self.modal_guard().slot(modal) = false;
    }
}

fn settle(
    run_id: &str,
    run: Result<Value, ClientError>,
    graphs: Result<Value, ClientError>,
    replay_command: &str,
) -> LoadState {
    let mut failures = Vec::new();

    let run_view = match run {
        Ok(payload) => Some(normalize_for(run_id, &payload)),
        Err(err) => {
            failures.push(LoadFailure {
                artefact: Artefact::RunPayload,
                error: err.to_string(),
            });
            None
        }
    };
    let graphs = match graphs {
        Ok(document) => Some(build_graphs(&document)),
        Err(err) => {
            failures.push(LoadFailure {
                artefact: Artefact::GraphDocument,
                error: err.to_string(),
            });
            None
        }
    };

    match (run_view, graphs) {
        (Some(run_view), Some(graphs)) => {
            LoadState::Loaded(Arc::new(RunDisplay::compose(run_view, graphs, replay_command)))
        }
        (run_view, graphs) => LoadState::Failed(Arc::new(FailedLoad {
            run_id: run_id.to_string(),
            metrics: graphs.as_ref().map(|g| compute_metrics(&g.action_graph.nodes)),
            run_view,
            graphs,
            failures,
        })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn not_found() -> ClientError {
        ClientError::Http {
            status: 404,
            detail: Some("not found".to_string()),
        }
    }

    #[test]
    fn test_settle_loaded_when_both_succeed() {
        let state = settle(
            "r1",
            Ok(json!({"plans": [{"id": "p1"}]})),
            Ok(json!({"action_graph": {"nodes": [{"id": "a"}]}})),
            DEFAULT_REPLAY_COMMAND,
        );
        let LoadState::Loaded(display) = state else {
            panic!("expected Loaded");
        };
        assert_eq!(display.run_view.run_id, "r1");
        assert_eq!(display.action_graph.nodes.len(), 1);
    }

    #[test]
    fn test_settle_keeps_partial_graphs() {
        let state = settle(
            "r1",
            Err(not_found()),
            Ok(json!({"action_graph": {"nodes": [{"id": "a", "trace_id": "t"}]}})),
            DEFAULT_REPLAY_COMMAND,
        );
        let LoadState::Failed(failed) = state else {
            panic!("expected Failed");
        };
        assert!(failed.run_view.is_none());
        assert_eq!(failed.graphs.as_ref().map(|g| g.action_graph.nodes.len()), Some(1));
        assert_eq!(failed.metrics.as_ref().map(|m| m.trace_ids.clone()), Some(vec!["t".to_string()]));
        assert_eq!(failed.failures.len(), 1);
        assert_eq!(failed.failures[0].artefact, Artefact::RunPayload);
        assert_eq!(failed.failures[0].error, "HTTP error: 404 (not found)");
    }

    #[test]
    fn test_settle_keeps_partial_run() {
        let state = settle(
            "r1",
            Ok(json!({"plans": [{"id": "p1"}]})),
            Err(ClientError::Request("connection refused".to_string())),
            DEFAULT_REPLAY_COMMAND,
        );
        assert!(state.is_retryable());
        assert_eq!(state.run_view().map(|v| v.plans.len()), Some(1));
    }

    #[test]
    fn test_modal_slots() {
        let mut modals = ModalState::default();
        *modals.slot(Modal::Jira) = true;
        assert!(modals.is_open(Modal::Jira));
        assert!(!modals.is_open(Modal::Diff));
        assert!(!modals.is_open(Modal::Governance));
    }
}
