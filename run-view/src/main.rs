use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{bail, Context};
use run_view::config::{load_env_file, ClientConfig};
use run_view::controller::{LoadState, RunViewController};
use run_view::telemetry::init_tracing;
use run_view::thread::{ConnectionState, ThreadStream};
use run_view::PipelineClient;
use serde::Serialize;
use serde_json::json;

const USAGE: &str = "usage: run-view <threads | tail <thread> | trigger <thread> | show <run_id>>";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    match load_env_file() {
        Some(path) => tracing::info!(path = %path.display(), "Loaded environment from .env"),
        None => tracing::debug!("No .env file loaded; using process environment only"),
    }

    let config = ClientConfig::from_env();
    tracing::debug!(api_base = %config.api_base, stream_base = %config.stream_base, "Client configured");
    let client = Arc::new(PipelineClient::new(config).context("Failed to build HTTP client")?);

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.iter().map(String::as_str).collect::<Vec<_>>().as_slice() {
        ["threads"] => print_json(&client.list_threads().await),
        ["tail", thread_id] => tail(client, thread_id).await,
        ["trigger", thread_id] => {
            let triggered = client
                .trigger_run(thread_id)
                .await
                .with_context(|| format!("Failed to trigger a run for thread {thread_id}"))?;
            show(client, &triggered.run_id).await
        }
        ["show", run_id] => show(client, run_id).await,
        _ => bail!(USAGE),
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn show(client: Arc<PipelineClient>, run_id: &str) -> anyhow::Result<()> {
    let replay_command = client.config().replay_command.clone();
    let controller = RunViewController::new(client).with_replay_command(replay_command);
    controller.load(run_id).await;

    match controller.state() {
        LoadState::Loaded(display) => print_json(&json!({
            "run": display.run_view,
            "winner_plan": display.winner_plan(),
            "ribbon": display.ribbon(),
            "governance": display.governance(),
            "has_diff": display.has_diff(),
            "has_jira": display.has_jira(),
            "components": display.component_summary(),
            "layout": display.layout(),
            "metrics": display.metrics,
        })),
        LoadState::Failed(failed) => {
            print_json(failed.as_ref())?;
            bail!("Run {run_id} loaded only partially")
        }
        LoadState::Idle | LoadState::Loading { .. } => bail!("Run {run_id} did not load"),
    }
}

/// Print messages as they arrive until the feed closes or ctrl-c.
async fn tail(client: Arc<PipelineClient>, thread_id: &str) -> anyhow::Result<()> {
    let mut stream = ThreadStream::new(client);
    let mut updates = stream.watch();
    stream.select_thread(thread_id);

    let mut printed: HashSet<String> = HashSet::new();
    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
            }
            _ = tokio::signal::ctrl_c() => {
                stream.close();
                return Ok(());
            }
        }

        let snapshot = updates.borrow_and_update().clone();
        for message in &snapshot.messages {
            if printed.insert(message.id.clone()) {
                println!("{}", serde_json::to_string(message)?);
            }
        }
        match snapshot.connection {
            ConnectionState::Closed => return Ok(()),
            ConnectionState::Failed(reason) => bail!("Thread feed failed: {reason}"),
            ConnectionState::Idle | ConnectionState::Connecting | ConnectionState::Open => {}
        }
    }
}
