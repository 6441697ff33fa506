//! HTTP and WebSocket transport tests against a local pipeline service stub.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::Path;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::time::timeout;

use run_view::controller::{LoadState, RunSource, RunViewController};
use run_view::thread::{ConnectionState, MessageFeed, ThreadSnapshot, ThreadStream};
use run_view::{ClientConfig, ClientError, PipelineClient};

struct TestServer {
    addr: SocketAddr,
    handle: tokio::task::JoinHandle<()>,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

impl TestServer {
    fn client(&self) -> PipelineClient {
        PipelineClient::new(ClientConfig::with_api_base(format!("http://{}", self.addr)))
            .expect("Failed to build client")
    }
}

async fn list_threads() -> Json<Value> {
    Json(json!({"ci_flake": 3, "dependency_bump": 1}))
}

async fn trigger_run(Path(thread_id): Path<String>) -> Json<Value> {
    Json(json!({
        "run_id": format!("run-{thread_id}"),
        "verdict": {"winner": {"plan": {"id": "p1"}, "votes": 2}, "rationale": "smallest blast radius"}
    }))
}

async fn get_run(Path(run_id): Path<String>) -> Json<Value> {
    if run_id == "unknown" {
        // The service answers unknown runs with a 200 envelope.
        return Json(json!({"error": "not found"}));
    }
    Json(json!({
        "run_id": run_id,
        "thread_id": "ci_flake",
        "plans": [
            {"id": "p1", "title": "Quarantine flaky test", "confidence": 0.62, "blast_radius": "low",
             "steps": ["Tag test as flaky", "Open tracking ticket"]},
            {"id": "p2", "title": "Increase timeout", "confidence": 0.41}
        ],
        "verdict": {"winner_plan_id": "p1"},
        "gate": {"action": "approve", "certainty": 0.92},
        "artefacts": {"pr_diff": "--- a/ci.yml\n+++ b/ci.yml"}
    }))
}

async fn get_graphs(Path(run_id): Path<String>) -> Response {
    if run_id == "broken" {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"detail": "graph export failed"})),
        )
            .into_response();
    }
    Json(json!({
        "action_graph": {
            "nodes": [
                {"id": "s1", "label": "overhear", "trace_id": "t-9", "t0": 1_000_000_000i64, "t1": 2_500_000_000i64,
                 "attrs": {"token.approx_in": 12, "token.approx_out": 8}}
            ],
            "edges": []
        },
        "component_graph": {"nodes": [], "edges": []}
    }))
    .into_response()
}

fn stream_frames(thread_id: &str) -> Vec<String> {
    if thread_id == "missing" {
        return vec![json!({"error": "thread not found"}).to_string()];
    }
    let message = |id: &str, at: &str, content: &str| {
        json!({
            "id": id,
            "replyToId": null,
            "createdDateTime": at,
            "from": {"user": {"displayName": "Dana"}},
            "body": {"content": content}
        })
        .to_string()
    };
    vec![
        message("m2", "2024-05-01T12:05:00Z", "Still failing on main"),
        "not json".to_string(),
        message("m1", "2024-05-01T12:00:00Z", "test_checkout is flaky again"),
        message("m2", "2024-05-01T12:05:00Z", "Still failing on main"),
    ]
}

async fn stream(Path(thread_id): Path<String>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| replay_thread(socket, thread_id))
}

async fn replay_thread(mut socket: WebSocket, thread_id: String) {
    for frame in stream_frames(&thread_id) {
        if socket.send(WsMessage::Text(frame.into())).await.is_err() {
            return;
        }
    }
    if socket.send(WsMessage::Close(None)).await.is_err() {
        return;
    }
    // Hold the connection until the client completes the close handshake.
    while let Some(Ok(_)) = socket.recv().await {}
}

async fn start_test_server() -> TestServer {
    let app = Router::new()
        .route("/threads", get(list_threads))
        .route("/run/{thread_id}", post(trigger_run))
        .route("/runs/{run_id}", get(get_run))
        .route("/runs/{run_id}/graphs.json", get(get_graphs))
        .route("/stream/{thread_id}", get(stream));

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind listener");
    let addr = listener.local_addr().expect("Failed to get addr");

    let handle = tokio::spawn(async move {
        axum::serve(listener, app.into_make_service())
            .await
            .expect("Server failed");
    });

    TestServer { addr, handle }
}

async fn wait_until(
    updates: &mut watch::Receiver<ThreadSnapshot>,
    condition: impl FnMut(&ThreadSnapshot) -> bool,
) -> ThreadSnapshot {
    timeout(Duration::from_secs(5), updates.wait_for(condition))
        .await
        .expect("timed out waiting for thread snapshot")
        .expect("thread stream dropped")
        .clone()
}

#[tokio::test]
async fn test_list_threads() {
    let server = start_test_server().await;
    let threads = server.client().list_threads().await;

    assert_eq!(threads.len(), 2);
    assert_eq!(threads["ci_flake"], 3);
    assert_eq!(threads["dependency_bump"], 1);
}

#[tokio::test]
async fn test_list_threads_unreachable_is_empty() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = PipelineClient::new(ClientConfig::with_api_base(format!("http://{addr}"))).unwrap();
    assert!(client.list_threads().await.is_empty());
}

#[tokio::test]
async fn test_trigger_run() {
    let server = start_test_server().await;
    let response = server.client().trigger_run("ci_flake").await.unwrap();

    assert_eq!(response.run_id, "run-ci_flake");
    assert_eq!(response.verdict["winner"]["plan"]["id"], "p1");
}

#[tokio::test]
async fn test_fetch_run_error_envelope() {
    let server = start_test_server().await;
    let err = server.client().fetch_run("unknown").await.unwrap_err();
    assert_eq!(err, ClientError::Service("not found".to_string()));
}

#[tokio::test]
async fn test_fetch_graphs_http_error_detail() {
    let server = start_test_server().await;
    let err = server.client().fetch_graphs("broken").await.unwrap_err();
    assert_eq!(
        err,
        ClientError::Http {
            status: 500,
            detail: Some("graph export failed".to_string())
        }
    );
}

#[tokio::test]
async fn test_run_ids_are_path_encoded() {
    let server = start_test_server().await;
    let payload = server.client().fetch_run("nightly run/7").await.unwrap();
    assert_eq!(payload["run_id"], "nightly run/7");
}

#[tokio::test]
async fn test_controller_over_http() {
    let server = start_test_server().await;
    let controller = RunViewController::new(Arc::new(server.client()));

    controller.load("r1").await;
    let LoadState::Loaded(display) = controller.state() else {
        panic!("expected Loaded");
    };
    assert_eq!(display.winner_plan().map(|p| p.title.as_str()), Some("Quarantine flaky test"));
    assert_eq!(display.run_view.gate.action.as_deref(), Some("approve"));
    assert_eq!(display.run_view.gate.certainty, Some(0.92));
    assert!(display.has_diff());
    assert!(!display.has_jira());
    assert_eq!(display.metrics.token_cost, 20);
    assert_eq!(display.metrics.duration_ms, Some(1500.0));

    controller.load("broken").await;
    let LoadState::Failed(failed) = controller.state() else {
        panic!("expected Failed");
    };
    assert_eq!(failed.run_view.as_ref().map(|v| v.run_id.as_str()), Some("broken"));
    assert!(failed.graphs.is_none());
}

#[tokio::test]
async fn test_thread_stream_over_websocket() {
    let server = start_test_server().await;
    let mut stream = ThreadStream::new(Arc::new(server.client()));
    let mut updates = stream.watch();

    stream.select_thread("ci_flake");
    let snapshot = wait_until(&mut updates, |s| s.connection == ConnectionState::Closed).await;

    let ids: Vec<&str> = snapshot.messages.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec!["m1", "m2"]);
    assert_eq!(snapshot.messages[0].author, "Dana");
    assert_eq!(snapshot.messages[0].content, "test_checkout is flaky again");
}

#[tokio::test]
async fn test_thread_stream_error_frame() {
    let server = start_test_server().await;
    let mut stream = ThreadStream::new(Arc::new(server.client()));
    let mut updates = stream.watch();

    stream.select_thread("missing");
    let snapshot = wait_until(&mut updates, |s| matches!(s.connection, ConnectionState::Failed(_))).await;
    assert_eq!(
        snapshot.connection,
        ConnectionState::Failed("thread not found".to_string())
    );
    assert!(snapshot.messages.is_empty());
}

#[tokio::test]
async fn test_secure_stream_attempts_tls_handshake() {
    // Plain TCP peer that hangs up, so the TLS handshake fails on I/O.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let peer = tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            drop(socket);
        }
    });

    let client = PipelineClient::new(ClientConfig::with_api_base(format!("https://{addr}")))
        .expect("Failed to build client");
    assert!(client.config().stream_base.starts_with("wss://"));

    let result = timeout(Duration::from_secs(5), client.subscribe("ci_flake"))
        .await
        .expect("TLS handshake did not finish");
    let err = match result {
        Ok(_) => panic!("plain TCP peer cannot complete a TLS handshake"),
        Err(err) => err,
    };
    assert!(matches!(err, ClientError::WebSocket(_)), "{err}");
    assert!(
        !err.to_string().contains("TLS support not compiled in"),
        "{err}"
    );
    peer.abort();
}
