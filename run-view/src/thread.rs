//! Live thread timeline.
//!
//! [`ThreadTimeline`] is the pure part: an append-only buffer in arrival order
//! plus a display projection (stable sort by `created_at`, ties in arrival
//! order) recomputed on every append. [`ThreadStream`] drives it from a
//! [`MessageFeed`] with one reader task per active thread.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use serde::Serialize;
use shared_types::ChatMessage;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::ClientError;

// ── Feed seam ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum FeedFrame {
    Message(ChatMessage),
    /// `{"error": ...}` frame; the service closes the stream after sending it
    ServiceError(String),
}

pub type FeedStream = BoxStream<'static, Result<FeedFrame, ClientError>>;

#[async_trait]
pub trait MessageFeed: Send + Sync + 'static {
    async fn subscribe(&self, thread_id: &str) -> Result<FeedStream, ClientError>;
}

// ── Timeline ─────────────────────────────────────────────────────────────────

/// Indices into `messages` in display order.
pub fn display_order(messages: &[ChatMessage]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..messages.len()).collect();
    // sort_by_key is stable: equal timestamps keep arrival order.
    order.sort_by_key(|&index| messages[index].created_at);
    order
}

#[derive(Debug, Clone, Default)]
pub struct ThreadTimeline {
    thread_id: Option<String>,
    messages: Vec<ChatMessage>,
    seen: HashSet<String>,
    display: Vec<usize>,
}

impl ThreadTimeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn thread_id(&self) -> Option<&str> {
        self.thread_id.as_deref()
    }

    /// Make `thread_id` active, dropping everything accumulated for the previous one.
    pub fn switch_thread(&mut self, thread_id: &str) {
        self.thread_id = Some(thread_id.to_string());
        self.messages.clear();
        self.seen.clear();
        self.display.clear();
    }

    pub fn clear(&mut self) {
        self.thread_id = None;
        self.messages.clear();
        self.seen.clear();
        self.display.clear();
    }

    /// Returns false when a message with the same id was already appended.
    pub fn append(&mut self, message: ChatMessage) -> bool {
        if !self.seen.insert(message.id.clone()) {
            return false;
        }
        self.messages.push(message);
        self.display = display_order(&self.messages);
        true
    }

    /// Arrival order
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn displayed(&self) -> Vec<&ChatMessage> {
        self.display.iter().map(|&index| &self.messages[index]).collect()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

// ── Stream aggregator ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    Closed,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThreadSnapshot {
    pub thread_id: Option<String>,
    /// Display order
    pub messages: Vec<ChatMessage>,
    pub connection: ConnectionState,
}

impl ThreadSnapshot {
    fn idle() -> Self {
        Self {
            thread_id: None,
            messages: Vec::new(),
            connection: ConnectionState::Idle,
        }
    }
}

struct StreamState {
    generation: u64,
    timeline: ThreadTimeline,
    connection: ConnectionState,
}

struct Shared {
    state: Mutex<StreamState>,
    updates: watch::Sender<ThreadSnapshot>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, StreamState> {
        // A panic mid-append leaves the buffer intact; keep serving it.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn publish(&self, state: &StreamState) {
        self.updates.send_replace(ThreadSnapshot {
            thread_id: state.timeline.thread_id().map(ToString::to_string),
            messages: state.timeline.displayed().into_iter().cloned().collect(),
            connection: state.connection.clone(),
        });
    }

    /// Applies `update` only if `generation` is still the active subscription.
    fn apply(&self, generation: u64, update: impl FnOnce(&mut StreamState)) -> bool {
        let mut state = self.lock();
        if state.generation != generation {
            return false;
        }
        update(&mut state);
        self.publish(&state);
        true
    }
}

struct Subscription {
    thread_id: String,
    task: JoinHandle<()>,
}

pub struct ThreadStream<F: MessageFeed> {
    feed: Arc<F>,
    shared: Arc<Shared>,
    active: Option<Subscription>,
}

impl<F: MessageFeed> ThreadStream<F> {
    pub fn new(feed: Arc<F>) -> Self {
        let (updates, _) = watch::channel(ThreadSnapshot::idle());
        Self {
            feed,
            shared: Arc::new(Shared {
                state: Mutex::new(StreamState {
                    generation: 0,
                    timeline: ThreadTimeline::new(),
                    connection: ConnectionState::Idle,
                }),
                updates,
            }),
            active: None,
        }
    }

    pub fn watch(&self) -> watch::Receiver<ThreadSnapshot> {
        self.shared.updates.subscribe()
    }

    pub fn snapshot(&self) -> ThreadSnapshot {
        self.shared.updates.borrow().clone()
    }

    pub fn active_thread(&self) -> Option<&str> {
        self.active.as_ref().map(|sub| sub.thread_id.as_str())
    }

    /// Switch the live feed to `thread_id`.
    ///
    /// Tears down the previous subscription, clears its messages and spawns a
    /// fresh reader. Selecting the already-active thread is a no-op while its
    /// feed is live; a closed or failed feed is resubscribed. Must be called
    /// within a tokio runtime.
    pub fn select_thread(&mut self, thread_id: &str) {
        if self.is_live(thread_id) {
            return;
        }
        self.teardown();

        let generation = {
            let mut state = self.shared.lock();
            state.generation += 1;
            state.timeline.switch_thread(thread_id);
            state.connection = ConnectionState::Connecting;
            self.shared.publish(&state);
            state.generation
        };

        tracing::info!(thread_id, generation, "Subscribing to thread feed");
        let task = tokio::spawn(pump(
            self.feed.clone(),
            self.shared.clone(),
            thread_id.to_string(),
            generation,
        ));
        self.active = Some(Subscription {
            thread_id: thread_id.to_string(),
            task,
        });
    }

    /// Drop the subscription and the accumulated messages.
    pub fn close(&mut self) {
        self.teardown();
        let mut state = self.shared.lock();
        state.generation += 1;
        state.timeline.clear();
        state.connection = ConnectionState::Idle;
        self.shared.publish(&state);
    }

    fn is_live(&self, thread_id: &str) -> bool {
        let Some(sub) = self.active.as_ref() else {
            return false;
        };
        if sub.thread_id != thread_id || sub.task.is_finished() {
            return false;
        }
        !matches!(
            self.shared.lock().connection,
            ConnectionState::Closed | ConnectionState::Failed(_)
        )
    }

    fn teardown(&mut self) {
        if let Some(previous) = self.active.take() {
            tracing::debug!(thread_id = %previous.thread_id, "Tearing down thread feed");
            previous.task.abort();
        }
    }
}

impl<F: MessageFeed> Drop for ThreadStream<F> {
    fn drop(&mut self) {
        self.teardown();
    }
}

async fn pump<F: MessageFeed>(feed: Arc<F>, shared: Arc<Shared>, thread_id: String, generation: u64) {
    let mut stream = match feed.subscribe(&thread_id).await {
        Ok(stream) => stream,
        Err(err) => {
            tracing::warn!(thread_id = %thread_id, error = %err, "Thread feed subscription failed");
            shared.apply(generation, |state| {
                state.connection = ConnectionState::Failed(err.to_string());
            });
            return;
        }
    };

    if !shared.apply(generation, |state| state.connection = ConnectionState::Open) {
        return;
    }

    while let Some(frame) = stream.next().await {
        let applied = match frame {
            Ok(FeedFrame::Message(message)) => {
                let message_id = message.id.clone();
                shared.apply(generation, |state| {
                    if !state.timeline.append(message) {
                        tracing::debug!(thread_id = %thread_id, message_id = %message_id, "Ignoring duplicate message");
                    }
                })
            }
            Ok(FeedFrame::ServiceError(detail)) => {
                tracing::warn!(thread_id = %thread_id, detail = %detail, "Thread feed reported an error");
                shared.apply(generation, |state| {
                    state.connection = ConnectionState::Failed(detail);
                });
                return;
            }
            Err(err) => {
                tracing::warn!(thread_id = %thread_id, error = %err, "Thread feed dropped");
                shared.apply(generation, |state| {
                    state.connection = ConnectionState::Failed(err.to_string());
                });
                return;
            }
        };
        if !applied {
            // Superseded by a newer subscription.
            return;
        }
    }

    tracing::info!(thread_id = %thread_id, "Thread feed closed");
    shared.apply(generation, |state| state.connection = ConnectionState::Closed);
}
