//! WebSocket thread feed.

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Url;
use serde_json::Value;
use shared_types::{ChatMessage, WireChatMessage};
use tokio_tungstenite::{connect_async, tungstenite::Message};

use crate::api::{join_segments, PipelineClient};
use crate::config::ClientConfig;
use crate::error::{service_error_envelope, ClientError};
use crate::thread::{FeedFrame, FeedStream, MessageFeed};

pub fn stream_url(config: &ClientConfig, thread_id: &str) -> Result<Url, ClientError> {
    join_segments(&config.stream_base, &["stream", thread_id])
}

/// Decode one text frame. `None` for frames that are neither a message nor an
/// error envelope.
pub fn decode_frame(text: &str) -> Option<FeedFrame> {
    let value: Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(err) => {
            tracing::warn!(error = %err, "Skipping non-JSON stream frame");
            return None;
        }
    };
    if let Some(detail) = service_error_envelope(&value) {
        return Some(FeedFrame::ServiceError(detail));
    }
    match serde_json::from_value::<WireChatMessage>(value) {
        Ok(wire) => Some(FeedFrame::Message(ChatMessage::from(wire))),
        Err(err) => {
            tracing::warn!(error = %err, "Skipping undecodable stream frame");
            None
        }
    }
}

#[async_trait]
impl MessageFeed for PipelineClient {
    async fn subscribe(&self, thread_id: &str) -> Result<FeedStream, ClientError> {
        let url = stream_url(self.config(), thread_id)?;
        tracing::debug!(%url, "Connecting to thread stream");
        let (socket, _) = connect_async(url.as_str()).await?;

        let frames = socket.filter_map(|message| async move {
            match message {
                Ok(Message::Text(text)) => decode_frame(&text).map(Ok),
                Ok(Message::Binary(bytes)) => match std::str::from_utf8(&bytes) {
                    Ok(text) => decode_frame(text).map(Ok),
                    Err(_) => {
                        tracing::warn!(len = bytes.len(), "Skipping non-UTF-8 stream frame");
                        None
                    }
                },
                Ok(_) => None,
                Err(err) => Some(Err(ClientError::from(err))),
            }
        });
        Ok(frames.boxed())
    }
}
