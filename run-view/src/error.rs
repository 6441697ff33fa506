//! Transport error taxonomy.
//!
//! Only transport can fail. Normalization, metrics and graph building are
//! total over `serde_json::Value` and degrade to defaults instead.

#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum ClientError {
    #[error("Invalid endpoint URL: {0}")]
    InvalidUrl(String),

    #[error("Request failed: {0}")]
    Request(String),

    #[error("HTTP error: {status}{}", format_detail(.detail))]
    Http { status: u16, detail: Option<String> },

    #[error("Failed to parse JSON: {0}")]
    Decode(String),

    /// The service answered successfully but with an `{"error": ...}` envelope
    #[error("Service error: {0}")]
    Service(String),

    #[error("WebSocket error: {0}")]
    WebSocket(String),
}

fn format_detail(detail: &Option<String>) -> String {
    detail
        .as_deref()
        .map(|d| format!(" ({d})"))
        .unwrap_or_default()
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ClientError::Decode(err.to_string())
        } else {
            ClientError::Request(err.to_string())
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ClientError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        ClientError::WebSocket(err.to_string())
    }
}

impl From<url::ParseError> for ClientError {
    fn from(err: url::ParseError) -> Self {
        ClientError::InvalidUrl(err.to_string())
    }
}

/// Pull a human-readable message out of an error body, if it has one.
pub fn describe_error_body(body: &str) -> Option<String> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(json) = serde_json::from_str::<serde_json::Value>(trimmed) {
        for key in ["error", "detail", "message"] {
            if let Some(text) = json.get(key).and_then(|v| v.as_str()) {
                return Some(text.to_string());
            }
        }
    }
    Some(trimmed.to_string())
}

/// Recognize the service's `{"error": "..."}` success-status envelope.
pub fn service_error_envelope(payload: &serde_json::Value) -> Option<String> {
    let object = payload.as_object()?;
    if object.len() != 1 {
        return None;
    }
    object
        .get("error")
        .map(|value| match value {
            serde_json::Value::String(text) => text.clone(),
            other => other.to_string(),
        })
}
