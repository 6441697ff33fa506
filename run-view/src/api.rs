//! HTTP client for the pipeline service.

use async_trait::async_trait;
use reqwest::{Method, Url};
use serde_json::Value;
use shared_types::{RunTriggerResponse, ThreadCounts};

use crate::config::ClientConfig;
use crate::controller::RunSource;
use crate::error::{describe_error_body, service_error_envelope, ClientError};
use crate::telemetry::in_ui_span;

#[derive(Debug, Clone)]
pub struct PipelineClient {
    http: reqwest::Client,
    config: ClientConfig,
}

impl PipelineClient {
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .build()?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Base URL plus percent-encoded path segments.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, ClientError> {
        join_segments(&self.config.api_base, segments)
    }

    async fn send_json(&self, method: Method, url: Url) -> Result<Value, ClientError> {
        tracing::debug!(%method, %url, "Pipeline request");
        let response = self.http.request(method, url).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Http {
                status: status.as_u16(),
                detail: describe_error_body(&body),
            });
        }

        let payload: Value = response.json().await?;
        match service_error_envelope(&payload) {
            Some(detail) => Err(ClientError::Service(detail)),
            None => Ok(payload),
        }
    }

    /// `GET /threads`. Failures are logged and read as "no threads".
    pub async fn list_threads(&self) -> ThreadCounts {
        let result: Result<ThreadCounts, ClientError> = async {
            let payload = self.send_json(Method::GET, self.endpoint(&["threads"])?).await?;
            serde_json::from_value::<ThreadCounts>(payload)
                .map_err(|e| ClientError::Decode(e.to_string()))
        }
        .await;

        match result {
            Ok(threads) => threads,
            Err(err) => {
                tracing::warn!(error = %err, "Failed to list threads; showing none");
                ThreadCounts::new()
            }
        }
    }

    /// `POST /run/{thread_id}`
    pub async fn trigger_run(&self, thread_id: &str) -> Result<RunTriggerResponse, ClientError> {
        in_ui_span("ui.fetch_run", async {
            let url = self.endpoint(&["run", thread_id])?;
            let payload = self.send_json(Method::POST, url).await?;
            let response: RunTriggerResponse = serde_json::from_value(payload)
                .map_err(|e| ClientError::Decode(e.to_string()))?;
            tracing::info!(thread_id, run_id = %response.run_id, "Pipeline run triggered");
            Ok(response)
        })
        .await
    }
}

#[async_trait]
impl RunSource for PipelineClient {
    async fn fetch_run(&self, run_id: &str) -> Result<Value, ClientError> {
        let url = self.endpoint(&["runs", run_id])?;
        self.send_json(Method::GET, url).await
    }

    async fn fetch_graphs(&self, run_id: &str) -> Result<Value, ClientError> {
        let url = self.endpoint(&["runs", run_id, "graphs.json"])?;
        self.send_json(Method::GET, url).await
    }
}

pub(crate) fn join_segments(base: &str, segments: &[&str]) -> Result<Url, ClientError> {
    let mut url = Url::parse(base)?;
    url.path_segments_mut()
        .map_err(|_| ClientError::InvalidUrl(format!("{base} cannot be a base URL")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}
