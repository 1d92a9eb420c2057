//! Local tool endpoint: the service on (or tunnelled to) the local computer
//! that actually clicks, types and takes screenshots.

use std::time::Duration;

use tracing::{debug, info};

use crate::errors::{SdkError, ToolDispatchError};

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Executes named tools with a JSON payload.
#[async_trait::async_trait]
pub trait ToolEndpoint: Send + Sync {
    /// Confirms the endpoint can take requests before a run starts.
    async fn ready(&self) -> Result<(), SdkError> {
        Ok(())
    }

    /// Runs one tool call. No timeout applies; a tool may wait on a human.
    async fn execute(
        &self,
        tool_name: &str,
        payload: serde_json::Value,
    ) -> Result<serde_json::Value, ToolDispatchError>;
}

/// Tool endpoint reached over HTTP (`GET /tools`, `POST /tool/{name}`).
#[derive(Clone)]
pub struct HttpToolEndpoint {
    client: reqwest::Client,
    base_url: String,
}

impl HttpToolEndpoint {
    pub fn new(base_url: impl Into<String>) -> Result<Self, SdkError> {
        let base_url = base_url.into();
        let base_url = base_url.trim_end_matches('/').to_string();
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(SdkError::Config(format!(
                "tool endpoint url must be http(s): {base_url}"
            )));
        }
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| SdkError::Config(format!("failed to build tool endpoint client: {e}")))?;
        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Checks that the endpoint answers `GET /tools` with a success status.
    pub async fn probe(&self) -> Result<(), SdkError> {
        let response = self
            .client
            .get(format!("{}/tools", self.base_url))
            .timeout(PROBE_TIMEOUT)
            .send()
            .await
            .map_err(|e| {
                SdkError::ToolEndpoint(format!(
                    "failed to connect to tool server at {}: {e}",
                    self.base_url
                ))
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(SdkError::ToolEndpoint(format!(
                "tool server at {} not accessible: {status}",
                self.base_url
            )));
        }
        Ok(())
    }

    /// Polls [`probe`](Self::probe) until it succeeds or `timeout` elapses.
    pub async fn wait_until_ready(
        &self,
        timeout: Duration,
        interval: Duration,
    ) -> Result<(), SdkError> {
        info!(
            event = "tools.wait_ready",
            domain = "tools",
            url = %self.base_url,
            timeout_ms = timeout.as_millis() as u64
        );
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match self.probe().await {
                Ok(()) => return Ok(()),
                Err(err) if tokio::time::Instant::now() + interval >= deadline => {
                    return Err(SdkError::ToolEndpoint(format!(
                        "tool server not accessible after {}s: {err}",
                        timeout.as_secs()
                    )));
                }
                Err(err) => {
                    debug!(event = "tools.not_ready", domain = "tools", error = %err);
                    tokio::time::sleep(interval).await;
                }
            }
        }
    }
}

impl HttpToolEndpoint {
    /// `{base}/tool/{name}` with the name escaped as a single path segment.
    fn tool_url(&self, tool_name: &str) -> Result<reqwest::Url, ToolDispatchError> {
        let mut url = reqwest::Url::parse(&self.base_url)
            .map_err(|e| ToolDispatchError::Unreachable(format!("invalid tool endpoint url: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| {
                ToolDispatchError::Unreachable(format!(
                    "tool endpoint url cannot take a path: {}",
                    self.base_url
                ))
            })?
            .pop_if_empty()
            .push("tool")
            .push(tool_name);
        Ok(url)
    }
}

#[async_trait::async_trait]
impl ToolEndpoint for HttpToolEndpoint {
    async fn ready(&self) -> Result<(), SdkError> {
        self.probe().await
    }

    async fn execute(
        &self,
        tool_name: &str,
        payload: serde_json::Value,
    ) -> Result<serde_json::Value, ToolDispatchError> {
        let response = self
            .client
            .post(self.tool_url(tool_name)?)
            .json(&payload)
            .send()
            .await
            .map_err(|e| ToolDispatchError::Unreachable(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ToolDispatchError::Status {
                status: status.as_u16(),
                body,
            });
        }
        response
            .json()
            .await
            .map_err(|e| ToolDispatchError::InvalidBody(e.to_string()))
    }
}
