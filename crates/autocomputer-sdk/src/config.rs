use std::time::Duration;

use crate::errors::SdkError;
use crate::retry::RetryPolicy;

pub const BASE_URL_ENV: &str = "AUTOCOMPUTER_BASE_URL";
pub const API_KEY_ENV: &str = "AUTOCOMPUTER_API_KEY";

const DEFAULT_BASE_URL: &str = "http://localhost:8765";

/// Configuration shared by every request a client makes.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Flow API base URL, without a trailing slash.
    pub base_url: String,
    /// API key sent as `X-API-Key`.
    pub api_key: String,
    /// Upper bound for opening a connection. Run streams are never bounded
    /// once open.
    pub connect_timeout: Duration,
    /// Timeout for plain request/response calls (registry, computers).
    pub request_timeout: Duration,
    /// Default retry policy for run streams.
    pub retry_policy: RetryPolicy,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: trim_base_url(base_url.into()),
            api_key: api_key.into(),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(60),
            retry_policy: RetryPolicy::default(),
        }
    }

    /// Builds a config from `AUTOCOMPUTER_API_KEY` and, when set,
    /// `AUTOCOMPUTER_BASE_URL`.
    pub fn from_env() -> Result<Self, SdkError> {
        let api_key = std::env::var(API_KEY_ENV).unwrap_or_default();
        if api_key.trim().is_empty() {
            return Err(SdkError::Config(format!("missing {API_KEY_ENV}")));
        }
        let base_url = std::env::var(BASE_URL_ENV)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        Ok(Self::new(base_url, api_key))
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub(crate) fn validate(&self) -> Result<(), SdkError> {
        if self.api_key.trim().is_empty() {
            return Err(SdkError::Config("api key must not be empty".into()));
        }
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(SdkError::Config(format!(
                "base url must start with http:// or https://: {}",
                self.base_url
            )));
        }
        Ok(())
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    pub(crate) fn runs_url(&self) -> String {
        self.url("/runs")
    }

    /// WebSocket endpoint for local runs: `http` becomes `ws`, `https` `wss`.
    pub(crate) fn ws_workflow_url(&self) -> String {
        let ws_base = match self.base_url.strip_prefix("https://") {
            Some(rest) => format!("wss://{rest}"),
            None => match self.base_url.strip_prefix("http://") {
                Some(rest) => format!("ws://{rest}"),
                None => self.base_url.clone(),
            },
        };
        format!("{ws_base}/ws/workflow")
    }
}

fn trim_base_url(base_url: String) -> String {
    base_url.trim().trim_end_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trims_trailing_slashes_and_builds_urls() {
        let config = ClientConfig::new("https://flow.example.com//", "k");
        assert_eq!(config.base_url, "https://flow.example.com");
        assert_eq!(config.runs_url(), "https://flow.example.com/runs");
        assert_eq!(
            config.ws_workflow_url(),
            "wss://flow.example.com/ws/workflow"
        );
        assert_eq!(
            ClientConfig::new("http://localhost:8765", "k").ws_workflow_url(),
            "ws://localhost:8765/ws/workflow"
        );
    }

    #[test]
    fn validation_rejects_blank_key_and_odd_scheme() {
        assert!(ClientConfig::new("http://localhost", "  ").validate().is_err());
        assert!(ClientConfig::new("ftp://localhost", "k").validate().is_err());
        assert!(ClientConfig::new("http://localhost", "k").validate().is_ok());
    }

    #[test]
    fn setters_override_defaults() {
        let config = ClientConfig::new("http://localhost", "k")
            .connect_timeout(Duration::from_secs(1))
            .request_timeout(Duration::from_secs(2))
            .retry_policy(RetryPolicy::none());
        assert_eq!(config.connect_timeout, Duration::from_secs(1));
        assert_eq!(config.request_timeout, Duration::from_secs(2));
        assert_eq!(config.retry_policy.max_retries, 0);
    }
}
