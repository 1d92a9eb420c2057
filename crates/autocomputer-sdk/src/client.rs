use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::computer::{
    ComputerDetails, ComputerStatus, DeletedComputer, DownloadedFile, ListedComputer,
    RunningComputer, StartComputer, UploadedFile,
};
use crate::config::ClientConfig;
use crate::errors::SdkError;
use crate::local::{ComputerProvisioner, LocalNamespace};
use crate::retry::RetryPolicy;
use crate::run::{RunBuilder, RunTarget};
use crate::workflow::{UserInputs, Workflow, WorkflowSummary};

/// Default size limit for [`ComputersNamespace::download_file`].
pub const DEFAULT_DOWNLOAD_MAX_BYTES: u64 = 10 * 1024 * 1024;

pub(crate) struct ClientInner {
    pub(crate) config: Arc<ClientConfig>,
    http: reqwest::Client,
}

impl ClientInner {
    async fn send_json<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, SdkError> {
        let response = self.send(request).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| SdkError::Decode(e.to_string()))
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, SdkError> {
        let response = request.send().await.map_err(SdkError::from_reqwest)?;
        let status = response.status();
        debug!(
            event = "client.response",
            domain = "client",
            url = %response.url(),
            status = status.as_u16()
        );
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SdkError::Http {
                status: status.as_u16(),
                message: body,
            });
        }
        Ok(response)
    }
}

/// Entry point for the Flow API.
#[derive(Clone)]
pub struct AutoComputerClient {
    inner: Arc<ClientInner>,
}

impl AutoComputerClient {
    /// Starts a builder for a client talking to `base_url`.
    pub fn builder(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> AutoComputerClientBuilder {
        AutoComputerClientBuilder {
            config: ClientConfig::new(base_url, api_key),
        }
    }

    /// Builds a client from a prepared configuration.
    pub fn from_config(config: ClientConfig) -> Result<Self, SdkError> {
        AutoComputerClientBuilder { config }.build()
    }

    /// Builds a client from `AUTOCOMPUTER_API_KEY` / `AUTOCOMPUTER_BASE_URL`.
    pub fn from_env() -> Result<Self, SdkError> {
        Self::from_config(ClientConfig::from_env()?)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Workflow registry operations.
    pub fn workflows(&self) -> WorkflowsNamespace {
        WorkflowsNamespace {
            inner: self.inner.clone(),
        }
    }

    /// Remote computer operations.
    pub fn computers(&self) -> ComputersNamespace {
        ComputersNamespace {
            inner: self.inner.clone(),
        }
    }

    /// Remote workflow runs.
    pub fn runs(&self) -> RunNamespace {
        RunNamespace {
            inner: self.inner.clone(),
        }
    }

    /// Local computers and runs, provisioned through `provisioner`.
    pub fn local(&self, provisioner: Arc<dyn ComputerProvisioner>) -> LocalNamespace {
        LocalNamespace::new(self.inner.config.clone(), provisioner)
    }
}

/// Builder for [`AutoComputerClient`].
pub struct AutoComputerClientBuilder {
    config: ClientConfig,
}

impl AutoComputerClientBuilder {
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config = self.config.connect_timeout(timeout);
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config = self.config.request_timeout(timeout);
        self
    }

    /// Default retry policy for runs started from this client.
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.config = self.config.retry_policy(policy);
        self
    }

    /// Validates the configuration and builds the shared HTTP client.
    pub fn build(self) -> Result<AutoComputerClient, SdkError> {
        self.config.validate()?;
        let mut headers = HeaderMap::new();
        let api_key = HeaderValue::from_str(&self.config.api_key)
            .map_err(|e| SdkError::Config(format!("invalid api key header: {e}")))?;
        headers.insert("X-API-Key", api_key);
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .connect_timeout(self.config.connect_timeout)
            .timeout(self.config.request_timeout)
            .build()
            .map_err(|e| SdkError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(AutoComputerClient {
            inner: Arc::new(ClientInner {
                config: Arc::new(self.config),
                http,
            }),
        })
    }
}

#[derive(serde::Deserialize)]
struct WorkflowList {
    workflows: Vec<WorkflowSummary>,
}

#[derive(serde::Deserialize)]
struct ComputerList {
    computers: Vec<ListedComputer>,
}

#[derive(serde::Deserialize)]
struct StartedComputer {
    computer: RunningComputer,
}

#[derive(Serialize)]
struct UploadRequest<'a> {
    file_path: &'a str,
    contents: &'a str,
}

#[derive(Serialize)]
struct DownloadRequest<'a> {
    remote_path: &'a str,
    max_size_bytes: u64,
}

/// Workflow registry: `/workflows`.
pub struct WorkflowsNamespace {
    inner: Arc<ClientInner>,
}

impl WorkflowsNamespace {
    pub async fn list(&self) -> Result<Vec<WorkflowSummary>, SdkError> {
        let request = self.inner.http.get(self.inner.config.url("/workflows"));
        let list: WorkflowList = self.inner.send_json(request).await?;
        Ok(list.workflows)
    }

    pub async fn get(&self, workflow_id: &str) -> Result<Workflow, SdkError> {
        let request = self
            .inner
            .http
            .get(self.inner.config.url(&format!("/workflows/{workflow_id}")));
        self.inner.send_json(request).await
    }

    /// Stores a workflow, optionally on behalf of `user_id`.
    pub async fn save(
        &self,
        workflow: &Workflow,
        user_id: Option<&str>,
    ) -> Result<WorkflowSummary, SdkError> {
        let mut request = self
            .inner
            .http
            .post(self.inner.config.url("/workflows"))
            .json(workflow);
        if let Some(user_id) = user_id {
            request = request.query(&[("user_id", user_id)]);
        }
        self.inner.send_json(request).await
    }

    pub async fn delete(&self, workflow_id: &str, user_id: Option<&str>) -> Result<(), SdkError> {
        let mut request = self
            .inner
            .http
            .delete(self.inner.config.url(&format!("/workflows/{workflow_id}")));
        if let Some(user_id) = user_id {
            request = request.query(&[("user_id", user_id)]);
        }
        self.inner.send(request).await?;
        Ok(())
    }
}

/// Remote computers: `/computers`.
pub struct ComputersNamespace {
    inner: Arc<ClientInner>,
}

impl ComputersNamespace {
    pub async fn list(&self) -> Result<Vec<ListedComputer>, SdkError> {
        let request = self.inner.http.get(self.inner.config.url("/computers/"));
        let list: ComputerList = self.inner.send_json(request).await?;
        Ok(list.computers)
    }

    pub async fn get(&self, computer_id: &str) -> Result<ComputerDetails, SdkError> {
        let request = self
            .inner
            .http
            .get(self.inner.config.url(&format!("/computers/{computer_id}/")));
        self.inner.send_json(request).await
    }

    /// Starts a remote computer and returns its connection details.
    pub async fn start(&self, options: &StartComputer) -> Result<RunningComputer, SdkError> {
        let request = self
            .inner
            .http
            .post(self.inner.config.url("/computers/"))
            .json(options);
        let started: StartedComputer = self.inner.send_json(request).await?;
        Ok(started.computer)
    }

    pub async fn delete(&self, computer_id: &str) -> Result<DeletedComputer, SdkError> {
        let request = self
            .inner
            .http
            .delete(self.inner.config.url(&format!("/computers/{computer_id}")));
        self.inner.send_json(request).await
    }

    pub async fn status(&self, computer_id: &str) -> Result<ComputerStatus, SdkError> {
        let request = self
            .inner
            .http
            .get(self.inner.config.url(&format!("/computers/{computer_id}/status")));
        self.inner.send_json(request).await
    }

    /// Writes `contents` to `file_path` on the computer.
    pub async fn upload_data_to_file(
        &self,
        computer_id: &str,
        file_path: &str,
        contents: &str,
    ) -> Result<UploadedFile, SdkError> {
        let request = self
            .inner
            .http
            .post(self.inner.config.url(&format!("/computers/{computer_id}/upload")))
            .json(&UploadRequest {
                file_path,
                contents,
            });
        self.inner.send_json(request).await
    }

    /// Reads a file from the computer. `max_size_bytes` defaults to
    /// [`DEFAULT_DOWNLOAD_MAX_BYTES`].
    pub async fn download_file(
        &self,
        computer_id: &str,
        remote_path: &str,
        max_size_bytes: Option<u64>,
    ) -> Result<DownloadedFile, SdkError> {
        let request = self
            .inner
            .http
            .post(self.inner.config.url(&format!("/computers/{computer_id}/download")))
            .json(&DownloadRequest {
                remote_path,
                max_size_bytes: max_size_bytes.unwrap_or(DEFAULT_DOWNLOAD_MAX_BYTES),
            });
        self.inner.send_json(request).await
    }
}

/// Remote runs: `POST /runs`.
pub struct RunNamespace {
    inner: Arc<ClientInner>,
}

impl RunNamespace {
    /// Prepares a run of `workflow` on a remote computer.
    pub fn remote(
        &self,
        computer: RunningComputer,
        workflow: Workflow,
        user_inputs: UserInputs,
    ) -> RunBuilder {
        RunBuilder::new(
            self.inner.config.clone(),
            RunTarget::Remote(computer),
            workflow,
            user_inputs,
        )
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::computer::{ComputerConfig, OsName, ScreenConfig};
    use crate::workflow::sample_workflow;

    fn client(server: &MockServer) -> AutoComputerClient {
        AutoComputerClient::builder(server.uri(), "test-key")
            .request_timeout(Duration::from_secs(5))
            .build()
            .expect("client")
    }

    fn computer_json() -> serde_json::Value {
        json!({
            "computer_id": "c-9",
            "config": {"screen": {"width": 1280, "height": 800}, "os_name": "linux"},
            "tool_server_url": "https://c-9.tools.example.com",
            "vnc_url": "https://c-9.vnc.example.com"
        })
    }

    #[test]
    fn builder_rejects_empty_key() {
        let err = match AutoComputerClient::builder("http://localhost:8765", "").build() {
            Ok(_) => panic!("empty key"),
            Err(err) => err,
        };
        assert!(matches!(err, SdkError::Config(msg) if msg.contains("api key")));
    }

    #[tokio::test]
    async fn lists_workflows_with_api_key() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/workflows"))
            .and(header("X-API-Key", "test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "workflows": [
                    {"workflow_id": "w-1", "title": "Enter appointment", "description": "Books a slot"}
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let workflows = client(&server).workflows().list().await.expect("list");
        assert_eq!(
            workflows,
            vec![WorkflowSummary {
                workflow_id: "w-1".into(),
                title: "Enter appointment".into(),
                description: "Books a slot".into()
            }]
        );
    }

    #[tokio::test]
    async fn gets_and_saves_workflows() {
        let server = MockServer::start().await;
        let workflow = sample_workflow();
        Mock::given(method("GET"))
            .and(path("/workflows/w-1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::to_value(&workflow).expect("json")),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/workflows"))
            .and(query_param("user_id", "u-7"))
            .and(body_json(serde_json::to_value(&workflow).expect("json")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "workflow_id": "w-2", "title": "Enter appointment", "description": "copy"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client(&server);
        assert_eq!(client.workflows().get("w-1").await.expect("get"), workflow);
        let saved = client
            .workflows()
            .save(&workflow, Some("u-7"))
            .await
            .expect("save");
        assert_eq!(saved.workflow_id, "w-2");
    }

    #[tokio::test]
    async fn delete_surfaces_http_errors() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/workflows/missing"))
            .respond_with(ResponseTemplate::new(404).set_body_string("not found"))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/workflows/w-1"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let client = client(&server);
        client
            .workflows()
            .delete("w-1", None)
            .await
            .expect("deleted");
        let err = client
            .workflows()
            .delete("missing", None)
            .await
            .expect_err("404");
        assert_eq!(
            err,
            SdkError::Http {
                status: 404,
                message: "not found".into()
            }
        );
    }

    #[tokio::test]
    async fn starts_computer_with_options() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/computers/"))
            .and(body_json(json!({
                "config": {
                    "screen": {"width": 1280, "height": 800, "display_num": 0},
                    "os_name": "linux"
                },
                "template_id": "tpl-1",
                "vnc_requires_auth": true,
                "vnc_view_only": false
            })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"computer": computer_json()})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let computer = client(&server)
            .computers()
            .start(
                &StartComputer::new(ComputerConfig::new(
                    ScreenConfig::new(1280, 800),
                    OsName::Linux,
                ))
                .template_id("tpl-1")
                .vnc_requires_auth(true),
            )
            .await
            .expect("start");
        assert_eq!(computer.computer_id, "c-9");
        assert_eq!(computer.tool_server_url, "https://c-9.tools.example.com");
    }

    #[tokio::test]
    async fn computer_listing_status_and_delete() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/computers/"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"computers": [{"computer_id": "c-9"}]})),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/computers/c-9/status"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"computer_id": "c-9", "is_running": true})),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/computers/c-9/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "computer_id": "c-9", "template_id": "tpl-1", "started_at": "2026-10-19T08:00:00Z"
            })))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/computers/c-9"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"message": "deleted", "computer_id": "c-9"})),
            )
            .mount(&server)
            .await;

        let computers = client(&server).computers();
        assert_eq!(
            computers.list().await.expect("list"),
            vec![ListedComputer {
                computer_id: "c-9".into()
            }]
        );
        assert!(computers.status("c-9").await.expect("status").is_running);
        assert_eq!(
            computers.get("c-9").await.expect("get").template_id.as_deref(),
            Some("tpl-1")
        );
        assert_eq!(
            computers.delete("c-9").await.expect("delete").message,
            "deleted"
        );
    }

    #[tokio::test]
    async fn file_transfer_requests() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/computers/c-9/upload"))
            .and(body_json(json!({"file_path": "/tmp/a.txt", "contents": "hello"})))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"computer_id": "c-9", "file_path": "/tmp/a.txt"})),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/computers/c-9/download"))
            .and(body_json(json!({"remote_path": "/tmp/a.txt", "max_size_bytes": 10485760})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "computer_id": "c-9", "file_path": "/tmp/a.txt", "contents": "hello"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let computers = client(&server).computers();
        computers
            .upload_data_to_file("c-9", "/tmp/a.txt", "hello")
            .await
            .expect("upload");
        let file = computers
            .download_file("c-9", "/tmp/a.txt", None)
            .await
            .expect("download");
        assert_eq!(file.contents, "hello");
    }

    #[tokio::test]
    async fn undecodable_body_is_a_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/computers/c-9/status"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;
        let err = client(&server)
            .computers()
            .status("c-9")
            .await
            .expect_err("not json");
        assert!(matches!(err, SdkError::Decode(_)));
    }
}
