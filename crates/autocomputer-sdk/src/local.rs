//! Local execution: computers provisioned on this machine, driven over a
//! WebSocket run whose tool calls are answered by a local tool endpoint.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::computer::{ComputerConfig, OsName, ScreenConfig};
use crate::config::ClientConfig;
use crate::errors::SdkError;
use crate::run::{RunBuilder, RunTarget};
use crate::tools::{HttpToolEndpoint, ToolEndpoint};
use crate::workflow::{UserInputs, Workflow};

const DEFAULT_TOOL_SERVER_PORT: u16 = 3333;
const DEFAULT_TOOL_SERVER_URL: &str = "http://localhost:3333";

/// Request handed to a [`ComputerProvisioner`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VmRequest {
    pub name: String,
    pub config: ComputerConfig,
    pub headless: bool,
    pub tool_server_port: u16,
}

/// What a provisioner reports for a started VM.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProvisionedVm {
    pub computer_id: String,
    pub tool_server_url: String,
}

/// Starts and stops local virtual machines.
///
/// This crate ships no implementation; hypervisor integration is supplied by
/// the caller.
#[async_trait::async_trait]
pub trait ComputerProvisioner: Send + Sync {
    async fn start_vm(&self, request: &VmRequest) -> Result<ProvisionedVm, SdkError>;

    async fn stop_vm(&self, name: &str) -> Result<(), SdkError>;

    async fn is_running(&self, name: &str) -> Result<bool, SdkError>;

    /// Guest address, when the hypervisor knows it.
    async fn vm_ip(&self, _name: &str) -> Result<Option<String>, SdkError> {
        Ok(None)
    }
}

/// A VM started through [`LocalNamespace::start_vm`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmInstance {
    pub name: String,
    pub computer_id: String,
    pub ip_address: Option<String>,
    pub tool_server_url: String,
    pub config: ComputerConfig,
    pub started_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VmState {
    Running,
    Stopped,
    Unknown,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmStatus {
    pub name: String,
    pub state: VmState,
    pub ip_address: Option<String>,
    pub tool_server_accessible: bool,
}

/// Options for [`LocalNamespace::start_vm`].
#[derive(Clone, Debug)]
pub struct StartVm {
    name: String,
    screen: ScreenConfig,
    os_name: OsName,
    headless: bool,
    tool_server_port: u16,
    wait_for_tool_server: bool,
    timeout: Duration,
    poll_interval: Duration,
}

impl StartVm {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            screen: ScreenConfig::new(1920, 1080),
            os_name: OsName::Linux,
            headless: true,
            tool_server_port: DEFAULT_TOOL_SERVER_PORT,
            wait_for_tool_server: true,
            timeout: Duration::from_secs(120),
            poll_interval: Duration::from_secs(2),
        }
    }

    pub fn screen(mut self, width: u32, height: u32) -> Self {
        self.screen = ScreenConfig::new(width, height);
        self
    }

    pub fn os_name(mut self, os_name: OsName) -> Self {
        self.os_name = os_name;
        self
    }

    pub fn headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    pub fn tool_server_port(mut self, port: u16) -> Self {
        self.tool_server_port = port;
        self
    }

    /// Skips polling the tool endpoint after the VM boots.
    pub fn wait_for_tool_server(mut self, wait: bool) -> Self {
        self.wait_for_tool_server = wait;
        self
    }

    /// Upper bound for the tool endpoint to come up.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

/// Where a local run sends its tool calls, and the configuration snapshot
/// sent to the executor.
#[derive(Clone)]
pub struct LocalTarget {
    pub tool_server_url: String,
    pub config: ComputerConfig,
    endpoint: Option<Arc<dyn ToolEndpoint>>,
}

impl LocalTarget {
    pub fn new(tool_server_url: impl Into<String>) -> Self {
        Self {
            tool_server_url: tool_server_url.into(),
            config: ComputerConfig::new(ScreenConfig::new(1920, 1080), OsName::Linux),
            endpoint: None,
        }
    }

    pub fn config(mut self, config: ComputerConfig) -> Self {
        self.config = config;
        self
    }

    /// Uses a custom tool endpoint instead of HTTP calls to `tool_server_url`.
    pub fn endpoint(mut self, endpoint: Arc<dyn ToolEndpoint>) -> Self {
        self.endpoint = Some(endpoint);
        self
    }
}

impl Default for LocalTarget {
    fn default() -> Self {
        Self::new(DEFAULT_TOOL_SERVER_URL)
    }
}

impl From<&VmInstance> for LocalTarget {
    fn from(vm: &VmInstance) -> Self {
        Self::new(vm.tool_server_url.clone()).config(vm.config.clone())
    }
}

/// Local VMs and runs. The VMs it started are tracked per namespace.
pub struct LocalNamespace {
    config: Arc<ClientConfig>,
    provisioner: Arc<dyn ComputerProvisioner>,
    running: Mutex<HashMap<String, VmInstance>>,
}

impl LocalNamespace {
    pub(crate) fn new(config: Arc<ClientConfig>, provisioner: Arc<dyn ComputerProvisioner>) -> Self {
        Self {
            config,
            provisioner,
            running: Mutex::new(HashMap::new()),
        }
    }

    /// Starts a VM and, unless disabled, waits for its tool endpoint.
    pub async fn start_vm(&self, options: StartVm) -> Result<VmInstance, SdkError> {
        if options.name.trim().is_empty() {
            return Err(SdkError::Validation("vm name is required".into()));
        }
        let config = ComputerConfig::new(options.screen, options.os_name);
        let request = VmRequest {
            name: options.name.clone(),
            config: config.clone(),
            headless: options.headless,
            tool_server_port: options.tool_server_port,
        };
        info!(event = "local.vm_start", domain = "local", vm = %options.name);
        let provisioned = self.provisioner.start_vm(&request).await.map_err(|e| {
            SdkError::Provisioner(format!("failed to start VM {}: {e}", options.name))
        })?;

        if options.wait_for_tool_server {
            HttpToolEndpoint::new(provisioned.tool_server_url.clone())?
                .wait_until_ready(options.timeout, options.poll_interval)
                .await?;
        }

        let ip_address = match self.provisioner.vm_ip(&options.name).await {
            Ok(ip) => ip,
            Err(err) => {
                warn!(event = "local.vm_ip_failed", domain = "local", vm = %options.name, error = %err);
                None
            }
        };
        let instance = VmInstance {
            name: options.name.clone(),
            computer_id: provisioned.computer_id,
            ip_address,
            tool_server_url: provisioned.tool_server_url.trim_end_matches('/').to_string(),
            config,
            started_at: Utc::now(),
        };
        self.running
            .lock()
            .await
            .insert(options.name.clone(), instance.clone());
        info!(event = "local.vm_started", domain = "local", vm = %options.name);
        Ok(instance)
    }

    pub async fn stop_vm(&self, name: &str) -> Result<(), SdkError> {
        info!(event = "local.vm_stop", domain = "local", vm = %name);
        self.provisioner
            .stop_vm(name)
            .await
            .map_err(|e| SdkError::Provisioner(format!("failed to stop VM {name}: {e}")))?;
        self.running.lock().await.remove(name);
        Ok(())
    }

    /// Reports whether the VM runs and whether its tool endpoint answers.
    ///
    /// Provisioner failures are reported as [`VmState::Unknown`].
    pub async fn vm_status(&self, name: &str) -> VmStatus {
        let is_running = match self.provisioner.is_running(name).await {
            Ok(is_running) => is_running,
            Err(err) => {
                warn!(event = "local.vm_status_failed", domain = "local", vm = %name, error = %err);
                return VmStatus {
                    name: name.to_string(),
                    state: VmState::Unknown,
                    ip_address: None,
                    tool_server_accessible: false,
                };
            }
        };
        if !is_running {
            return VmStatus {
                name: name.to_string(),
                state: VmState::Stopped,
                ip_address: None,
                tool_server_accessible: false,
            };
        }

        let ip_address = self.provisioner.vm_ip(name).await.unwrap_or(None);
        let tool_server_url = self
            .running
            .lock()
            .await
            .get(name)
            .map(|vm| vm.tool_server_url.clone());
        let tool_server_accessible = match tool_server_url {
            Some(url) => match HttpToolEndpoint::new(url) {
                Ok(endpoint) => endpoint.probe().await.is_ok(),
                Err(_) => false,
            },
            None => false,
        };
        VmStatus {
            name: name.to_string(),
            state: VmState::Running,
            ip_address,
            tool_server_accessible,
        }
    }

    /// Names of the VMs this namespace started and has not stopped.
    pub async fn list_vms(&self) -> Vec<String> {
        let mut names: Vec<String> = self.running.lock().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Prepares a local run of `workflow` against `target`.
    pub fn run(
        &self,
        target: LocalTarget,
        workflow: Workflow,
        user_inputs: UserInputs,
    ) -> Result<RunBuilder, SdkError> {
        let endpoint: Arc<dyn ToolEndpoint> = match target.endpoint {
            Some(endpoint) => endpoint,
            None => Arc::new(HttpToolEndpoint::new(target.tool_server_url)?),
        };
        Ok(RunBuilder::new(
            self.config.clone(),
            RunTarget::Local {
                config: target.config,
                endpoint,
            },
            workflow,
            user_inputs,
        ))
    }
}
