use serde::{Deserialize, Serialize};

use crate::errors::SdkError;

/// Screen geometry of a target computer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenConfig {
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default)]
    pub display_num: u32,
}

const fn default_width() -> u32 {
    1440
}

const fn default_height() -> u32 {
    900
}

impl Default for ScreenConfig {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            display_num: 0,
        }
    }
}

impl ScreenConfig {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            display_num: 0,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OsName {
    Darwin,
    Win32,
    #[default]
    Linux,
}

impl OsName {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Darwin => "darwin",
            Self::Win32 => "win32",
            Self::Linux => "linux",
        }
    }
}

/// Configuration of a computer: sent when starting a remote computer and as
/// the configuration snapshot of a local run.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputerConfig {
    pub screen: ScreenConfig,
    #[serde(default)]
    pub os_name: OsName,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_browser: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installed_apps: Option<Vec<String>>,
}

impl ComputerConfig {
    pub fn new(screen: ScreenConfig, os_name: OsName) -> Self {
        Self {
            screen,
            os_name,
            preferred_browser: None,
            installed_apps: None,
        }
    }
}

/// A provisioned computer that runs can target.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RunningComputerWire")]
pub struct RunningComputer {
    pub computer_id: String,
    pub config: ComputerConfig,
    pub tool_server_url: String,
    pub vnc_url: String,
    pub vnc_auth_key: Option<String>,
    pub vnc_view_only: bool,
}

#[derive(Deserialize)]
struct RunningComputerWire {
    computer_id: String,
    config: ComputerConfig,
    tool_server_url: String,
    vnc_url: String,
    #[serde(default)]
    vnc_auth_key: Option<String>,
    #[serde(default)]
    vnc_view_only: bool,
}

impl TryFrom<RunningComputerWire> for RunningComputer {
    type Error = SdkError;

    fn try_from(wire: RunningComputerWire) -> Result<Self, Self::Error> {
        if wire.tool_server_url.ends_with('/') {
            return Err(SdkError::Validation(
                "tool_server_url must not have trailing slash".into(),
            ));
        }
        Ok(Self {
            computer_id: wire.computer_id,
            config: wire.config,
            tool_server_url: wire.tool_server_url,
            vnc_url: wire.vnc_url,
            vnc_auth_key: wire.vnc_auth_key,
            vnc_view_only: wire.vnc_view_only,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListedComputer {
    pub computer_id: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ComputerDetails {
    pub computer_id: String,
    #[serde(default)]
    pub template_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
    #[serde(default)]
    pub started_at: Option<String>,
    #[serde(default)]
    pub end_at: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletedComputer {
    pub message: String,
    pub computer_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputerStatus {
    pub computer_id: String,
    pub is_running: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadedFile {
    pub computer_id: String,
    pub file_path: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadedFile {
    pub computer_id: String,
    pub file_path: String,
    pub contents: String,
}

/// Options for starting a remote computer.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct StartComputer {
    pub config: ComputerConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sandbox_id: Option<String>,
    pub vnc_requires_auth: bool,
    pub vnc_view_only: bool,
}

impl StartComputer {
    pub fn new(config: ComputerConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn template_id(mut self, template_id: impl Into<String>) -> Self {
        self.template_id = Some(template_id.into());
        self
    }

    pub fn sandbox_id(mut self, sandbox_id: impl Into<String>) -> Self {
        self.sandbox_id = Some(sandbox_id.into());
        self
    }

    pub fn vnc_requires_auth(mut self, value: bool) -> Self {
        self.vnc_requires_auth = value;
        self
    }

    pub fn vnc_view_only(mut self, value: bool) -> Self {
        self.vnc_view_only = value;
        self
    }
}

#[cfg(test)]
pub(crate) fn sample_computer(tool_server_url: &str) -> RunningComputer {
    RunningComputer {
        computer_id: "c-1".into(),
        config: ComputerConfig::default(),
        tool_server_url: tool_server_url.into(),
        vnc_url: "http://localhost:6080/vnc.html".into(),
        vnc_auth_key: None,
        vnc_view_only: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn running_computer_rejects_trailing_slash() {
        let err = serde_json::from_value::<RunningComputer>(serde_json::json!({
            "computer_id": "c-1",
            "config": {"screen": {"width": 800, "height": 600}},
            "tool_server_url": "http://vm:3333/",
            "vnc_url": "http://vm:6080"
        }))
        .expect_err("trailing slash");
        assert!(err.to_string().contains("trailing slash"));
    }

    #[test]
    fn config_defaults_to_linux_and_skips_empty_hints() {
        let config: ComputerConfig =
            serde_json::from_value(serde_json::json!({"screen": {}})).expect("config");
        assert_eq!(config.os_name, OsName::Linux);
        assert_eq!(config.screen, ScreenConfig::default());
        let value = serde_json::to_value(&config).expect("encode");
        assert!(value.get("preferred_browser").is_none());
        assert_eq!(value["os_name"], "linux");
    }
}
