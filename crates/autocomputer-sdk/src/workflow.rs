//! Workflow definitions as stored in the registry.
//!
//! The run protocol forwards a [`Workflow`] verbatim; nothing in this crate
//! interprets sequences or steps.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::computer::{OsName, ScreenConfig};
use crate::errors::SdkError;

/// Validated user inputs keyed by input name.
pub type UserInputs = HashMap<String, serde_json::Value>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchemaVersion {
    #[serde(rename = "v1")]
    V1,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputType {
    String,
    Number,
    Boolean,
    Date,
    List,
    File,
    Directory,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FileFilter {
    pub name: String,
    pub extensions: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkflowInput {
    pub input_title: String,
    pub input_description: String,
    pub input_type: InputType,
    pub input_name: String,
    #[serde(default)]
    pub default_value: Option<serde_json::Value>,
    #[serde(default)]
    pub file_filters: Option<Vec<FileFilter>>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub title: String,
    pub actions: Vec<String>,
}

/// A named sub-phase of a workflow, reported through sequence events.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSequence {
    pub sequence_title: String,
    pub sequence_id: String,
    pub sequence_description: String,
    pub sequence_inputs: Vec<String>,
    pub steps: Vec<WorkflowStep>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkflowExecution {
    pub instructions: Vec<String>,
    pub code: Vec<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComputerType {
    #[serde(rename = "localDesktop")]
    LocalDesktop,
    #[serde(rename = "remoteDesktop")]
    RemoteDesktop,
    #[serde(rename = "localVM")]
    LocalVm,
}

/// The computer a workflow was authored against.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkflowComputer {
    pub os: OsName,
    #[serde(rename = "computerName")]
    pub computer_name: String,
    #[serde(rename = "computerType")]
    pub computer_type: ComputerType,
    #[serde(rename = "ovaFilePath", default)]
    pub ova_file_path: Option<String>,
    #[serde(rename = "screenConfig")]
    pub screen_config: ScreenConfig,
}

/// A complete workflow definition.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub schema_version: SchemaVersion,
    pub workflow_computer: WorkflowComputer,
    pub workflow_title: String,
    pub workflow_description: String,
    pub workflow_inputs: Vec<WorkflowInput>,
    pub sequences: Vec<WorkflowSequence>,
    pub workflow_execution_instructions: WorkflowExecution,
    #[serde(default)]
    pub workflow_path: Option<String>,
    #[serde(default)]
    pub workflow_id: Option<String>,
}

impl Workflow {
    /// Parses a workflow from its JSON representation.
    pub fn from_json_str(json: &str) -> Result<Self, SdkError> {
        serde_json::from_str(json).map_err(|e| SdkError::Decode(format!("invalid workflow: {e}")))
    }

    /// Reads and parses a workflow JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, SdkError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            SdkError::Validation(format!("cannot read workflow {}: {e}", path.display()))
        })?;
        Self::from_json_str(&raw)
    }
}

/// Registry listing entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowSummary {
    pub workflow_id: String,
    pub title: String,
    pub description: String,
}

#[cfg(test)]
pub(crate) fn sample_workflow() -> Workflow {
    Workflow::from_json_str(
        r#"{
            "schema_version": "v1",
            "workflow_computer": {
                "os": "linux",
                "computerName": "builder",
                "computerType": "localVM",
                "screenConfig": {"width": 1280, "height": 800, "display_num": 0}
            },
            "workflow_title": "Enter appointment",
            "workflow_description": "Books a slot in the calendar app",
            "workflow_inputs": [{
                "input_title": "Date",
                "input_description": "Appointment date",
                "input_type": "date",
                "input_name": "date"
            }],
            "sequences": [{
                "sequence_title": "Open calendar",
                "sequence_id": "seq-1",
                "sequence_description": "Launch the app",
                "sequence_inputs": ["date"],
                "steps": [{"title": "launch", "actions": ["open calendar"]}]
            }],
            "workflow_execution_instructions": {"instructions": ["be careful"], "code": []}
        }"#,
    )
    .expect("sample workflow")
}
