//! Wire frames exchanged with the executor and the decoder that turns raw
//! text frames into typed values.
//!
//! One frame is one JSON object, discriminated by its `type` field. Frames
//! with a `type` this client does not know are dropped so that newer
//! executors can add event kinds without breaking older clients.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::computer::{ComputerConfig, OsName, ScreenConfig};
use crate::event::{ContentBlock, ErrorKind, RunEvent};
use crate::workflow::{UserInputs, Workflow};

const PROTOCOL_VERSION: &str = "1.0";
const MAX_ECHOED_FRAME_CHARS: usize = 256;

const KNOWN_FRAME_TYPES: &[&str] = &[
    "run_started",
    "sequence_started",
    "sequence_status",
    "workflow_sequence_status",
    "assistant",
    "error",
    "run_completed",
    "workflow_completed",
    "configure_ack",
    "tool_request",
];

const KNOWN_CONTENT_BLOCK_TYPES: &[&str] = &["text", "thinking", "tool_use", "tool_use_result"];

/// A tool invocation requested by the executor.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolRequest {
    pub tool_name: String,
    pub payload: serde_json::Value,
}

/// Answer to the most recent [`ToolRequest`] on a channel.
#[derive(Clone, Debug, PartialEq)]
pub enum ToolResponse {
    /// The endpoint's JSON result, forwarded verbatim.
    Result(serde_json::Value),
    /// Dispatch failed; sent as `{"error": message}`.
    Error(String),
}

impl ToolResponse {
    pub(crate) fn into_content(self) -> serde_json::Value {
        match self {
            Self::Result(value) => value,
            Self::Error(message) => serde_json::json!({ "error": message }),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ServerFrame {
    RunStarted {},
    SequenceStarted {
        sequence_id: String,
    },
    #[serde(alias = "workflow_sequence_status")]
    SequenceStatus {
        sequence_id: String,
        success: bool,
        #[serde(default)]
        error: Option<String>,
    },
    Assistant {
        content: ContentBlock,
    },
    Error {
        #[serde(alias = "content")]
        error: String,
    },
    #[serde(alias = "workflow_completed")]
    RunCompleted {},
    ConfigureAck {},
    ToolRequest {
        content: ToolRequest,
    },
}

/// Result of decoding one inbound frame.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Frame {
    Event(RunEvent),
    ConfigureAck,
    ToolRequest(ToolRequest),
    /// A `tool_request` whose content could not be read. The executor still
    /// expects an answer.
    MalformedToolRequest(String),
}

/// Decodes one raw text frame.
///
/// Returns `None` for blank frames, unknown frame types and assistant frames
/// carrying an unknown content block type. Malformed frames become a
/// non-terminal decode error event, except `error` frames, which always end
/// the run. This function never fails.
pub(crate) fn decode_frame(raw: &str) -> Option<Frame> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let value: serde_json::Value = match serde_json::from_str(trimmed) {
        Ok(value) => value,
        Err(err) => return Some(decode_error(trimmed, &err.to_string())),
    };
    let Some(frame_type) = value.get("type").and_then(|v| v.as_str()) else {
        debug!(
            event = "wire.frame_untyped",
            domain = "wire",
            frame_len = trimmed.len() as u64
        );
        return None;
    };
    if !KNOWN_FRAME_TYPES.contains(&frame_type) {
        debug!(
            event = "wire.frame_ignored",
            domain = "wire",
            frame_type = frame_type
        );
        return None;
    }
    if frame_type == "assistant"
        && let Some(block_type) = value
            .get("content")
            .and_then(|c| c.get("type"))
            .and_then(|t| t.as_str())
        && !KNOWN_CONTENT_BLOCK_TYPES.contains(&block_type)
    {
        debug!(
            event = "wire.content_block_ignored",
            domain = "wire",
            block_type = block_type
        );
        return None;
    }
    let frame_type = frame_type.to_string();
    let remote_error = (frame_type == "error").then(|| remote_error_message(&value, trimmed));
    match serde_json::from_value::<ServerFrame>(value) {
        Ok(frame) => Some(frame.into()),
        Err(err) if frame_type == "tool_request" => {
            Some(Frame::MalformedToolRequest(err.to_string()))
        }
        Err(err) => match remote_error {
            Some(message) => {
                debug!(
                    event = "wire.error_frame_unstructured",
                    domain = "wire",
                    error = %err
                );
                Some(Frame::Event(RunEvent::error(ErrorKind::Remote, message)))
            }
            None => Some(decode_error(trimmed, &err.to_string())),
        },
    }
}

/// Renders the payload of an `error` frame that does not carry a plain
/// string message.
fn remote_error_message(value: &serde_json::Value, raw: &str) -> String {
    match value.get("error").or_else(|| value.get("content")) {
        Some(serde_json::Value::String(message)) => message.clone(),
        Some(payload) if !payload.is_null() => payload.to_string(),
        _ => raw.chars().take(MAX_ECHOED_FRAME_CHARS).collect(),
    }
}

impl From<ServerFrame> for Frame {
    fn from(frame: ServerFrame) -> Self {
        match frame {
            ServerFrame::RunStarted {} => Frame::Event(RunEvent::Started),
            ServerFrame::SequenceStarted { sequence_id } => {
                Frame::Event(RunEvent::SequenceStarted { sequence_id })
            }
            ServerFrame::SequenceStatus {
                sequence_id,
                success,
                error,
            } => Frame::Event(RunEvent::SequenceStatus {
                sequence_id,
                success,
                error,
            }),
            ServerFrame::Assistant { content } => {
                Frame::Event(RunEvent::AssistantContent { content })
            }
            ServerFrame::Error { error } => Frame::Event(RunEvent::error(ErrorKind::Remote, error)),
            ServerFrame::RunCompleted {} => Frame::Event(RunEvent::Completed),
            ServerFrame::ConfigureAck {} => Frame::ConfigureAck,
            ServerFrame::ToolRequest { content } => Frame::ToolRequest(content),
        }
    }
}

fn decode_error(raw: &str, reason: &str) -> Frame {
    let echoed: String = raw.chars().take(MAX_ECHOED_FRAME_CHARS).collect();
    Frame::Event(RunEvent::error(
        ErrorKind::Decode,
        format!("Failed to decode message ({reason}): {echoed}"),
    ))
}

/// Body of the `start_workflow` frame.
#[derive(Debug, Serialize)]
pub(crate) struct StartWorkflow<'a> {
    pub workflow: &'a Workflow,
    pub user_inputs: &'a UserInputs,
    pub os_name: OsName,
    pub screen: ScreenConfig,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum ClientFrame<'a> {
    Configure { content: &'a ComputerConfig },
    StartWorkflow { content: StartWorkflow<'a> },
    ToolResponse { content: serde_json::Value },
}

#[derive(Serialize)]
struct Envelope<'a> {
    #[serde(flatten)]
    frame: &'a ClientFrame<'a>,
    version: &'static str,
}

impl ClientFrame<'_> {
    /// Serializes the frame with the protocol version attached.
    pub(crate) fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&Envelope {
            frame: self,
            version: PROTOCOL_VERSION,
        })
    }
}

#[cfg(test)]
pub(crate) fn encode_event(event: &RunEvent) -> Option<String> {
    let frame = match event.clone() {
        RunEvent::Started => ServerFrame::RunStarted {},
        RunEvent::SequenceStarted { sequence_id } => ServerFrame::SequenceStarted { sequence_id },
        RunEvent::SequenceStatus {
            sequence_id,
            success,
            error,
        } => ServerFrame::SequenceStatus {
            sequence_id,
            success,
            error,
        },
        RunEvent::AssistantContent { content } => ServerFrame::Assistant { content },
        RunEvent::Error {
            message,
            kind: ErrorKind::Remote,
        } => ServerFrame::Error { error: message },
        RunEvent::Completed => ServerFrame::RunCompleted {},
        RunEvent::Error { .. } | RunEvent::Reconnected { .. } => return None,
    };
    serde_json::to_string(&frame).ok()
}
