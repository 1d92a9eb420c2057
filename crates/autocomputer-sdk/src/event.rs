use std::fmt;

use serde::{Deserialize, Serialize};

/// One block of assistant output carried by [`RunEvent::AssistantContent`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Narration produced by the executor's model.
    Text { text: String },
    /// Model reasoning, when the executor forwards it.
    Thinking { thinking: String },
    /// A tool call the executor decided to make.
    ToolUse {
        name: String,
        input: serde_json::Value,
    },
    /// The serialized result of a tool call.
    ToolUseResult { result: serde_json::Value },
}

/// Why a [`RunEvent::Error`] was emitted, and whether it ends the run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ErrorKind {
    /// A frame could not be decoded. The stream continues.
    Decode,
    /// A recoverable failure; another connection attempt follows after `delay_ms`.
    Retrying {
        attempt: u32,
        max_retries: u32,
        delay_ms: u64,
    },
    /// The executor reported a failure.
    Remote,
    /// The executor broke the channel protocol.
    Protocol,
    /// The executor rejected the run request.
    Rejected { status: u16 },
    /// Recoverable failures used up the retry budget.
    RetriesExhausted { attempts: u32 },
}

impl ErrorKind {
    /// Returns true when an error of this kind ends the run.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Decode | Self::Retrying { .. })
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Decode => f.write_str("decode"),
            Self::Retrying {
                attempt,
                max_retries,
                ..
            } => write!(f, "retrying {attempt}/{max_retries}"),
            Self::Remote => f.write_str("remote"),
            Self::Protocol => f.write_str("protocol"),
            Self::Rejected { status } => write!(f, "rejected {status}"),
            Self::RetriesExhausted { attempts } => {
                write!(f, "retries exhausted after {attempts} attempts")
            }
        }
    }
}

/// Typed progress event yielded by a run stream.
///
/// Exactly one terminal event (`Completed`, or an `Error` whose kind is
/// terminal) ends a run, unless the caller cancels it first.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    /// The executor accepted the run.
    Started,
    /// A workflow sequence began.
    SequenceStarted { sequence_id: String },
    /// A workflow sequence finished.
    SequenceStatus {
        sequence_id: String,
        success: bool,
        error: Option<String>,
    },
    /// Assistant output.
    AssistantContent { content: ContentBlock },
    /// A failure, informational or terminal depending on `kind`.
    Error { message: String, kind: ErrorKind },
    /// The channel was re-established after an interruption.
    ///
    /// The client cannot tell whether the executor resumed the run or started
    /// it again; events after this marker may repeat earlier progress.
    Reconnected { attempt: u32 },
    /// The run finished successfully.
    Completed,
}

impl RunEvent {
    /// Returns true for events that end the run.
    pub fn is_terminal(&self) -> bool {
        match self {
            Self::Completed => true,
            Self::Error { kind, .. } => kind.is_terminal(),
            _ => false,
        }
    }

    pub(crate) fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
            kind,
        }
    }
}
