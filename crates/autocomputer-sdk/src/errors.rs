use crate::event::ErrorKind;

/// Failure reported by a transport adapter while opening, reading or writing
/// a run channel.
///
/// The retry policy decides whether a given failure is worth another
/// connection attempt (see [`crate::retry::RetryPolicy::classify`]).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The channel could not be opened (refused, timed out, DNS, TLS).
    #[error("connect failed: {message}")]
    Connect { message: String },
    /// An open channel failed mid-stream or was closed before a terminal event.
    #[error("stream interrupted: {message}")]
    Interrupted { message: String },
    /// The executor answered the connection attempt with a non-success status.
    #[error("request rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },
    /// The executor broke the channel protocol (for example during the handshake).
    #[error("protocol violation: {message}")]
    Protocol { message: String },
}

impl TransportError {
    /// Creates a connect-phase failure.
    pub fn connect(message: impl Into<String>) -> Self {
        Self::Connect {
            message: message.into(),
        }
    }

    /// Creates a mid-stream failure.
    pub fn interrupted(message: impl Into<String>) -> Self {
        Self::Interrupted {
            message: message.into(),
        }
    }

    /// Creates a status rejection.
    pub fn rejected(status: u16, message: impl Into<String>) -> Self {
        Self::Rejected {
            status,
            message: message.into(),
        }
    }

    /// Creates a protocol violation.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Returns the human-readable message for this error.
    pub fn message(&self) -> &str {
        match self {
            Self::Connect { message }
            | Self::Interrupted { message }
            | Self::Rejected { message, .. }
            | Self::Protocol { message } => message,
        }
    }
}

/// Failure while forwarding a tool request to the local tool endpoint.
///
/// These never reach the run stream: the relay turns them into an error
/// `tool_response` on the channel.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ToolDispatchError {
    /// The endpoint could not be reached.
    #[error("tool endpoint unreachable: {0}")]
    Unreachable(String),
    /// The endpoint answered with a non-success status.
    #[error("tool server error: {status} - {body}")]
    Status { status: u16, body: String },
    /// The endpoint answered with a body that is not JSON.
    #[error("tool endpoint returned an invalid body: {0}")]
    InvalidBody(String),
    /// The executor sent a tool request that could not be interpreted.
    #[error("malformed tool request: {0}")]
    Malformed(String),
}

/// Top-level error type for the public SDK API.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SdkError {
    /// Invalid client configuration.
    #[error("config error: {0}")]
    Config(String),
    /// Invalid caller input to a builder or request.
    #[error("validation error: {0}")]
    Validation(String),
    /// A plain request/response call returned a non-success status.
    #[error("http error ({status}): {message}")]
    Http { status: u16, message: String },
    /// A plain request/response call failed below the HTTP layer.
    #[error("transport error: {0}")]
    Transport(String),
    /// A response body could not be decoded into the expected type.
    #[error("decode error: {0}")]
    Decode(String),
    /// The local tool endpoint is missing or not ready.
    #[error("tool endpoint error: {0}")]
    ToolEndpoint(String),
    /// The computer provisioner failed.
    #[error("provisioner error: {0}")]
    Provisioner(String),
    /// A run ended with a terminal error event.
    #[error("run failed ({kind}): {message}")]
    RunFailed { kind: ErrorKind, message: String },
    /// The run was cancelled before it produced a terminal event.
    #[error("run cancelled")]
    Cancelled,
}

impl SdkError {
    pub(crate) fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_decode() {
            return Self::Decode(err.to_string());
        }
        match err.status() {
            Some(status) => Self::Http {
                status: status.as_u16(),
                message: err.to_string(),
            },
            None => Self::Transport(err.to_string()),
        }
    }
}
