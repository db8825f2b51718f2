//! Tool-call message types.
//!
//! One JSON object per line in each direction. Requests carry a caller-chosen
//! `id` that is echoed on the matching response, so responses to concurrent
//! requests may arrive in any order.

use serde::{Deserialize, Serialize};
use wdbg_core::{CommandResult, CommandStatus, SessionKey, SessionSummary};

use crate::version::ProtocolVersion;

fn default_true() -> bool {
    true
}

// ============================================================================
// Requests
// ============================================================================

/// Agent-facing operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "tool", rename_all = "snake_case")]
pub enum ToolCall {
    /// Open (or reuse) a session for a dump and run the standard triage
    /// commands against it.
    OpenDumpAnalysis {
        dump_path: String,
        #[serde(default = "default_true")]
        include_stack_trace: bool,
        #[serde(default = "default_true")]
        include_modules: bool,
        #[serde(default = "default_true")]
        include_threads: bool,
    },

    /// Attach to a running process by PID.
    AttachProcess { pid: u32 },

    /// Run one debugger command. `session` is a session key or dump path;
    /// a dump without a session is opened on demand.
    RunCommand {
        #[serde(alias = "dump_path")]
        session: String,
        command: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_secs: Option<u64>,
    },

    /// Close a session and release its debugger process.
    CloseSession {
        #[serde(alias = "dump_path")]
        session: String,
    },

    /// List open sessions.
    ListSessions,

    /// List `.dmp` files in a directory.
    ListDumps {
        directory_path: String,
        #[serde(default)]
        recursive: bool,
    },

    /// Liveness check.
    Ping { seq: u64 },
}

impl ToolCall {
    /// Returns the tool name as it appears on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            Self::OpenDumpAnalysis { .. } => "open_dump_analysis",
            Self::AttachProcess { .. } => "attach_process",
            Self::RunCommand { .. } => "run_command",
            Self::CloseSession { .. } => "close_session",
            Self::ListSessions => "list_sessions",
            Self::ListDumps { .. } => "list_dumps",
            Self::Ping { .. } => "ping",
        }
    }
}

/// Request envelope sent by the agent side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientRequest {
    /// Protocol version
    #[serde(default)]
    pub protocol_version: ProtocolVersion,

    /// Correlation ID echoed on the response
    pub id: u64,

    /// The operation
    #[serde(flatten)]
    pub call: ToolCall,
}

impl ClientRequest {
    /// Creates a request with the current protocol version.
    pub fn new(id: u64, call: ToolCall) -> Self {
        Self {
            protocol_version: ProtocolVersion::CURRENT,
            id,
            call,
        }
    }
}

// ============================================================================
// Responses
// ============================================================================

/// Category of a failed call, for programmatic handling by the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed request, incompatible version, oversized message.
    Protocol,
    /// Request parsed but its parameters are unusable.
    InvalidParams,
    /// Debugger binary missing or could not be started.
    Launch,
    /// Dump missing, or debugger died/hung during startup.
    SessionOpen,
    /// Another command is running on the session. Retry later.
    SessionBusy,
    /// The session was closed underneath the call.
    SessionClosed,
    /// Session limit reached.
    RegistryFull,
    /// Anything else.
    Internal,
}

impl ErrorKind {
    /// Returns true if the same call may succeed if simply retried later.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::SessionBusy | Self::RegistryFull)
    }
}

/// Successful tool output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolOutput {
    /// Human/agent readable text.
    pub text: String,

    /// Session the call ran against.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionKey>,

    /// Status of the debugger command, for command-running tools.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<CommandStatus>,

    /// True if output was cut at the size cap.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub truncated: bool,

    /// True when the command did not complete (timeout, process exit).
    /// The text still carries whatever output was collected.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,

    /// Structured session list for `list_sessions`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sessions: Option<Vec<SessionSummary>>,
}

impl ToolOutput {
    /// Plain text output.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    /// Attaches the session key.
    pub fn with_session(mut self, session: SessionKey) -> Self {
        self.session = Some(session);
        self
    }

    /// Attaches command status, marking non-completed commands as errors.
    pub fn with_command(mut self, result: &CommandResult) -> Self {
        self.status = Some(result.status);
        self.truncated = result.truncated;
        self.is_error = !result.is_completed();
        self
    }
}

/// Messages sent from the server to the agent side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Tool call succeeded
    Result { id: u64, output: ToolOutput },

    /// Tool call failed
    Error {
        /// Request ID, if it could be read from the request
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<u64>,
        kind: ErrorKind,
        message: String,
    },

    /// Pong response to ping
    Pong { id: u64, seq: u64 },
}

impl ServerMessage {
    /// Creates a result response.
    pub fn result(id: u64, output: ToolOutput) -> Self {
        Self::Result { id, output }
    }

    /// Creates an error response.
    pub fn error(id: Option<u64>, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Error {
            id,
            kind,
            message: message.into(),
        }
    }

    /// Creates a pong response.
    pub fn pong(id: u64, seq: u64) -> Self {
        Self::Pong { id, seq }
    }

    /// Returns the correlation ID, if any.
    pub fn id(&self) -> Option<u64> {
        match self {
            Self::Result { id, .. } | Self::Pong { id, .. } => Some(*id),
            Self::Error { id, .. } => *id,
        }
    }
}
