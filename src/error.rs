//! Error types for the pytools engine.
//!
//! Errors are organized by subsystem: environment resolution, tool
//! invocation and transport framing. [`EngineError`] unifies them and maps
//! each failure onto the wire-visible [`ErrorKind`] taxonomy, so the editor
//! client can tell a missing formatter apart from a crashed one.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::environment::Capability;

/// Errors raised while locating or validating a Python interpreter.
#[derive(Debug, Clone, Error)]
pub enum EnvironmentError {
    /// The interpreter path does not exist.
    #[error("interpreter not found: {}", .0.display())]
    NotFound(PathBuf),

    /// The interpreter path exists but cannot be executed.
    #[error("interpreter is not executable: {}", .0.display())]
    NotExecutable(PathBuf),

    /// Auto-detection exhausted every candidate.
    #[error("no usable python interpreter found (searched: {0})")]
    NoCandidate(String),

    /// Running the interpreter to probe it failed.
    #[error("failed to probe interpreter {}: {reason}", path.display())]
    ProbeFailed {
        /// Interpreter that was probed.
        path: PathBuf,
        /// Short cause.
        reason: String,
    },

    /// The session a request was bound to has been replaced.
    #[error("session was replaced by an environment change")]
    SessionReplaced,

    /// A previous environment change failed and no session exists.
    #[error("no active environment: {0}")]
    NoSession(String),
}

/// Errors raised by a tool adapter while running its external tool.
#[derive(Debug, Clone, Error)]
pub enum ToolError {
    /// The tool process could not be started.
    #[error("{capability}: failed to start tool: {reason}")]
    SpawnFailed {
        /// Capability whose tool failed.
        capability: Capability,
        /// Short cause.
        reason: String,
    },

    /// The tool exited with a non-zero status.
    #[error("{capability}: tool exited with {status}: {stderr}")]
    Exited {
        /// Capability whose tool failed.
        capability: Capability,
        /// Rendered exit status.
        status: String,
        /// Trimmed stderr of the tool.
        stderr: String,
    },

    /// The tool produced output the adapter could not interpret.
    #[error("{capability}: malformed tool output: {reason}")]
    MalformedOutput {
        /// Capability whose tool failed.
        capability: Capability,
        /// Short cause.
        reason: String,
    },

    /// The tool did not finish within its time budget and was killed.
    #[error("{capability}: tool timed out after {timeout:?}")]
    Timeout {
        /// Capability whose tool timed out.
        capability: Capability,
        /// The budget that was exceeded.
        timeout: Duration,
    },

    /// The formatter refused the input (usually a syntax error).
    #[error("cannot format buffer: {0}")]
    Format(String),

    /// The invocation was cancelled before it finished.
    #[error("{capability}: invocation cancelled")]
    Cancelled {
        /// Capability whose invocation was cancelled.
        capability: Capability,
    },
}

/// Errors related to message framing on the IPC channel.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The frame header is missing or malformed.
    #[error("invalid frame header: {0}")]
    InvalidHeader(String),

    /// The frame body exceeds the allowed size.
    #[error("frame of {0} bytes exceeds limit")]
    FrameTooLarge(usize),

    /// The frame body is not valid UTF-8.
    #[error("frame body is not valid UTF-8")]
    InvalidUtf8,

    /// The frame body could not be decoded as a request.
    #[error("undecodable message: {0}")]
    Undecodable(String),

    /// The peer closed the connection mid-frame.
    #[error("connection closed")]
    ConnectionClosed,

    /// IO error during transport operations.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Wire-visible error kinds.
///
/// Serialized as the PascalCase variant name in `error.kind`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// No usable interpreter could be resolved.
    EnvironmentError,
    /// The capability's tool is missing under the current interpreter.
    CapabilityUnavailable,
    /// The tool crashed or returned malformed output.
    ToolError,
    /// The tool exceeded its time budget.
    ToolTimeout,
    /// The formatter refused the input.
    FormatError,
    /// The method name is not known.
    UnsupportedMethod,
    /// The params of a known method are malformed.
    InvalidParams,
    /// The message could not be decoded.
    TransportError,
    /// The request was superseded or cancelled during shutdown.
    Cancelled,
    /// The engine no longer accepts work.
    ShuttingDown,
}

/// A unified error type for the engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Environment resolution failed.
    #[error("environment error: {0}")]
    Environment(#[from] EnvironmentError),

    /// The capability is not importable under the current interpreter.
    #[error("capability unavailable: {0}")]
    CapabilityUnavailable(Capability),

    /// A tool invocation failed.
    #[error("{0}")]
    Tool(#[from] ToolError),

    /// The method is not part of the protocol.
    #[error("unsupported method: {0}")]
    UnsupportedMethod(String),

    /// The params did not match the method's shape.
    #[error("invalid params: {0}")]
    InvalidParams(String),

    /// Transport-level failure.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The request was superseded by a newer one.
    #[error("request superseded by a newer request for {}", .0.display())]
    Superseded(PathBuf),

    /// The engine is shutting down.
    #[error("engine is shutting down")]
    ShuttingDown,

    /// Generic IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Maps the error onto its wire-visible kind.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Environment(_) => ErrorKind::EnvironmentError,
            Self::CapabilityUnavailable(_) => ErrorKind::CapabilityUnavailable,
            Self::Tool(ToolError::Timeout { .. }) => ErrorKind::ToolTimeout,
            Self::Tool(ToolError::Format(_)) => ErrorKind::FormatError,
            Self::Tool(ToolError::Cancelled { .. }) | Self::Superseded(_) => ErrorKind::Cancelled,
            Self::Tool(_) | Self::Io(_) => ErrorKind::ToolError,
            Self::UnsupportedMethod(_) => ErrorKind::UnsupportedMethod,
            Self::InvalidParams(_) => ErrorKind::InvalidParams,
            Self::Transport(_) => ErrorKind::TransportError,
            Self::ShuttingDown => ErrorKind::ShuttingDown,
        }
    }
}

/// A specialized Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
