//! Tool adapters.
//!
//! # Architecture
//!
//! - `process`: Scoped child processes with timeout and cancellation
//! - `cache`: Per-file result caches invalidated by buffer content
//! - `completion`: Completion and hover via jedi
//! - `format`: Whole-buffer formatting via black
//! - `diagnostics`: Static diagnostics via pyflakes
//!
//! Each adapter is bound to one [`Interpreter`] for its whole life and runs
//! the interpreter once per invocation. Failures of the tool are returned as
//! [`ToolError`]s and never outlive the invocation.

pub mod cache;
pub mod completion;
pub mod diagnostics;
pub mod format;
pub mod process;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::environment::{Capability, Interpreter};
use crate::error::ToolError;
use process::ToolCommand;

pub use completion::{CompletionAdapter, CompletionItem, HoverInfo, Location};
pub use diagnostics::{Diagnostic, DiagnosticsAdapter, DiagnosticsReport, Severity};
pub use format::{FormatAdapter, FormatEdit, Formatted};

/// Prepended to every program run with `-c`. Removes the working directory
/// from the front of `sys.path`.
const PRELUDE: &str = include_str!("scripts/prelude.py");

/// Builds the `-c` program for `script`.
pub(crate) fn driver_program(script: &str) -> String {
    format!("{PRELUDE}\n{script}")
}

/// Common surface of every tool adapter.
pub trait ToolAdapter: Send + Sync {
    /// Capability the adapter primarily serves.
    fn capability(&self) -> Capability;

    /// Whether the backing tool is importable under the bound interpreter.
    fn available(&self) -> bool;
}

/// Invocation settings shared by the adapters of one session.
#[derive(Debug, Clone)]
pub struct ToolSettings {
    /// Working directory for tool processes; the project root.
    pub root: PathBuf,
    /// Time budget of a single invocation.
    pub timeout: Duration,
    /// Line length passed to the formatter, if configured.
    pub line_length: Option<u32>,
}

impl ToolSettings {
    /// Settings rooted at `root` with a 10 second budget.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            timeout: Duration::from_secs(10),
            line_length: None,
        }
    }
}

/// A cursor in jedi's convention: 1-based line, 0-based column in chars.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    /// 1-based line number.
    pub line: usize,
    /// 0-based column, counted in chars.
    pub column: usize,
}

/// Converts a char offset into a [`Position`].
///
/// Returns `None` when `offset` lies past the end of `buffer`. The offset
/// equal to the buffer length (cursor at the very end) is valid.
pub fn position_at(buffer: &str, offset: usize) -> Option<Position> {
    let mut line = 1;
    let mut column = 0;
    let mut seen = 0;
    for ch in buffer.chars() {
        if seen == offset {
            return Some(Position { line, column });
        }
        if ch == '\n' {
            line += 1;
            column = 0;
        } else {
            column += 1;
        }
        seen += 1;
    }
    (seen == offset).then_some(Position { line, column })
}

/// Request document written to the stdin of a driver script.
#[derive(Debug, Serialize)]
struct DriverRequest<'a> {
    source: &'a str,
    path: &'a Path,
    root: &'a Path,
    #[serde(skip_serializing_if = "Option::is_none")]
    line: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    column: Option<usize>,
}

/// Runs an embedded driver script and decodes its JSON answer.
async fn run_driver<T: DeserializeOwned>(
    interpreter: &Interpreter,
    settings: &ToolSettings,
    capability: Capability,
    script: &str,
    request: &DriverRequest<'_>,
    cancel: &CancellationToken,
) -> Result<T, ToolError> {
    let payload = serde_json::to_vec(request).map_err(|e| ToolError::SpawnFailed {
        capability,
        reason: format!("failed to encode request: {e}"),
    })?;

    let output = ToolCommand::new(interpreter.path())
        .arg("-c")
        .arg(driver_program(script))
        .current_dir(&settings.root)
        .stdin(payload)
        .timeout(settings.timeout)
        .run(cancel)
        .await
        .map_err(|failure| failure.into_tool_error(capability))?;

    if !output.status.success() {
        warn!(
            capability = %capability,
            interpreter = %interpreter.path().display(),
            status = %output.status,
            "tool exited with failure"
        );
        return Err(ToolError::Exited {
            capability,
            status: output.status.to_string(),
            stderr: output.short_stderr(),
        });
    }

    serde_json::from_str(output.stdout.trim()).map_err(|e| ToolError::MalformedOutput {
        capability,
        reason: e.to_string(),
    })
}
