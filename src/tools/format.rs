//! Whole-buffer formatting, backed by black.
//!
//! black always sees the whole buffer. Callers that prefer minimal updates
//! can turn its output into [`FormatEdit`]s with [`line_edits`].

use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use similar::{DiffTag, TextDiff};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::process::ToolCommand;
use super::{ToolAdapter, ToolSettings, driver_program};
use crate::environment::{Capability, Interpreter};
use crate::error::ToolError;

/// black's exit status when the input cannot be parsed.
const BLACK_CANNOT_FORMAT: i32 = 123;

/// Runs black's command line as `python -m black` would.
const BLACK_MAIN: &str = include_str!("scripts/black_main.py");

/// Replacement of whole lines of the original buffer.
///
/// Lines `start_line..end_line` (1-based, end exclusive) are replaced by
/// `replacement`, which carries its own line endings. An empty range is an
/// insertion before `start_line`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FormatEdit {
    /// First replaced line.
    pub start_line: usize,
    /// Line after the last replaced one.
    pub end_line: usize,
    /// New text for the range.
    pub replacement: String,
}

/// Result of `format.run` when edits are requested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Formatted {
    /// The whole formatted buffer.
    pub text: String,
    /// Edits turning the original buffer into `text`, in buffer order.
    pub edits: Vec<FormatEdit>,
}

impl Formatted {
    /// Pairs `text` with the edits that produce it from `original`.
    pub fn new(original: &str, text: String) -> Self {
        let edits = line_edits(original, &text);
        Self { text, edits }
    }
}

/// Diffs `old` against `new` by line.
///
/// Adjacent changed lines collapse into one edit, so edits never touch and
/// applying them from last to first turns `old` into `new`.
pub fn line_edits(old: &str, new: &str) -> Vec<FormatEdit> {
    let diff = TextDiff::from_lines(old, new);
    let new_lines = diff.new_slices();
    let mut edits: Vec<FormatEdit> = Vec::new();

    for op in diff.ops() {
        let (tag, old_range, new_range) = op.as_tag_tuple();
        if tag == DiffTag::Equal {
            continue;
        }
        let replacement = new_lines[new_range].concat();
        let (start_line, end_line) = (old_range.start + 1, old_range.end + 1);
        match edits.last_mut() {
            Some(last) if last.end_line == start_line => {
                last.end_line = end_line;
                last.replacement.push_str(&replacement);
            }
            _ => edits.push(FormatEdit {
                start_line,
                end_line,
                replacement,
            }),
        }
    }
    edits
}

/// Formats buffers with one interpreter's black.
#[derive(Debug)]
pub struct FormatAdapter {
    interpreter: Arc<Interpreter>,
    settings: ToolSettings,
}

impl FormatAdapter {
    /// Binds an adapter to `interpreter`.
    pub fn new(interpreter: Arc<Interpreter>, settings: ToolSettings) -> Self {
        Self {
            interpreter,
            settings,
        }
    }

    /// Returns `buffer` reformatted. Stub files (`.pyi`) use stub style.
    ///
    /// # Errors
    ///
    /// [`ToolError::Format`] with black's message when the buffer cannot be
    /// formatted; other [`ToolError`]s when black fails to run.
    pub async fn format(
        &self,
        path: &Path,
        buffer: &str,
        cancel: &CancellationToken,
    ) -> Result<String, ToolError> {
        if buffer.is_empty() {
            return Ok(String::new());
        }

        let mut command = ToolCommand::new(self.interpreter.path())
            .arg("-c")
            .arg(driver_program(BLACK_MAIN))
            .arg("--quiet")
            .current_dir(&self.settings.root)
            .stdin(buffer)
            .timeout(self.settings.timeout);
        if let Some(line_length) = self.settings.line_length {
            command = command.arg("--line-length").arg(line_length.to_string());
        }
        if path.extension().is_some_and(|ext| ext == "pyi") {
            command = command.arg("--pyi");
        }

        let output = command
            .arg("-")
            .run(cancel)
            .await
            .map_err(|failure| failure.into_tool_error(Capability::Format))?;

        match output.status.code() {
            Some(0) => {
                debug!(path = %path.display(), changed = output.stdout != buffer, "formatted buffer");
                Ok(output.stdout)
            }
            Some(BLACK_CANNOT_FORMAT) => Err(ToolError::Format(output.stderr.trim().to_string())),
            _ => Err(ToolError::Exited {
                capability: Capability::Format,
                status: output.status.to_string(),
                stderr: output.short_stderr(),
            }),
        }
    }
}

impl ToolAdapter for FormatAdapter {
    fn capability(&self) -> Capability {
        Capability::Format
    }

    fn available(&self) -> bool {
        self.interpreter.supports(Capability::Format)
    }
}
