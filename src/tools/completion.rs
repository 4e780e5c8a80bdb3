//! Completion and hover, backed by jedi.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::cache::{self, FileCache};
use super::{DriverRequest, ToolAdapter, ToolSettings, position_at, run_driver};
use crate::environment::{Capability, Interpreter};
use crate::error::ToolError;

const COMPLETE_SCRIPT: &str = include_str!("scripts/complete.py");
const HOVER_SCRIPT: &str = include_str!("scripts/hover.py");

/// One completion candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionItem {
    /// Text to insert.
    pub label: String,
    /// jedi type name: `module`, `class`, `function`, `instance`, ...
    pub kind: String,
    /// Call signature, for classes and functions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

/// Source position of a definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    /// Defining module file; `None` for builtins.
    pub path: Option<PathBuf>,
    /// 1-based line.
    pub line: usize,
    /// 1-based column.
    pub column: usize,
}

/// Documentation for the symbol under the cursor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HoverInfo {
    /// Symbol name.
    pub name: String,
    /// jedi type name.
    pub kind: String,
    /// Call signature, for classes and functions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    /// Raw docstring, possibly empty.
    #[serde(default)]
    pub docstring: String,
    /// Where the symbol is defined, when resolvable.
    #[serde(default)]
    pub definition: Option<Location>,
}

/// Serves completion and hover for one interpreter.
#[derive(Debug)]
pub struct CompletionAdapter {
    interpreter: Arc<Interpreter>,
    settings: ToolSettings,
    completions: FileCache<usize, Vec<CompletionItem>>,
}

impl CompletionAdapter {
    /// Binds an adapter to `interpreter`.
    pub fn new(interpreter: Arc<Interpreter>, settings: ToolSettings) -> Self {
        Self {
            interpreter,
            settings,
            completions: FileCache::new(),
        }
    }

    /// Completion candidates at char `offset` of `buffer`, in tool order.
    ///
    /// An empty buffer or an offset past the end yields no candidates.
    ///
    /// # Errors
    ///
    /// Returns a [`ToolError`] when jedi fails, times out, or the call is
    /// cancelled.
    pub async fn complete(
        &self,
        path: &Path,
        buffer: &str,
        offset: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<CompletionItem>, ToolError> {
        if buffer.is_empty() {
            return Ok(Vec::new());
        }
        let Some(position) = position_at(buffer, offset) else {
            debug!(path = %path.display(), offset, "completion offset out of bounds");
            return Ok(Vec::new());
        };

        let digest = cache::digest(buffer);
        if let Some(items) = self.completions.get(path, &digest, &offset) {
            debug!(path = %path.display(), offset, "completion cache hit");
            return Ok(items);
        }

        let request = DriverRequest {
            source: buffer,
            path,
            root: &self.settings.root,
            line: Some(position.line),
            column: Some(position.column),
        };
        let items: Vec<CompletionItem> = run_driver(
            &self.interpreter,
            &self.settings,
            Capability::Completion,
            COMPLETE_SCRIPT,
            &request,
            cancel,
        )
        .await?;

        self.completions.insert(path, digest, offset, items.clone());
        Ok(items)
    }

    /// Documentation for the name at char `offset`, or `None` when nothing
    /// there resolves.
    ///
    /// # Errors
    ///
    /// Returns a [`ToolError`] when jedi fails, times out, or the call is
    /// cancelled.
    pub async fn hover(
        &self,
        path: &Path,
        buffer: &str,
        offset: usize,
        cancel: &CancellationToken,
    ) -> Result<Option<HoverInfo>, ToolError> {
        if buffer.is_empty() {
            return Ok(None);
        }
        let Some(position) = position_at(buffer, offset) else {
            return Ok(None);
        };

        let request = DriverRequest {
            source: buffer,
            path,
            root: &self.settings.root,
            line: Some(position.line),
            column: Some(position.column),
        };
        run_driver(
            &self.interpreter,
            &self.settings,
            Capability::Hover,
            HOVER_SCRIPT,
            &request,
            cancel,
        )
        .await
    }
}

impl ToolAdapter for CompletionAdapter {
    fn capability(&self) -> Capability {
        Capability::Completion
    }

    fn available(&self) -> bool {
        self.interpreter.supports(Capability::Completion)
    }
}
