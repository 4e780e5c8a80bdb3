//! Static diagnostics, backed by pyflakes.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::cache::{self, FileCache};
use super::{DriverRequest, ToolAdapter, ToolSettings, run_driver};
use crate::environment::{Capability, Interpreter};
use crate::error::ToolError;

const LINT_SCRIPT: &str = include_str!("scripts/lint.py");

/// Name reported as the source of every diagnostic.
pub const DIAGNOSTICS_SOURCE: &str = "pyflakes";

/// Diagnostic severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// The file cannot be analysed as written.
    Error,
    /// Likely mistake.
    Warning,
    /// Informational.
    Notice,
}

/// One problem found in a buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// 1-based line.
    pub line: usize,
    /// 1-based column.
    pub column: usize,
    /// Severity.
    pub severity: Severity,
    /// Human-readable message.
    pub message: String,
    /// Tool that produced the diagnostic.
    pub source: String,
    /// Tool-specific message class, e.g. `UnusedImport`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

/// The complete diagnostic set for one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticsReport {
    /// File the set belongs to.
    pub path: PathBuf,
    /// Diagnostics ordered by position.
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Debug, Deserialize)]
struct RawDiagnostic {
    line: usize,
    column: usize,
    severity: Severity,
    message: String,
    #[serde(default)]
    code: Option<String>,
}

impl From<RawDiagnostic> for Diagnostic {
    fn from(raw: RawDiagnostic) -> Self {
        Self {
            line: raw.line.max(1),
            column: raw.column.max(1),
            severity: raw.severity,
            message: raw.message,
            source: DIAGNOSTICS_SOURCE.to_string(),
            code: raw.code,
        }
    }
}

/// Computes diagnostics for one interpreter.
#[derive(Debug)]
pub struct DiagnosticsAdapter {
    interpreter: Arc<Interpreter>,
    settings: ToolSettings,
    results: FileCache<(), Vec<Diagnostic>>,
}

impl DiagnosticsAdapter {
    /// Binds an adapter to `interpreter`.
    pub fn new(interpreter: Arc<Interpreter>, settings: ToolSettings) -> Self {
        Self {
            interpreter,
            settings,
            results: FileCache::new(),
        }
    }

    /// Returns every diagnostic for `buffer`, analysed as the file at `path`.
    ///
    /// The result replaces whatever was reported for `path` before.
    ///
    /// # Errors
    ///
    /// Returns a [`ToolError`] when pyflakes fails, times out, or the call
    /// is cancelled.
    pub async fn check(
        &self,
        path: &Path,
        buffer: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<Diagnostic>, ToolError> {
        if buffer.is_empty() {
            return Ok(Vec::new());
        }

        let digest = cache::digest(buffer);
        if let Some(diagnostics) = self.results.get(path, &digest, &()) {
            debug!(path = %path.display(), "diagnostics cache hit");
            return Ok(diagnostics);
        }

        let request = DriverRequest {
            source: buffer,
            path,
            root: &self.settings.root,
            line: None,
            column: None,
        };
        let raw: Vec<RawDiagnostic> = run_driver(
            &self.interpreter,
            &self.settings,
            Capability::Diagnostics,
            LINT_SCRIPT,
            &request,
            cancel,
        )
        .await?;

        let mut diagnostics: Vec<Diagnostic> = raw.into_iter().map(Diagnostic::from).collect();
        diagnostics.sort_by(|a, b| (a.line, a.column).cmp(&(b.line, b.column)));

        self.results.insert(path, digest, (), diagnostics.clone());
        Ok(diagnostics)
    }
}

impl ToolAdapter for DiagnosticsAdapter {
    fn capability(&self) -> Capability {
        Capability::Diagnostics
    }

    fn available(&self) -> bool {
        self.interpreter.supports(Capability::Diagnostics)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::environment::InterpreterKind;
    use std::os::unix::fs::PermissionsExt;

    fn fake_python(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("python");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn adapter(python: PathBuf, root: &Path) -> DiagnosticsAdapter {
        let interpreter = Interpreter::new(
            python,
            InterpreterKind::System,
            [Capability::Diagnostics].into_iter().collect(),
        );
        DiagnosticsAdapter::new(Arc::new(interpreter), ToolSettings::new(root))
    }

    #[tokio::test]
    async fn test_results_sorted_and_sourced() {
        let dir = tempfile::tempdir().unwrap();
        let python = fake_python(
            dir.path(),
            r#"cat >/dev/null
echo '[{"line": 3, "column": 1, "severity": "warning", "message": "b", "code": "UnusedVariable"},
       {"line": 1, "column": 1, "severity": "warning", "message": "a", "code": "UnusedImport"}]'"#,
        );
        let diagnostics = adapter(python, dir.path())
            .check(Path::new("a.py"), "import sys\n", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(diagnostics.len(), 2);
        assert_eq!(diagnostics[0].message, "a");
        assert_eq!(diagnostics[0].source, DIAGNOSTICS_SOURCE);
        assert_eq!(diagnostics[1].line, 3);
    }

    #[tokio::test]
    async fn test_unchanged_buffer_served_from_cache() {
        let dir = tempfile::tempdir().unwrap();
        let counter = dir.path().join("runs");
        let python = fake_python(
            dir.path(),
            &format!("cat >/dev/null\necho run >> '{}'\necho '[]'", counter.display()),
        );
        let adapter = adapter(python, dir.path());
        let cancel = CancellationToken::new();
        let first = adapter.check(Path::new("a.py"), "x = 1\n", &cancel).await.unwrap();
        let second = adapter.check(Path::new("a.py"), "x = 1\n", &cancel).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(std::fs::read_to_string(&counter).unwrap().lines().count(), 1);

        adapter.check(Path::new("a.py"), "x = 2\n", &cancel).await.unwrap();
        assert_eq!(std::fs::read_to_string(&counter).unwrap().lines().count(), 2);
    }

    #[tokio::test]
    async fn test_garbage_output_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let python = fake_python(dir.path(), "cat >/dev/null\necho 'not json'");
        let err = adapter(python, dir.path())
            .check(Path::new("a.py"), "x = 1\n", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::MalformedOutput { .. }));
    }

    #[test]
    fn test_severity_wire_names() {
        assert_eq!(serde_json::to_string(&Severity::Warning).unwrap(), "\"warning\"");
        let parsed: Severity = serde_json::from_str("\"notice\"").unwrap();
        assert_eq!(parsed, Severity::Notice);
    }
}
