//! Capability probes.
//!
//! A probe answers "which tool packages can this interpreter import?".
//! Probes are queried lazily by the resolver and their answers cached per
//! interpreter path, so new tools plug in by adding a capability/module
//! pair rather than a new probing code path.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Debug;
use std::path::Path;
use std::time::Duration;

use futures::future::BoxFuture;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::Capability;
use crate::error::EnvironmentError;
use crate::tools::driver_program;
use crate::tools::process::{ProcessFailure, ToolCommand};

const PROBE_SCRIPT: &str = include_str!("../tools/scripts/probe.py");

/// Reports which capabilities an interpreter can serve.
pub trait CapabilityProbe: Send + Sync + Debug {
    /// Probes `interpreter`.
    ///
    /// # Errors
    ///
    /// Returns [`EnvironmentError::ProbeFailed`] when the interpreter cannot
    /// be run at all. Missing packages are not an error; they are simply
    /// absent from the returned set.
    fn probe<'a>(
        &'a self,
        interpreter: &'a Path,
    ) -> BoxFuture<'a, Result<BTreeSet<Capability>, EnvironmentError>>;
}

#[derive(Debug, Deserialize)]
struct ProbeReport {
    #[serde(default)]
    version: Vec<u32>,
    modules: BTreeMap<String, bool>,
}

/// Probes by running the interpreter and asking `importlib` for each module.
#[derive(Debug, Clone)]
pub struct PythonImportProbe {
    timeout: Duration,
}

impl PythonImportProbe {
    /// Creates a probe with the given per-interpreter time budget.
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for PythonImportProbe {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

impl CapabilityProbe for PythonImportProbe {
    fn probe<'a>(
        &'a self,
        interpreter: &'a Path,
    ) -> BoxFuture<'a, Result<BTreeSet<Capability>, EnvironmentError>> {
        Box::pin(async move {
            let failed = |reason: String| EnvironmentError::ProbeFailed {
                path: interpreter.to_path_buf(),
                reason,
            };

            let output = ToolCommand::new(interpreter)
                .arg("-c")
                .arg(driver_program(PROBE_SCRIPT))
                .args(Capability::required_modules())
                .timeout(self.timeout)
                .run(&CancellationToken::new())
                .await
                .map_err(|failure: ProcessFailure| failed(failure.to_string()))?;

            if !output.status.success() {
                return Err(failed(format!(
                    "exited with {}: {}",
                    output.status,
                    output.short_stderr()
                )));
            }

            let report: ProbeReport = serde_json::from_str(output.stdout.trim())
                .map_err(|e| failed(format!("unreadable probe output: {e}")))?;

            let capabilities = capabilities_from_modules(&report.modules);
            debug!(
                interpreter = %interpreter.display(),
                version = ?report.version,
                capabilities = ?capabilities,
                "probed interpreter"
            );
            Ok(capabilities)
        })
    }
}

/// Maps module availability onto the capabilities those modules serve.
pub fn capabilities_from_modules(modules: &BTreeMap<String, bool>) -> BTreeSet<Capability> {
    Capability::ALL
        .into_iter()
        .filter(|c| modules.get(c.module()).copied().unwrap_or(false))
        .collect()
}

/// A probe returning a fixed answer, for tests and embedding.
#[derive(Debug, Clone, Default)]
pub struct StaticProbe {
    capabilities: BTreeSet<Capability>,
}

impl StaticProbe {
    /// Creates a probe that always reports `capabilities`.
    pub fn new(capabilities: impl IntoIterator<Item = Capability>) -> Self {
        Self {
            capabilities: capabilities.into_iter().collect(),
        }
    }
}

impl CapabilityProbe for StaticProbe {
    fn probe<'a>(
        &'a self,
        _interpreter: &'a Path,
    ) -> BoxFuture<'a, Result<BTreeSet<Capability>, EnvironmentError>> {
        Box::pin(async move { Ok(self.capabilities.clone()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capabilities_from_modules() {
        let modules: BTreeMap<String, bool> = [
            ("jedi".to_string(), true),
            ("black".to_string(), false),
            ("pyflakes".to_string(), true),
        ]
        .into_iter()
        .collect();
        let caps = capabilities_from_modules(&modules);
        assert!(caps.contains(&Capability::Completion));
        assert!(caps.contains(&Capability::Hover));
        assert!(caps.contains(&Capability::Diagnostics));
        assert!(!caps.contains(&Capability::Format));
    }

    #[test]
    fn test_probe_report_parse() {
        let json = r#"{"version": [3, 11, 7], "modules": {"jedi": true, "black": false}}"#;
        let report: ProbeReport = serde_json::from_str(json).unwrap();
        assert_eq!(report.version, vec![3, 11, 7]);
        assert_eq!(report.modules.get("jedi"), Some(&true));
    }

    #[tokio::test]
    async fn test_probe_missing_interpreter_fails() {
        let probe = PythonImportProbe::new(Duration::from_secs(1));
        let result = probe.probe(Path::new("/does/not/exist/python")).await;
        assert!(matches!(result, Err(EnvironmentError::ProbeFailed { .. })));
    }

    #[tokio::test]
    async fn test_static_probe() {
        let probe = StaticProbe::new([Capability::Format]);
        let caps = probe.probe(Path::new("python")).await.unwrap();
        assert_eq!(caps.len(), 1);
    }
}
