//! Engine configuration.
//!
//! Settings come from three layers, later ones winning: built-in defaults,
//! an optional JSON settings file, and command-line flags. Every field of
//! the settings file is optional.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::environment::{InterpreterKind, InterpreterSelection};

/// File name used by `config init` when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "pytools-engine.json";

/// Default loopback address of the engine.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default TCP port of the engine.
pub const DEFAULT_PORT: u16 = 9005;

/// Engine settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// `"auto"` or an interpreter executable.
    pub interpreter: InterpreterSelection,
    /// Restrict auto-detection to one environment kind.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<InterpreterKind>,
    /// Project root.
    pub root: PathBuf,
    /// Listen address.
    pub host: String,
    /// Listen port.
    pub port: u16,
    /// Budget of one tool invocation.
    pub tool_timeout_ms: u64,
    /// How long shutdown and environment changes wait for in-flight work.
    pub drain_timeout_ms: u64,
    /// Budget of one interpreter probe.
    pub probe_timeout_ms: u64,
    /// Concurrent tool invocations.
    pub max_workers: usize,
    /// Formatter line length; black's default when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line_length: Option<u32>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            interpreter: InterpreterSelection::Auto,
            kind: None,
            root: PathBuf::from("."),
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            tool_timeout_ms: 10_000,
            drain_timeout_ms: 5_000,
            probe_timeout_ms: 5_000,
            max_workers: num_cpus::get().clamp(1, 4),
            line_length: None,
        }
    }
}

impl EngineConfig {
    /// Reads a settings file; missing fields take their defaults.
    ///
    /// ## Errors
    /// Returns an error if the file cannot be read or is not valid JSON.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("failed to parse {} - invalid JSON", path.display()))
    }

    /// Checks values that would make the engine unusable.
    ///
    /// ## Errors
    /// Returns an error naming the offending field.
    pub fn validate(&self) -> Result<()> {
        if self.max_workers == 0 {
            bail!("max_workers must be at least 1");
        }
        if self.tool_timeout_ms == 0 {
            bail!("tool_timeout_ms must be positive");
        }
        if self.probe_timeout_ms == 0 {
            bail!("probe_timeout_ms must be positive");
        }
        if self.line_length == Some(0) {
            bail!("line_length must be positive");
        }
        Ok(())
    }

    /// `host:port` to listen on or connect to.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Budget of one tool invocation.
    pub fn tool_timeout(&self) -> Duration {
        Duration::from_millis(self.tool_timeout_ms)
    }

    /// Drain bound for shutdown and session replacement.
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    /// Budget of one interpreter probe.
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    /// Writes the default settings to `path`.
    ///
    /// ## Errors
    /// Returns an error if:
    /// - `path` already exists
    /// - File I/O fails
    pub fn write_default(path: &Path) -> Result<()> {
        if path.exists() {
            bail!(
                "{} already exists\n\n\
                To regenerate it, remove the file first, then run:\n  \
                pytools-engine config init",
                path.display()
            );
        }

        let json = serde_json::to_string_pretty(&Self::default())
            .context("failed to serialize default configuration")?;

        // Write atomically (temp file + rename)
        let temp_file = path.with_extension("tmp");
        fs::write(&temp_file, json).context("failed to write temporary config file")?;
        fs::rename(&temp_file, path).context("failed to rename temporary config file")?;

        Ok(())
    }
}
