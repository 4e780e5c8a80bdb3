//! Python environment model and discovery.
//!
//! # Architecture
//!
//! The environment module is organized into:
//! - `probe`: Capability probes that check which tool packages an interpreter can import
//! - `resolver`: Interpreter auto-detection and explicit-path validation
//!
//! An [`Interpreter`] is immutable once resolved. Changing environment means
//! resolving a new one and replacing the session that holds it.

pub mod probe;
pub mod resolver;

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use probe::{CapabilityProbe, PythonImportProbe};
pub use resolver::{EnvironmentResolver, SearchPaths};

/// A code-intelligence capability backed by an external tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    /// Completion candidates at a cursor.
    Completion,
    /// Documentation for the symbol under a cursor.
    Hover,
    /// Whole-buffer formatting.
    Format,
    /// Static diagnostics for a buffer.
    Diagnostics,
}

impl Capability {
    /// Every capability, in wire order.
    pub const ALL: [Self; 4] = [Self::Completion, Self::Hover, Self::Format, Self::Diagnostics];

    /// Python module that must be importable for this capability.
    pub fn module(self) -> &'static str {
        match self {
            Self::Completion | Self::Hover => "jedi",
            Self::Format => "black",
            Self::Diagnostics => "pyflakes",
        }
    }

    /// Lowercase name used in logs and on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Completion => "completion",
            Self::Hover => "hover",
            Self::Format => "format",
            Self::Diagnostics => "diagnostics",
        }
    }

    /// Distinct module names required by all capabilities.
    pub fn required_modules() -> BTreeSet<&'static str> {
        Self::ALL.iter().map(|c| c.module()).collect()
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a Python runtime was installed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterpreterKind {
    /// Interpreter found on the search path.
    System,
    /// Conda base or named environment.
    Conda,
    /// Virtual environment created by `venv`/`virtualenv`.
    Venv,
}

impl InterpreterKind {
    /// Guesses the kind of an interpreter from the layout around it.
    ///
    /// `<prefix>/pyvenv.cfg` marks a venv and `<prefix>/conda-meta` a conda
    /// environment, where `<prefix>` is the directory holding `bin/`.
    pub fn classify(executable: &Path) -> Self {
        let Some(bin_dir) = executable.parent() else {
            return Self::System;
        };
        let candidates = [Some(bin_dir), bin_dir.parent()];
        for prefix in candidates.into_iter().flatten() {
            if prefix.join("pyvenv.cfg").is_file() {
                return Self::Venv;
            }
            if prefix.join("conda-meta").is_dir() {
                return Self::Conda;
            }
        }
        Self::System
    }
}

impl fmt::Display for InterpreterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::System => "system",
            Self::Conda => "conda",
            Self::Venv => "venv",
        })
    }
}

impl FromStr for InterpreterKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "system" => Ok(Self::System),
            "conda" => Ok(Self::Conda),
            "venv" => Ok(Self::Venv),
            other => Err(format!("unknown environment kind: {other}")),
        }
    }
}

/// Either an explicit interpreter path or a request to auto-detect one.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum InterpreterSelection {
    /// Walk the detection order.
    #[default]
    Auto,
    /// Use exactly this executable.
    Path(PathBuf),
}

impl From<String> for InterpreterSelection {
    fn from(value: String) -> Self {
        if value.is_empty() || value.eq_ignore_ascii_case("auto") {
            Self::Auto
        } else {
            Self::Path(PathBuf::from(value))
        }
    }
}

impl From<InterpreterSelection> for String {
    fn from(value: InterpreterSelection) -> Self {
        match value {
            InterpreterSelection::Auto => "auto".to_string(),
            InterpreterSelection::Path(path) => path.display().to_string(),
        }
    }
}

impl FromStr for InterpreterSelection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from(s.to_string()))
    }
}

/// A resolved Python runtime and the capabilities it can serve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interpreter {
    path: PathBuf,
    kind: InterpreterKind,
    capabilities: BTreeSet<Capability>,
}

impl Interpreter {
    /// Creates an interpreter record.
    pub fn new(path: PathBuf, kind: InterpreterKind, capabilities: BTreeSet<Capability>) -> Self {
        Self {
            path,
            kind,
            capabilities,
        }
    }

    /// Executable path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Installation kind.
    pub fn kind(&self) -> InterpreterKind {
        self.kind
    }

    /// Whether the tool behind `capability` is importable.
    pub fn supports(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }
}
