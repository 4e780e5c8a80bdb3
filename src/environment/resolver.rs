//! Interpreter resolution.
//!
//! Auto-detection walks, in order:
//! 1. the explicit interpreter path from configuration,
//! 2. the active conda environment under the default install location,
//! 3. a venv found relative to the project root,
//! 4. `python3`/`python` on the search path.
//!
//! The first candidate that exists and is executable wins. Its importable
//! tool packages are then probed; an interpreter lacking some of them is
//! still returned, with those capabilities missing.

use std::collections::{BTreeSet, HashMap};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, info};

use super::probe::CapabilityProbe;
use super::{Capability, Interpreter, InterpreterKind, InterpreterSelection};
use crate::error::EnvironmentError;

#[cfg(windows)]
const EXECUTABLE_NAMES: &[&str] = &["python.exe"];
#[cfg(not(windows))]
const EXECUTABLE_NAMES: &[&str] = &["python3", "python"];

const VENV_DIRS: &[&str] = &[".venv", "venv", "env"];

/// Locations consulted during auto-detection.
///
/// Captured once from the process environment; tests build their own.
#[derive(Debug, Clone, Default)]
pub struct SearchPaths {
    /// User home directory, holding conda installs.
    pub home: Option<PathBuf>,
    /// Contents of `$PATH`.
    pub path_var: Option<OsString>,
    /// Contents of `$CONDA_PREFIX`, the activated conda environment.
    pub conda_prefix: Option<PathBuf>,
}

impl SearchPaths {
    /// Reads search locations from the current process environment.
    pub fn from_env() -> Self {
        Self {
            home: dirs::home_dir(),
            path_var: std::env::var_os("PATH"),
            conda_prefix: std::env::var_os("CONDA_PREFIX").map(PathBuf::from),
        }
    }
}

/// Resolves interpreter selections into validated [`Interpreter`]s.
#[derive(Debug)]
pub struct EnvironmentResolver {
    probe: Arc<dyn CapabilityProbe>,
    search: SearchPaths,
    probed: Mutex<HashMap<PathBuf, BTreeSet<Capability>>>,
}

impl EnvironmentResolver {
    /// Creates a resolver using `probe` and the given search locations.
    pub fn new(probe: Arc<dyn CapabilityProbe>, search: SearchPaths) -> Self {
        Self {
            probe,
            search,
            probed: Mutex::new(HashMap::new()),
        }
    }

    /// Resolves `selection` for a project rooted at `root`.
    ///
    /// `kind` restricts auto-detection to one environment kind. `refresh`
    /// forces a new probe even if the interpreter was probed before.
    ///
    /// # Errors
    ///
    /// Returns [`EnvironmentError`] when an explicit path is missing or not
    /// executable, when no auto-detection candidate exists, or when the
    /// chosen interpreter cannot be run.
    pub async fn resolve(
        &self,
        selection: &InterpreterSelection,
        kind: Option<InterpreterKind>,
        root: &Path,
        refresh: bool,
    ) -> Result<Interpreter, EnvironmentError> {
        let (path, kind) = match selection {
            InterpreterSelection::Path(path) => {
                validate_executable(path)?;
                (path.clone(), InterpreterKind::classify(path))
            }
            InterpreterSelection::Auto => self.detect(kind, root)?,
        };

        let capabilities = self.capabilities(&path, refresh).await?;
        info!(
            interpreter = %path.display(),
            kind = %kind,
            capabilities = ?capabilities,
            "resolved python interpreter"
        );
        Ok(Interpreter::new(path, kind, capabilities))
    }

    /// Returns every auto-detection candidate in priority order.
    ///
    /// Candidates are not checked for existence.
    pub fn candidates(
        &self,
        kind: Option<InterpreterKind>,
        root: &Path,
    ) -> Vec<(PathBuf, InterpreterKind)> {
        let wanted = |k: InterpreterKind| kind.is_none_or(|want| want == k);
        let mut out = Vec::new();

        if wanted(InterpreterKind::Conda) {
            out.extend(
                self.conda_candidates()
                    .into_iter()
                    .map(|p| (p, InterpreterKind::Conda)),
            );
        }
        if wanted(InterpreterKind::Venv) {
            for dir in VENV_DIRS {
                out.push((env_executable(&root.join(dir)), InterpreterKind::Venv));
            }
        }
        if wanted(InterpreterKind::System) {
            if let Some(path_var) = &self.search.path_var {
                for dir in std::env::split_paths(path_var) {
                    for name in EXECUTABLE_NAMES {
                        out.push((dir.join(name), InterpreterKind::System));
                    }
                }
            }
        }
        out
    }

    fn detect(
        &self,
        kind: Option<InterpreterKind>,
        root: &Path,
    ) -> Result<(PathBuf, InterpreterKind), EnvironmentError> {
        let candidates = self.candidates(kind, root);
        for (path, kind) in &candidates {
            if validate_executable(path).is_ok() {
                debug!(interpreter = %path.display(), kind = %kind, "auto-detected interpreter");
                return Ok((path.clone(), *kind));
            }
        }
        let searched = match kind {
            Some(kind) => format!("{} candidates of kind {kind}", candidates.len()),
            None => format!("{} candidates", candidates.len()),
        };
        Err(EnvironmentError::NoCandidate(searched))
    }

    /// Conda interpreters: the activated environment first, then each
    /// install's base environment.
    fn conda_candidates(&self) -> Vec<PathBuf> {
        let installs = self.conda_installs();
        let mut out = Vec::new();
        if let Some(prefix) = &self.search.conda_prefix {
            if installs.iter().any(|install| prefix.starts_with(install)) {
                out.push(env_executable(prefix));
            }
        }
        out.extend(installs.iter().map(|install| env_executable(install)));
        out
    }

    /// Home-directory entries named like a conda distribution
    /// (`miniconda3`, `anaconda3`, `miniforge3`...), sorted by name.
    fn conda_installs(&self) -> Vec<PathBuf> {
        let Some(home) = &self.search.home else {
            return Vec::new();
        };
        let Ok(entries) = std::fs::read_dir(home) else {
            return Vec::new();
        };
        let mut installs: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .filter(|entry| {
                let name = entry.file_name().to_string_lossy().to_ascii_lowercase();
                (name.contains("conda") || name.contains("miniforge") || name.contains("mambaforge"))
                    && entry.path().is_dir()
            })
            .map(|entry| entry.path())
            .collect();
        installs.sort();
        installs
    }

    async fn capabilities(
        &self,
        path: &Path,
        refresh: bool,
    ) -> Result<BTreeSet<Capability>, EnvironmentError> {
        if !refresh {
            let cached = self
                .probed
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .get(path)
                .cloned();
            if let Some(capabilities) = cached {
                return Ok(capabilities);
            }
        }

        let capabilities = self.probe.probe(path).await?;
        self.probed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.to_path_buf(), capabilities.clone());
        Ok(capabilities)
    }
}

/// Interpreter executable inside an environment prefix.
fn env_executable(prefix: &Path) -> PathBuf {
    if cfg!(windows) {
        let scripts = prefix.join("Scripts").join("python.exe");
        if scripts.exists() {
            scripts
        } else {
            prefix.join("python.exe")
        }
    } else {
        prefix.join("bin").join("python")
    }
}

/// Checks that `path` names an existing executable file.
///
/// # Errors
///
/// [`EnvironmentError::NotFound`] or [`EnvironmentError::NotExecutable`].
pub fn validate_executable(path: &Path) -> Result<(), EnvironmentError> {
    let metadata =
        std::fs::metadata(path).map_err(|_| EnvironmentError::NotFound(path.to_path_buf()))?;
    if !metadata.is_file() {
        return Err(EnvironmentError::NotExecutable(path.to_path_buf()));
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if metadata.permissions().mode() & 0o111 == 0 {
            return Err(EnvironmentError::NotExecutable(path.to_path_buf()));
        }
    }
    Ok(())
}
