//! Sessions: one interpreter, one project root, and the adapters bound to
//! them.
//!
//! A [`Session`] is never mutated into a different environment. Changing
//! interpreter or root builds a new session, swaps it in, and retires the
//! old one. Retiring cancels every invocation still running against the
//! old session and waits, bounded, for them to unwind.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{OnceCell, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::environment::{Capability, Interpreter, InterpreterKind};
use crate::error::{EngineError, EnvironmentError, Result, ToolError};
use crate::tools::{
    CompletionAdapter, CompletionItem, DiagnosticsAdapter, DiagnosticsReport, FormatAdapter,
    HoverInfo, ToolAdapter, ToolSettings,
};

/// Why a session stopped accepting work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetireReason {
    /// A new environment or root replaced it.
    Replaced,
    /// The engine is shutting down.
    Shutdown,
}

/// Snapshot of a session's environment, as reported to clients.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    /// Session number, increasing over the life of the engine.
    pub session: u64,
    /// Interpreter executable.
    pub interpreter: PathBuf,
    /// Interpreter kind.
    pub kind: InterpreterKind,
    /// Project root.
    pub root: PathBuf,
    /// Availability per capability.
    pub capabilities: BTreeMap<Capability, bool>,
}

/// The unit of working state for one interpreter and project root.
#[derive(Debug)]
pub struct Session {
    id: u64,
    interpreter: Arc<Interpreter>,
    settings: ToolSettings,
    workers: Arc<Semaphore>,
    completion: OnceCell<CompletionAdapter>,
    format: OnceCell<FormatAdapter>,
    diagnostics: OnceCell<DiagnosticsAdapter>,
    cancel: CancellationToken,
    tracker: TaskTracker,
    retired: OnceLock<RetireReason>,
    pending_diagnostics: Mutex<HashMap<PathBuf, (u64, CancellationToken)>>,
    generation: AtomicU64,
}

impl Session {
    /// Creates a session. Tool invocations share the `workers` pool.
    pub fn new(
        id: u64,
        interpreter: Arc<Interpreter>,
        settings: ToolSettings,
        workers: Arc<Semaphore>,
    ) -> Self {
        info!(
            session = id,
            interpreter = %interpreter.path().display(),
            root = %settings.root.display(),
            "session created"
        );
        Self {
            id,
            interpreter,
            settings,
            workers,
            completion: OnceCell::new(),
            format: OnceCell::new(),
            diagnostics: OnceCell::new(),
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
            retired: OnceLock::new(),
            pending_diagnostics: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
        }
    }

    /// Session number.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The interpreter this session is bound to.
    pub fn interpreter(&self) -> &Arc<Interpreter> {
        &self.interpreter
    }

    /// Whether the session has been retired.
    pub fn is_retired(&self) -> bool {
        self.retired.get().is_some()
    }

    /// Describes the session's environment.
    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            session: self.id,
            interpreter: self.interpreter.path().to_path_buf(),
            kind: self.interpreter.kind(),
            root: self.settings.root.clone(),
            capabilities: Capability::ALL
                .into_iter()
                .map(|c| (c, self.interpreter.supports(c)))
                .collect(),
        }
    }

    /// Completion candidates at `offset`.
    ///
    /// # Errors
    ///
    /// [`EngineError::CapabilityUnavailable`] without jedi, a tool error,
    /// or a session error if the session is retired meanwhile.
    pub async fn completion(
        &self,
        path: &Path,
        buffer: &str,
        offset: usize,
    ) -> Result<Vec<CompletionItem>> {
        let adapter = self.completion_adapter().await?;
        let token = self.cancel.child_token();
        self.guard(
            Capability::Completion,
            &token,
            adapter.complete(path, buffer, offset, &token),
        )
        .await
    }

    /// Hover documentation at `offset`.
    ///
    /// # Errors
    ///
    /// Same as [`Session::completion`].
    pub async fn hover(&self, path: &Path, buffer: &str, offset: usize) -> Result<Option<HoverInfo>> {
        let adapter = self.completion_adapter().await?;
        if !self.interpreter.supports(Capability::Hover) {
            return Err(EngineError::CapabilityUnavailable(Capability::Hover));
        }
        let token = self.cancel.child_token();
        self.guard(
            Capability::Hover,
            &token,
            adapter.hover(path, buffer, offset, &token),
        )
        .await
    }

    /// Formats `buffer`.
    ///
    /// # Errors
    ///
    /// [`EngineError::CapabilityUnavailable`] without black, a format or
    /// tool error, or a session error if the session is retired meanwhile.
    pub async fn format(&self, path: &Path, buffer: &str) -> Result<String> {
        let adapter = self
            .format
            .get_or_init(|| async {
                FormatAdapter::new(self.interpreter.clone(), self.settings.clone())
            })
            .await;
        ensure_available(adapter)?;
        let token = self.cancel.child_token();
        self.guard(Capability::Format, &token, adapter.format(path, buffer, &token))
            .await
    }

    /// Diagnostics for `buffer`.
    ///
    /// A newer diagnostics call for the same path cancels this one, which
    /// then fails with [`EngineError::Superseded`].
    ///
    /// # Errors
    ///
    /// [`EngineError::CapabilityUnavailable`] without pyflakes, a tool
    /// error, supersession, or a session error if the session is retired
    /// meanwhile.
    pub async fn diagnostics(&self, path: &Path, buffer: &str) -> Result<DiagnosticsReport> {
        let adapter = self
            .diagnostics
            .get_or_init(|| async {
                DiagnosticsAdapter::new(self.interpreter.clone(), self.settings.clone())
            })
            .await;
        ensure_available(adapter)?;

        let (generation, token) = self.supersede(path);
        let result = self
            .guard(
                Capability::Diagnostics,
                &token,
                adapter.check(path, buffer, &token),
            )
            .await;
        self.finish_diagnostics(path, generation);

        match result {
            Ok(diagnostics) => Ok(DiagnosticsReport {
                path: path.to_path_buf(),
                diagnostics,
            }),
            Err(EngineError::Tool(ToolError::Cancelled { .. })) if !self.is_retired() => {
                debug!(path = %path.display(), generation, "diagnostics superseded");
                Err(EngineError::Superseded(path.to_path_buf()))
            }
            Err(e) => Err(e),
        }
    }

    /// Stops accepting work, cancels what is running and waits up to
    /// `drain` for it to finish. Returns whether everything drained.
    pub async fn retire(&self, reason: RetireReason, drain: Duration) -> bool {
        if self.retired.set(reason).is_err() {
            return true;
        }
        self.cancel.cancel();
        self.tracker.close();
        let in_flight = self.tracker.len();
        let drained = tokio::time::timeout(drain, self.tracker.wait()).await.is_ok();
        if drained {
            info!(session = self.id, ?reason, in_flight, "session retired");
        } else {
            warn!(
                session = self.id,
                ?reason,
                remaining = self.tracker.len(),
                "session retired before in-flight work drained"
            );
        }
        drained
    }

    async fn completion_adapter(&self) -> Result<&CompletionAdapter> {
        let adapter = self
            .completion
            .get_or_init(|| async {
                CompletionAdapter::new(self.interpreter.clone(), self.settings.clone())
            })
            .await;
        ensure_available(adapter)?;
        Ok(adapter)
    }

    /// Runs one tool invocation on behalf of this session.
    ///
    /// The invocation is tracked for draining, waits for a worker slot and
    /// is cancelled with `token`. Cancellation caused by retirement is
    /// reported as a session error rather than a tool error.
    async fn guard<T, F>(&self, capability: Capability, token: &CancellationToken, work: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, ToolError>>,
    {
        if let Some(reason) = self.retired.get() {
            return Err(retired_error(*reason, capability));
        }

        let result = self
            .tracker
            .track_future(async {
                let _permit = tokio::select! {
                    permit = self.workers.acquire() => {
                        permit.map_err(|_| EngineError::ShuttingDown)?
                    }
                    () = token.cancelled() => {
                        return Err(ToolError::Cancelled { capability }.into());
                    }
                };
                work.await.map_err(EngineError::from)
            })
            .await;

        match (result, self.retired.get()) {
            (Err(EngineError::Tool(ToolError::Cancelled { .. })), Some(reason)) => {
                Err(retired_error(*reason, capability))
            }
            (result, _) => result,
        }
    }

    /// Registers a diagnostics run for `path`, cancelling the previous one.
    fn supersede(&self, path: &Path) -> (u64, CancellationToken) {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let token = self.cancel.child_token();
        let previous = self
            .pending_diagnostics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.to_path_buf(), (generation, token.clone()));
        if let Some((_, previous)) = previous {
            previous.cancel();
        }
        (generation, token)
    }

    fn finish_diagnostics(&self, path: &Path, generation: u64) {
        let mut pending = self
            .pending_diagnostics
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if pending.get(path).is_some_and(|(g, _)| *g == generation) {
            pending.remove(path);
        }
    }
}

fn ensure_available(adapter: &impl ToolAdapter) -> Result<()> {
    if adapter.available() {
        Ok(())
    } else {
        Err(EngineError::CapabilityUnavailable(adapter.capability()))
    }
}

fn retired_error(reason: RetireReason, capability: Capability) -> EngineError {
    match reason {
        RetireReason::Replaced => EnvironmentError::SessionReplaced.into(),
        RetireReason::Shutdown => ToolError::Cancelled { capability }.into(),
    }
}
