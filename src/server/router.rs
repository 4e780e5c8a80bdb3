//! Request routing and the current-session pointer.
//!
//! The router owns at most one [`Session`]. Capability requests read the
//! pointer and run concurrently against whatever session it holds.
//! Environment changes are serialized by `env_lock` and hold the write
//! side of the pointer while they resolve, so capability requests arriving
//! meanwhile queue until the new session is in place or resolution fails.
//!
//! Every request is numbered when it arrives. A session installed by an
//! environment or workspace change records the number of that change, and
//! requests numbered before it are refused with a session error instead of
//! being served by it.
//!
//! Lock order: `env_lock`, then `slot`.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde_json::{Value, json};
use tokio::sync::{Mutex, RwLock, Semaphore, mpsc};
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use super::lifecycle::{Lifecycle, LifecycleState};
use crate::config::EngineConfig;
use crate::environment::{
    EnvironmentResolver, Interpreter, InterpreterKind, InterpreterSelection,
};
use crate::error::{EngineError, EnvironmentError, Result};
use crate::protocol::{Call, EnvironmentParams, Request, Response, WorkspaceParams};
use crate::session::{RetireReason, Session};
use crate::tools::{Formatted, ToolSettings};

const SHUTDOWN_METHOD: &str = "shutdown";

#[derive(Debug)]
struct SessionSlot {
    session: Option<Arc<Session>>,
    selection: InterpreterSelection,
    kind: Option<InterpreterKind>,
    root: PathBuf,
    /// Failure of the last explicit environment change, while no session
    /// exists.
    last_error: Option<EnvironmentError>,
    /// Arrival number of the change that installed `session`.
    since: u64,
}

/// Dispatches requests to the current session.
#[derive(Debug)]
pub struct Router {
    config: EngineConfig,
    resolver: EnvironmentResolver,
    lifecycle: Lifecycle,
    slot: RwLock<SessionSlot>,
    env_lock: Mutex<()>,
    workers: Arc<Semaphore>,
    in_flight: TaskTracker,
    next_session: AtomicU64,
    next_arrival: AtomicU64,
}

impl Router {
    /// Creates a router; no session exists until the first request needs one.
    pub fn new(config: EngineConfig, resolver: EnvironmentResolver, lifecycle: Lifecycle) -> Self {
        let slot = SessionSlot {
            session: None,
            selection: config.interpreter.clone(),
            kind: config.kind,
            root: config.root.clone(),
            last_error: None,
            since: 0,
        };
        Self {
            workers: Arc::new(Semaphore::new(config.max_workers.max(1))),
            config,
            resolver,
            lifecycle,
            slot: RwLock::new(slot),
            env_lock: Mutex::new(()),
            in_flight: TaskTracker::new(),
            next_session: AtomicU64::new(1),
            next_arrival: AtomicU64::new(1),
        }
    }

    /// Lifecycle handle shared with the engine.
    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    /// Handles `request` on a tracked task and sends its response to `tx`.
    ///
    /// The request is numbered before the task is spawned, so its place
    /// relative to environment changes is its arrival order.
    pub fn spawn_request(self: &Arc<Self>, request: Request, tx: mpsc::Sender<Response>) {
        let arrival = self.arrive();
        let router = Arc::clone(self);
        self.in_flight.spawn(async move {
            let response = router.handle_arrived(arrival, request).await;
            if tx.send(response).await.is_err() {
                debug!("connection closed before response was sent");
            }
        });
    }

    /// Handles one request to completion.
    pub async fn handle(&self, request: Request) -> Response {
        let arrival = self.arrive();
        self.handle_arrived(arrival, request).await
    }

    fn arrive(&self) -> u64 {
        self.next_arrival.fetch_add(1, Ordering::SeqCst)
    }

    async fn handle_arrived(&self, arrival: u64, request: Request) -> Response {
        let Request { id, method, params } = request;
        let started = Instant::now();
        let result = self.dispatch(arrival, &method, params).await;
        let elapsed_ms = started.elapsed().as_millis();
        match &result {
            Ok(_) => debug!(request_id = %id, method = %method, elapsed_ms, "request completed"),
            Err(e) => info!(
                request_id = %id,
                method = %method,
                elapsed_ms,
                kind = ?e.kind(),
                error = %e,
                "request failed"
            ),
        }
        Response::from_result(id, result)
    }

    async fn dispatch(&self, arrival: u64, method: &str, params: Value) -> Result<Value> {
        // Shutdown stays answerable so repeated calls succeed.
        if method != SHUTDOWN_METHOD && !self.lifecycle.is_ready() {
            return Err(EngineError::ShuttingDown);
        }
        let call = Call::from_request(method, params)?;
        let _env = if call.is_environment_affecting() {
            Some(self.env_lock.lock().await)
        } else {
            None
        };

        match call {
            Call::Shutdown => {
                self.begin_shutdown();
                Ok(json!({ "state": self.lifecycle.state() }))
            }
            Call::Ping(params) => Ok(if params.is_null() { json!("pong") } else { params }),
            Call::EnvironmentSet(params) => self.set_environment(arrival, params).await,
            Call::WorkspaceSet(params) => self.set_workspace(arrival, params).await,
            Call::Capabilities => {
                let session = self.current_session(arrival).await?;
                Ok(json!(session.info()))
            }
            Call::Completion(p) => {
                let session = self.current_session(arrival).await?;
                let items = session.completion(&p.path, &p.buffer, p.offset).await?;
                Ok(json!(items))
            }
            Call::Hover(p) => {
                let session = self.current_session(arrival).await?;
                let info = session.hover(&p.path, &p.buffer, p.offset).await?;
                Ok(json!(info))
            }
            Call::Format(p) => {
                let session = self.current_session(arrival).await?;
                let text = session.format(&p.path, &p.buffer).await?;
                if p.edits {
                    Ok(json!(Formatted::new(&p.buffer, text)))
                } else {
                    Ok(Value::String(text))
                }
            }
            Call::Diagnostics(p) => {
                let session = self.current_session(arrival).await?;
                let report = session.diagnostics(&p.path, &p.buffer).await?;
                Ok(json!(report))
            }
        }
    }

    /// Returns the session serving a request numbered `arrival`, creating
    /// one if none exists.
    async fn current_session(&self, arrival: u64) -> Result<Arc<Session>> {
        {
            let slot = self.slot.read().await;
            if let Some(session) = usable(&slot, arrival)? {
                return Ok(session);
            }
        }

        let _env = self.env_lock.lock().await;
        let mut slot = self.slot.write().await;
        if let Some(session) = usable(&slot, arrival)? {
            return Ok(session);
        }

        let interpreter = self
            .resolver
            .resolve(&slot.selection, slot.kind, &slot.root, false)
            .await?;
        let session = self.new_session(Arc::new(interpreter), slot.root.clone());
        slot.session = Some(Arc::clone(&session));
        Ok(session)
    }

    /// Caller holds `env_lock`.
    async fn set_environment(&self, arrival: u64, params: EnvironmentParams) -> Result<Value> {
        let selection = match params.interpreter_path {
            Some(path) => InterpreterSelection::Path(path),
            None => InterpreterSelection::Auto,
        };

        let mut slot = self.slot.write().await;
        let kind = params.kind.or(slot.kind);

        let interpreter = match self.resolver.resolve(&selection, kind, &slot.root, true).await {
            Ok(interpreter) => interpreter,
            Err(err) => {
                match slot.session.as_ref().map(|current| current.id()) {
                    Some(session) => warn!(
                        error = %err,
                        session,
                        "environment change failed, keeping current session"
                    ),
                    None => {
                        warn!(error = %err, "environment change failed, no session available");
                        slot.last_error = Some(err.clone());
                    }
                }
                return Err(err.into());
            }
        };

        let session = self.new_session(Arc::new(interpreter), slot.root.clone());
        let previous = slot.session.replace(Arc::clone(&session));
        slot.selection = selection;
        slot.kind = kind;
        slot.last_error = None;
        slot.since = arrival;
        drop(slot);

        if let Some(previous) = previous {
            previous
                .retire(RetireReason::Replaced, self.config.drain_timeout())
                .await;
        }
        Ok(json!(session.info()))
    }

    /// Caller holds `env_lock`.
    async fn set_workspace(&self, arrival: u64, params: WorkspaceParams) -> Result<Value> {
        if !params.root.is_dir() {
            return Err(EngineError::InvalidParams(format!(
                "workspace root is not a directory: {}",
                params.root.display()
            )));
        }

        let mut slot = self.slot.write().await;
        slot.root = params.root;

        let Some(current) = slot.session.clone() else {
            return Ok(json!({ "root": slot.root }));
        };
        let session = self.new_session(Arc::clone(current.interpreter()), slot.root.clone());
        slot.session = Some(Arc::clone(&session));
        slot.since = arrival;
        drop(slot);

        current
            .retire(RetireReason::Replaced, self.config.drain_timeout())
            .await;
        Ok(json!(session.info()))
    }

    fn new_session(&self, interpreter: Arc<Interpreter>, root: PathBuf) -> Arc<Session> {
        let settings = ToolSettings {
            root,
            timeout: self.config.tool_timeout(),
            line_length: self.config.line_length,
        };
        let id = self.next_session.fetch_add(1, Ordering::Relaxed);
        Arc::new(Session::new(id, interpreter, settings, Arc::clone(&self.workers)))
    }

    /// Stops accepting new requests. Idempotent.
    pub fn begin_shutdown(&self) {
        if self.lifecycle.transition(LifecycleState::ShuttingDown) {
            info!("shutdown requested");
        }
    }

    /// Waits for in-flight requests, up to `timeout`. Work still running
    /// afterwards is cancelled.
    pub async fn drain(&self, timeout: Duration) {
        self.in_flight.close();
        if tokio::time::timeout(timeout, self.in_flight.wait()).await.is_ok() {
            info!("in-flight requests drained");
            return;
        }

        warn!(
            remaining = self.in_flight.len(),
            "drain timed out, cancelling in-flight requests"
        );
        self.workers.close();
        let session = self.slot.write().await.session.take();
        if let Some(session) = session {
            session.retire(RetireReason::Shutdown, timeout).await;
        }
        if tokio::time::timeout(timeout, self.in_flight.wait()).await.is_err() {
            warn!(remaining = self.in_flight.len(), "abandoning requests that ignored cancellation");
        }
    }
}

/// The current session, or the error recorded when the last explicit
/// environment change left none. A request that arrived before the change
/// installing the current session is refused.
fn usable(slot: &SessionSlot, arrival: u64) -> Result<Option<Arc<Session>>> {
    if let Some(session) = &slot.session {
        if arrival < slot.since {
            return Err(EnvironmentError::SessionReplaced.into());
        }
        return Ok(Some(Arc::clone(session)));
    }
    match &slot.last_error {
        Some(err) => Err(EnvironmentError::NoSession(err.to_string()).into()),
        None => Ok(None),
    }
}
