//! The long-lived engine process: endpoint, connections and shutdown.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use super::lifecycle::{Lifecycle, LifecycleState};
use super::router::Router;
use crate::config::EngineConfig;
use crate::environment::{CapabilityProbe, EnvironmentResolver, PythonImportProbe, SearchPaths};
use crate::error::{ErrorKind, Result, TransportError};
use crate::protocol::{Request, Response, read_frame, write_frame};

/// Responses queued per connection before request tasks wait.
const RESPONSE_QUEUE: usize = 64;

/// How long connections get to flush after the engine stops.
const CONNECTION_GRACE: Duration = Duration::from_secs(1);

/// A bound engine, ready to serve.
#[derive(Debug)]
pub struct Engine {
    listener: TcpListener,
    router: Arc<Router>,
    drain_timeout: Duration,
    connections: TaskTracker,
}

impl Engine {
    /// Binds the configured endpoint using the interpreter probe.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the endpoint cannot be bound.
    pub async fn bind(config: EngineConfig) -> Result<Self> {
        let probe: Arc<dyn CapabilityProbe> =
            Arc::new(PythonImportProbe::new(config.probe_timeout()));
        Self::bind_with(config, probe, SearchPaths::from_env()).await
    }

    /// Binds the configured endpoint with a custom probe and search paths.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the endpoint cannot be bound.
    pub async fn bind_with(
        config: EngineConfig,
        probe: Arc<dyn CapabilityProbe>,
        search: SearchPaths,
    ) -> Result<Self> {
        let lifecycle = Lifecycle::new();
        let address = config.address();
        let listener = match TcpListener::bind(&address).await {
            Ok(listener) => listener,
            Err(e) => {
                error!(address = %address, error = %e, "failed to bind engine endpoint");
                lifecycle.transition(LifecycleState::Stopped);
                return Err(e.into());
            }
        };

        let drain_timeout = config.drain_timeout();
        let resolver = EnvironmentResolver::new(probe, search);
        let router = Arc::new(Router::new(config, resolver, lifecycle.clone()));
        lifecycle.transition(LifecycleState::Ready);
        info!(address = %listener.local_addr()?, "engine listening");

        Ok(Self {
            listener,
            router,
            drain_timeout,
            connections: TaskTracker::new(),
        })
    }

    /// Bound address.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the socket address cannot be read.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Lifecycle handle; transitioning it to shutting-down stops the engine.
    pub fn lifecycle(&self) -> Lifecycle {
        self.router.lifecycle().clone()
    }

    /// Serves connections until shutdown, then drains and stops.
    ///
    /// # Errors
    ///
    /// Currently infallible once bound; accept failures begin shutdown.
    pub async fn run(self) -> Result<()> {
        let lifecycle = self.lifecycle();

        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!(peer = %peer, "connection accepted");
                        let router = Arc::clone(&self.router);
                        self.connections.spawn(serve_connection(stream, peer, router));
                    }
                    Err(e) if is_transient(&e) => {
                        warn!(error = %e, "transient accept failure");
                    }
                    Err(e) => {
                        error!(error = %e, "endpoint failed, shutting down");
                        self.router.begin_shutdown();
                    }
                },
                () = lifecycle.reached(LifecycleState::ShuttingDown) => break,
            }
        }

        drop(self.listener);
        info!("engine shutting down, draining in-flight requests");
        self.router.drain(self.drain_timeout).await;
        lifecycle.transition(LifecycleState::Stopped);

        self.connections.close();
        if tokio::time::timeout(CONNECTION_GRACE, self.connections.wait())
            .await
            .is_err()
        {
            debug!("connections still open at exit");
        }
        info!("engine stopped");
        Ok(())
    }
}

fn is_transient(e: &std::io::Error) -> bool {
    use std::io::ErrorKind::{ConnectionAborted, ConnectionReset, Interrupted, WouldBlock};
    matches!(
        e.kind(),
        ConnectionAborted | ConnectionReset | Interrupted | WouldBlock
    )
}

/// Reads requests from one connection until it closes or the engine stops.
async fn serve_connection(stream: TcpStream, peer: SocketAddr, router: Arc<Router>) {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let (tx, mut rx) = mpsc::channel::<Response>(RESPONSE_QUEUE);

    let writer = tokio::spawn(async move {
        while let Some(response) = rx.recv().await {
            let body = match serde_json::to_vec(&response) {
                Ok(body) => body,
                Err(e) => {
                    error!(error = %e, "failed to encode response");
                    continue;
                }
            };
            if let Err(e) = write_frame(&mut write_half, &body).await {
                debug!(error = %e, "failed to write response, closing writer");
                break;
            }
        }
    });

    let lifecycle = router.lifecycle().clone();
    loop {
        let frame = tokio::select! {
            frame = read_frame(&mut reader) => frame,
            () = lifecycle.reached(LifecycleState::Stopped) => break,
        };

        match frame {
            Ok(Some(body)) => match Request::decode(&body) {
                Ok(request) => {
                    debug!(peer = %peer, request_id = %request.id, method = %request.method, "request received");
                    router.spawn_request(request, tx.clone());
                }
                Err((id, e)) => {
                    warn!(peer = %peer, error = %e, "rejecting undecodable request");
                    let response = Response::failure(id, ErrorKind::TransportError, e.to_string());
                    if tx.send(response).await.is_err() {
                        break;
                    }
                }
            },
            Ok(None) => {
                debug!(peer = %peer, "connection closed by peer");
                break;
            }
            Err(TransportError::ConnectionClosed) => {
                debug!(peer = %peer, "connection closed mid-frame");
                break;
            }
            Err(e) => {
                // The stream position is lost; answer once and drop the connection.
                warn!(peer = %peer, error = %e, "framing error, closing connection");
                let response = Response::failure(
                    serde_json::Value::Null,
                    ErrorKind::TransportError,
                    e.to_string(),
                );
                let _ = tx.send(response).await;
                break;
            }
        }
    }

    drop(tx);
    if let Err(e) = writer.await {
        warn!(peer = %peer, error = %e, "connection writer task failed");
    }
}
