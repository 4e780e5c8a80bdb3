//! Minimal client for the engine protocol.
//!
//! Used by the command-line subcommands that talk to a running engine and
//! by the integration tests.

use std::time::Duration;

use serde_json::Value;
use tokio::io::BufReader;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};
use tracing::debug;

use crate::error::{Result, TransportError};
use crate::protocol::{Request, Response, read_frame, write_frame};

/// A connection to a running engine.
#[derive(Debug)]
pub struct EngineClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    next_id: u64,
}

impl EngineClient {
    /// Connects to the engine at `addr`.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the connection cannot be established.
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let (read_half, writer) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(read_half),
            writer,
            next_id: 1,
        })
    }

    /// Sends a request without waiting for its response.
    ///
    /// Returns the id assigned to the request.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the frame cannot be written.
    pub async fn send(&mut self, method: &str, params: Value) -> Result<Value> {
        let id = Value::from(self.next_id);
        self.next_id += 1;
        let request = Request::new(id.clone(), method, params);
        let body = serde_json::to_vec(&request)
            .map_err(|e| TransportError::Undecodable(e.to_string()))?;
        self.send_raw(&body).await?;
        debug!(request_id = %id, method, "request sent");
        Ok(id)
    }

    /// Writes `body` as one frame, whatever it contains.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the frame cannot be written.
    pub async fn send_raw(&mut self, body: &[u8]) -> Result<()> {
        write_frame(&mut self.writer, body).await?;
        Ok(())
    }

    /// Reads the next response, in whatever order the engine answers.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the connection closes or the frame is
    /// not a response.
    pub async fn recv(&mut self) -> Result<Response> {
        let body = read_frame(&mut self.reader)
            .await?
            .ok_or(TransportError::ConnectionClosed)?;
        let response = serde_json::from_slice(&body)
            .map_err(|e| TransportError::Undecodable(e.to_string()))?;
        Ok(response)
    }

    /// Sends a request and waits for its response.
    ///
    /// Responses to other requests sent earlier on this connection are
    /// skipped.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the exchange fails.
    pub async fn call(&mut self, method: &str, params: Value) -> Result<Response> {
        let id = self.send(method, params).await?;
        loop {
            let response = self.recv().await?;
            if response.id == id {
                return Ok(response);
            }
            debug!(request_id = %response.id, "skipping response to earlier request");
        }
    }
}

/// Whether an engine answers `ping` at `addr` within `timeout`.
pub async fn ping(addr: &str, timeout: Duration) -> bool {
    let attempt = async {
        let mut client = EngineClient::connect(addr).await?;
        client.call("ping", Value::Null).await
    };
    match tokio::time::timeout(timeout, attempt).await {
        Ok(Ok(response)) => response.result().is_some(),
        _ => false,
    }
}
