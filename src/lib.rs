//! Pytools Engine
//!
//! A long-lived background engine that serves Python code intelligence
//! (completion, hover, formatting, diagnostics) to an editor over a local
//! socket, delegating the actual analysis to tools installed in the user's
//! Python environment.
//!
//! # Overview
//!
//! This library provides:
//! - Interpreter discovery (explicit path, conda, venv, system) with
//!   per-capability probing
//! - Tool adapters that run jedi, black and pyflakes as scoped child
//!   processes with timeouts
//! - A request router over a single swappable session
//! - A `Content-Length` framed JSON protocol over TCP, and a client for it
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐    TCP (framed JSON)   ┌──────────────────┐
//! │  Editor Client  │◄──────────────────────►│      Engine      │
//! └─────────────────┘                        │ (pytools-engine) │
//!                                            └────────┬─────────┘
//!                                                     │
//!                                              ┌──────▼──────┐
//!                                              │   Router    │
//!                                              └──────┬──────┘
//!                                                     │ current session
//!                                              ┌──────▼──────┐
//!                                              │   Session   │
//!                                              └──────┬──────┘
//!                                                     │ one process per call
//!                                          ┌──────────▼───────────┐
//!                                          │ python -c <program>  │
//!                                          └──────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`error`] - Error types and the wire error taxonomy
//! - [`config`] - Engine settings
//! - [`environment`] - Interpreter model, probing and resolution
//! - [`tools`] - Tool adapters and the process runner
//! - [`session`] - Per-environment working state
//! - [`protocol`] - Framing and message types
//! - [`server`] - Lifecycle, routing and the TCP engine
//! - [`client`] - Protocol client
//!
//! # Example
//!
//! ```ignore
//! use pytools_engine::{EngineConfig, server::Engine};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let engine = Engine::bind(EngineConfig::default()).await?;
//!     engine.run().await?;
//!     Ok(())
//! }
//! ```

// Enforce documentation and other quality attributes
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
// Allow some pedantic lints that are too strict
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod client;
pub mod config;
pub mod environment;
pub mod error;
pub mod protocol;
pub mod server;
pub mod session;
pub mod tools;

// Re-export commonly used types at the crate root
pub use config::EngineConfig;
pub use error::{EngineError, ErrorKind, Result};
