//! Engine server.
//!
//! # Architecture
//!
//! - `lifecycle`: The `starting → ready → shutting-down → stopped` state machine
//! - `router`: Method dispatch and the current-session pointer
//! - `engine`: TCP endpoint, per-connection tasks and orderly shutdown
//!
//! Each connection has a reader loop and a writer task. Every request runs
//! on its own task and sends its response to the writer when done, so
//! responses on one connection arrive in completion order.

pub mod engine;
pub mod lifecycle;
pub mod router;

pub use engine::Engine;
pub use lifecycle::{Lifecycle, LifecycleState};
pub use router::Router;
