//! Integration tests for the pytools engine.
//!
//! These tests start a real engine on an ephemeral loopback port and talk
//! to it over the framed protocol.
//!
//! To run these tests:
//! - Standard run: `cargo test --test integration_test`
//! - With debug output: `RUST_LOG=debug cargo test --test integration_test`
//! - Run single test: `cargo test --test integration_test test_ping`
//!
//! Note: `engine_test` and `tools_test` use shell scripts as fake
//! interpreters and need a Unix shell. `python_tools_test` needs a python
//! with jedi, black and pyflakes (set `PYTOOLS_TEST_PYTHON` to pick one);
//! tests whose tool is missing print a note and pass.

mod common;
mod python_tools_test;
#[cfg(unix)]
mod tools_test;
