//! Common test helpers and utilities.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use pytools_engine::{EngineConfig, ErrorKind};
use pytools_engine::client::EngineClient;
use pytools_engine::environment::{InterpreterSelection, PythonImportProbe, SearchPaths};
use pytools_engine::protocol::Response;
use pytools_engine::server::{Engine, Lifecycle};
use serde_json::Value;
use tokio::task::JoinHandle;

/// Probe answer of a fake interpreter that has every tool.
pub const ALL_TOOLS: &str = r#"{"jedi": true, "black": true, "pyflakes": true}"#;

/// Helper to find a python that can import every module in `modules`.
///
/// Honours `PYTOOLS_TEST_PYTHON`, then tries `python3` and `python`.
pub fn python_with(modules: &[&str]) -> Option<PathBuf> {
    let candidates: Vec<String> = std::env::var("PYTOOLS_TEST_PYTHON")
        .into_iter()
        .chain(["python3".to_string(), "python".to_string()])
        .collect();
    let import = format!("import {}", modules.join(", "));

    for candidate in candidates {
        if let Ok(output) = std::process::Command::new(&candidate)
            .args(["-c", "import sys; print(sys.executable)"])
            .output()
            && output.status.success()
        {
            let executable = PathBuf::from(String::from_utf8_lossy(&output.stdout).trim());
            let has_modules = std::process::Command::new(&executable)
                .args(["-c", &import])
                .output()
                .is_ok_and(|out| out.status.success());
            if has_modules {
                return Some(executable);
            }
        }
    }
    None
}

/// Helper to find a python with jedi, black and pyflakes.
pub fn python_with_tools() -> Option<PathBuf> {
    python_with(&["jedi", "black", "pyflakes"])
}

/// Writes an executable shell script standing in for a python interpreter.
///
/// Probe invocations are answered with `modules` (a JSON object of module
/// name to availability); every other invocation runs `body`. Every tool
/// runs as `-c <program>`, so the body can tell tools apart by `$2`.
#[cfg(unix)]
pub fn fake_interpreter(dir: &Path, name: &str, modules: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    let script = format!(
        "#!/bin/sh\ncase \"$2\" in\n  *find_spec*) echo '{{\"version\": [3, 12, 0], \"modules\": {modules}}}'; exit 0;;\nesac\n{body}\n"
    );
    std::fs::write(&path, script).expect("failed to write fake interpreter");
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
        .expect("failed to mark fake interpreter executable");
    path
}

/// A running engine bound to an ephemeral port.
pub struct TestEngine {
    pub addr: SocketAddr,
    pub lifecycle: Lifecycle,
    pub handle: JoinHandle<()>,
}

impl TestEngine {
    /// Opens a new connection.
    pub async fn connect(&self) -> EngineClient {
        EngineClient::connect(self.addr)
            .await
            .expect("failed to connect to engine")
    }

    /// Requests shutdown and waits for the engine to stop.
    pub async fn stop(self) {
        if let Ok(mut client) = EngineClient::connect(self.addr).await {
            let _ = client.call("shutdown", Value::Null).await;
        }
        tokio::time::timeout(Duration::from_secs(10), self.handle)
            .await
            .expect("engine did not stop")
            .expect("engine task panicked");
    }
}

/// Config for a test engine rooted at `root`.
pub fn test_config(root: &Path, interpreter: Option<&Path>) -> EngineConfig {
    EngineConfig {
        interpreter: interpreter.map_or(InterpreterSelection::Auto, |path| {
            InterpreterSelection::Path(path.to_path_buf())
        }),
        root: root.to_path_buf(),
        host: "127.0.0.1".to_string(),
        port: 0,
        tool_timeout_ms: 30_000,
        drain_timeout_ms: 2_000,
        max_workers: 4,
        ..EngineConfig::default()
    }
}

/// Helper to start an engine with no auto-detection candidates.
pub async fn start_engine(config: EngineConfig) -> TestEngine {
    let probe = Arc::new(PythonImportProbe::new(Duration::from_secs(10)));
    let engine = Engine::bind_with(config, probe, SearchPaths::default())
        .await
        .expect("failed to bind engine");
    let addr = engine.local_addr().expect("engine has no address");
    let lifecycle = engine.lifecycle();
    let handle = tokio::spawn(async move {
        engine.run().await.expect("engine failed");
    });
    TestEngine {
        addr,
        lifecycle,
        handle,
    }
}

/// Kind of an error response, or `None` for a success.
pub fn error_kind(response: &Response) -> Option<ErrorKind> {
    response.error().map(|e| e.kind)
}
