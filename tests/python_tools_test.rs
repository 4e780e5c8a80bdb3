//! End-to-end tests against a real python with the tool packages installed.

use std::path::PathBuf;

use serde_json::{Value, json};

use crate::common::{TestEngine, python_with, start_engine, test_config};

/// Starts an engine on a python that can import `module`, or explains why
/// the test is skipped.
async fn engine_with(module: &str, root: &tempfile::TempDir) -> Option<TestEngine> {
    let Some(python): Option<PathBuf> = python_with(&[module]) else {
        eprintln!("skipping: no python with {module} installed");
        return None;
    };
    Some(start_engine(test_config(root.path(), Some(&python))).await)
}

#[tokio::test]
async fn test_completion_with_jedi() {
    let root = tempfile::tempdir().unwrap();
    let Some(engine) = engine_with("jedi", &root).await else {
        return;
    };
    let mut client = engine.connect().await;

    let buffer = "import os\nos.";
    let response = client
        .call(
            "completion.get",
            json!({"path": "main.py", "buffer": buffer, "offset": buffer.len()}),
        )
        .await
        .unwrap();
    let items = response.result().expect("completion failed").as_array().unwrap();
    assert!(items.iter().any(|item| item["label"] == json!("path")));

    // Out-of-range cursors are empty, not errors.
    let response = client
        .call(
            "completion.get",
            json!({"path": "main.py", "buffer": buffer, "offset": 999}),
        )
        .await
        .unwrap();
    assert_eq!(response.result(), Some(&json!([])));
    engine.stop().await;
}

#[tokio::test]
async fn test_project_modules_do_not_shadow_tools() {
    let root = tempfile::tempdir().unwrap();
    for name in ["json.py", "jedi.py"] {
        std::fs::write(root.path().join(name), "raise SystemExit('shadowed')\n").unwrap();
    }
    let Some(engine) = engine_with("jedi", &root).await else {
        return;
    };
    let mut client = engine.connect().await;

    let buffer = "import os\nos.";
    let response = client
        .call(
            "completion.get",
            json!({"path": "main.py", "buffer": buffer, "offset": buffer.len()}),
        )
        .await
        .unwrap();
    let items = response.result().expect("completion failed").as_array().unwrap();
    assert!(items.iter().any(|item| item["label"] == json!("path")));
    engine.stop().await;
}

#[tokio::test]
async fn test_hover_with_jedi() {
    let root = tempfile::tempdir().unwrap();
    let Some(engine) = engine_with("jedi", &root).await else {
        return;
    };
    let mut client = engine.connect().await;

    let response = client
        .call(
            "hover.get",
            json!({"path": "main.py", "buffer": "len([1, 2])\n", "offset": 1}),
        )
        .await
        .unwrap();
    let info = response.result().expect("hover failed");
    assert_eq!(info["name"], json!("len"));
    assert!(!info["docstring"].as_str().unwrap_or_default().is_empty());

    // Whitespace resolves to nothing.
    let response = client
        .call(
            "hover.get",
            json!({"path": "main.py", "buffer": "\n\n\n", "offset": 1}),
        )
        .await
        .unwrap();
    assert_eq!(response.result(), Some(&Value::Null));
    engine.stop().await;
}

#[tokio::test]
async fn test_format_with_black() {
    let root = tempfile::tempdir().unwrap();
    let Some(engine) = engine_with("black", &root).await else {
        return;
    };
    let mut client = engine.connect().await;

    let response = client
        .call("format.run", json!({"path": "main.py", "buffer": "x=1"}))
        .await
        .unwrap();
    let formatted = response.result().expect("format failed").clone();
    assert_eq!(formatted, json!("x = 1\n"));

    let response = client
        .call("format.run", json!({"path": "main.py", "buffer": formatted}))
        .await
        .unwrap();
    assert_eq!(response.result(), Some(&json!("x = 1\n")));

    let response = client
        .call("format.run", json!({"path": "main.py", "buffer": "def (:\n"}))
        .await
        .unwrap();
    assert_eq!(
        crate::common::error_kind(&response),
        Some(pytools_engine::ErrorKind::FormatError)
    );
    engine.stop().await;
}

#[tokio::test]
async fn test_diagnostics_with_pyflakes() {
    let root = tempfile::tempdir().unwrap();
    let Some(engine) = engine_with("pyflakes", &root).await else {
        return;
    };
    let mut client = engine.connect().await;
    let params = json!({"path": "main.py", "buffer": "import sys\n"});

    let first = client.call("diagnostics.run", params.clone()).await.unwrap();
    let report = first.result().expect("diagnostics failed").clone();
    let diagnostics = report["diagnostics"].as_array().unwrap();
    assert_eq!(diagnostics.len(), 1);
    assert_eq!(diagnostics[0]["severity"], json!("warning"));
    assert_eq!(diagnostics[0]["line"], json!(1));
    assert!(diagnostics[0]["message"].as_str().unwrap().contains("sys"));

    let second = client.call("diagnostics.run", params).await.unwrap();
    assert_eq!(second.result(), Some(&report));

    let response = client
        .call(
            "diagnostics.run",
            json!({"path": "main.py", "buffer": "import sys\nprint(sys.argv)\n"}),
        )
        .await
        .unwrap();
    assert_eq!(response.result().unwrap()["diagnostics"], json!([]));
    engine.stop().await;
}
