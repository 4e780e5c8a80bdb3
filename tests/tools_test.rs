//! Tool failure isolation, cancellation and environment switching, using
//! shell scripts in place of python.

use std::time::Duration;

use pytools_engine::ErrorKind;
use serde_json::{Value, json};

use crate::common::{ALL_TOOLS, error_kind, fake_interpreter, start_engine, test_config};

fn diagnostics_params(buffer: &str) -> Value {
    json!({"path": "pkg/mod.py", "buffer": buffer})
}

#[tokio::test]
async fn test_tool_timeout_is_reported_and_engine_stays_responsive() {
    let root = tempfile::tempdir().unwrap();
    let python = fake_interpreter(root.path(), "python", ALL_TOOLS, "sleep 5\necho '[]'");
    let mut config = test_config(root.path(), Some(&python));
    config.tool_timeout_ms = 300;
    let engine = start_engine(config).await;
    let mut client = engine.connect().await;

    let slow = client
        .send("diagnostics.run", diagnostics_params("x = 1\n"))
        .await
        .unwrap();
    let ping = client.send("ping", Value::Null).await.unwrap();

    // The ping overtakes the stuck tool.
    let first = client.recv().await.unwrap();
    assert_eq!(first.id, ping);

    let second = tokio::time::timeout(Duration::from_secs(5), client.recv())
        .await
        .expect("timed-out tool must still produce a response")
        .unwrap();
    assert_eq!(second.id, slow);
    assert_eq!(error_kind(&second), Some(ErrorKind::ToolTimeout));
    engine.stop().await;
}

#[tokio::test]
async fn test_crashing_tool_is_tool_error() {
    let root = tempfile::tempdir().unwrap();
    let python = fake_interpreter(
        root.path(),
        "python",
        ALL_TOOLS,
        "cat >/dev/null\necho 'Traceback (most recent call last):' >&2\necho 'RuntimeError: boom' >&2\nexit 1",
    );
    let engine = start_engine(test_config(root.path(), Some(&python))).await;
    let mut client = engine.connect().await;

    let response = client
        .call(
            "completion.get",
            json!({"path": "a.py", "buffer": "import os\nos.", "offset": 13}),
        )
        .await
        .unwrap();
    assert_eq!(error_kind(&response), Some(ErrorKind::ToolError));
    let message = &response.error().unwrap().message;
    assert!(message.contains("completion"));
    assert!(message.contains("RuntimeError: boom"));

    // The session survives the crash.
    let response = client.call("capabilities", Value::Null).await.unwrap();
    assert!(response.result().is_some());
    engine.stop().await;
}

#[tokio::test]
async fn test_malformed_tool_output_is_tool_error() {
    let root = tempfile::tempdir().unwrap();
    let python = fake_interpreter(
        root.path(),
        "python",
        ALL_TOOLS,
        "cat >/dev/null\necho 'definitely not json'",
    );
    let engine = start_engine(test_config(root.path(), Some(&python))).await;
    let mut client = engine.connect().await;

    let response = client
        .call("diagnostics.run", diagnostics_params("import sys\n"))
        .await
        .unwrap();
    assert_eq!(error_kind(&response), Some(ErrorKind::ToolError));
    assert!(response.error().unwrap().message.contains("malformed"));
    engine.stop().await;
}

#[tokio::test]
async fn test_formatter_refusal_is_format_error() {
    let root = tempfile::tempdir().unwrap();
    let python = fake_interpreter(
        root.path(),
        "python",
        ALL_TOOLS,
        "cat >/dev/null\necho 'error: cannot format -: Cannot parse: 1:4: def (:' >&2\nexit 123",
    );
    let engine = start_engine(test_config(root.path(), Some(&python))).await;
    let mut client = engine.connect().await;

    let response = client
        .call("format.run", json!({"path": "a.py", "buffer": "def (:\n"}))
        .await
        .unwrap();
    assert_eq!(error_kind(&response), Some(ErrorKind::FormatError));
    assert!(response.error().unwrap().message.contains("Cannot parse"));
    engine.stop().await;
}

#[tokio::test]
async fn test_format_edits_on_request() {
    let root = tempfile::tempdir().unwrap();
    let python = fake_interpreter(
        root.path(),
        "python",
        ALL_TOOLS,
        "cat >/dev/null\nprintf 'import os\\n\\nx = 1\\n'",
    );
    let engine = start_engine(test_config(root.path(), Some(&python))).await;
    let mut client = engine.connect().await;
    let buffer = "import os\n\nx=1\n";

    // Plain text stays the default.
    let response = client
        .call("format.run", json!({"path": "a.py", "buffer": buffer}))
        .await
        .unwrap();
    assert_eq!(response.result(), Some(&json!("import os\n\nx = 1\n")));

    let response = client
        .call(
            "format.run",
            json!({"path": "a.py", "buffer": buffer, "edits": true}),
        )
        .await
        .unwrap();
    assert_eq!(
        response.result(),
        Some(&json!({
            "text": "import os\n\nx = 1\n",
            "edits": [{"startLine": 3, "endLine": 4, "replacement": "x = 1\n"}]
        }))
    );
    engine.stop().await;
}

#[tokio::test]
async fn test_missing_tool_is_capability_unavailable() {
    let root = tempfile::tempdir().unwrap();
    let python = fake_interpreter(
        root.path(),
        "python",
        r#"{"jedi": false, "black": true, "pyflakes": true}"#,
        "cat >/dev/null\necho '[]'",
    );
    let engine = start_engine(test_config(root.path(), Some(&python))).await;
    let mut client = engine.connect().await;

    let response = client
        .call("completion.get", json!({"path": "a.py", "buffer": "os.", "offset": 3}))
        .await
        .unwrap();
    assert_eq!(error_kind(&response), Some(ErrorKind::CapabilityUnavailable));

    let response = client
        .call("hover.get", json!({"path": "a.py", "buffer": "os", "offset": 1}))
        .await
        .unwrap();
    assert_eq!(error_kind(&response), Some(ErrorKind::CapabilityUnavailable));

    let response = client.call("capabilities", Value::Null).await.unwrap();
    let info = response.result().unwrap();
    assert_eq!(info["capabilities"]["completion"], json!(false));
    assert_eq!(info["capabilities"]["diagnostics"], json!(true));

    // Other capabilities keep working.
    let response = client
        .call("diagnostics.run", diagnostics_params("x = 1\n"))
        .await
        .unwrap();
    assert_eq!(response.result().unwrap()["diagnostics"], json!([]));
    engine.stop().await;
}

#[tokio::test]
async fn test_newer_diagnostics_supersede_older() {
    let root = tempfile::tempdir().unwrap();
    let python = fake_interpreter(
        root.path(),
        "python",
        ALL_TOOLS,
        "cat >/dev/null\nsleep 1\necho '[{\"line\": 1, \"column\": 8, \"severity\": \"warning\", \"message\": \"unused\", \"code\": \"UnusedImport\"}]'",
    );
    let engine = start_engine(test_config(root.path(), Some(&python))).await;
    let mut client = engine.connect().await;

    let older = client
        .send("diagnostics.run", diagnostics_params("import sys\n"))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    let newer = client
        .send("diagnostics.run", diagnostics_params("import sys\n\n"))
        .await
        .unwrap();

    let mut responses = Vec::new();
    for _ in 0..2 {
        let response = tokio::time::timeout(Duration::from_secs(10), client.recv())
            .await
            .expect("response timed out")
            .unwrap();
        responses.push(response);
    }

    let older = responses.iter().find(|r| r.id == older).unwrap();
    let newer = responses.iter().find(|r| r.id == newer).unwrap();
    assert_eq!(error_kind(older), Some(ErrorKind::Cancelled));
    let report = newer.result().expect("newest diagnostics should succeed");
    assert_eq!(report["path"], json!("pkg/mod.py"));
    assert_eq!(report["diagnostics"][0]["source"], json!("pyflakes"));
    engine.stop().await;
}

#[tokio::test]
async fn test_environment_switch_never_leaks_new_results_into_old_requests() {
    let root = tempfile::tempdir().unwrap();
    let old_python = fake_interpreter(
        root.path(),
        "python-old",
        ALL_TOOLS,
        "cat >/dev/null\nsleep 2\necho '[{\"label\": \"old\", \"kind\": \"function\"}]'",
    );
    let new_python = fake_interpreter(
        root.path(),
        "python-new",
        ALL_TOOLS,
        "cat >/dev/null\necho '[{\"label\": \"new\", \"kind\": \"function\"}]'",
    );
    let engine = start_engine(test_config(root.path(), Some(&old_python))).await;
    let mut client = engine.connect().await;
    let completion = json!({"path": "a.py", "buffer": "x.", "offset": 2});

    let pending = client.send("completion.get", completion.clone()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    let switch = client
        .send("environment.set", json!({"interpreterPath": &new_python}))
        .await
        .unwrap();

    for _ in 0..2 {
        let response = tokio::time::timeout(Duration::from_secs(10), client.recv())
            .await
            .expect("response timed out")
            .unwrap();
        if response.id == pending {
            match response.result() {
                Some(items) => assert_eq!(items[0]["label"], json!("old")),
                None => assert_eq!(error_kind(&response), Some(ErrorKind::EnvironmentError)),
            }
        } else {
            assert_eq!(response.id, switch);
            assert_eq!(response.result().unwrap()["interpreter"], json!(new_python));
        }
    }

    let response = client.call("completion.get", completion).await.unwrap();
    assert_eq!(response.result().unwrap()[0]["label"], json!("new"));
    engine.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_back_to_back_switches_never_serve_earlier_requests() {
    let root = tempfile::tempdir().unwrap();
    let pythons = [
        fake_interpreter(
            root.path(),
            "python-a",
            ALL_TOOLS,
            "cat >/dev/null\necho '[{\"label\": \"a\", \"kind\": \"function\"}]'",
        ),
        fake_interpreter(
            root.path(),
            "python-b",
            ALL_TOOLS,
            "cat >/dev/null\necho '[{\"label\": \"b\", \"kind\": \"function\"}]'",
        ),
    ];
    let labels = ["a", "b"];
    let engine = start_engine(test_config(root.path(), Some(&pythons[0]))).await;
    let mut client = engine.connect().await;
    let completion = json!({"path": "a.py", "buffer": "x.", "offset": 2});

    for round in 0..20 {
        let current = round % 2;
        let next = 1 - current;
        let pending = client.send("completion.get", completion.clone()).await.unwrap();
        let switch = client
            .send("environment.set", json!({"interpreterPath": &pythons[next]}))
            .await
            .unwrap();

        for _ in 0..2 {
            let response = tokio::time::timeout(Duration::from_secs(10), client.recv())
                .await
                .expect("response timed out")
                .unwrap();
            if response.id == pending {
                match response.result() {
                    Some(items) => assert_eq!(
                        items[0]["label"],
                        json!(labels[current]),
                        "round {round}: completion served by the later session"
                    ),
                    None => assert_eq!(error_kind(&response), Some(ErrorKind::EnvironmentError)),
                }
            } else {
                assert_eq!(response.id, switch);
                assert!(response.result().is_some(), "round {round}: switch failed");
            }
        }
    }
    engine.stop().await;
}

#[tokio::test]
async fn test_workspace_change_keeps_interpreter() {
    let root = tempfile::tempdir().unwrap();
    let other_root = tempfile::tempdir().unwrap();
    let python = fake_interpreter(root.path(), "python", ALL_TOOLS, "cat >/dev/null\necho '[]'");
    let engine = start_engine(test_config(root.path(), Some(&python))).await;
    let mut client = engine.connect().await;

    let before = client.call("capabilities", Value::Null).await.unwrap();
    let before = before.result().unwrap().clone();

    let response = client
        .call("workspace.set", json!({"root": other_root.path()}))
        .await
        .unwrap();
    let after = response.result().unwrap();
    assert_eq!(after["root"], json!(other_root.path()));
    assert_eq!(after["interpreter"], before["interpreter"]);
    assert_ne!(after["session"], before["session"]);

    let response = client
        .call("diagnostics.run", diagnostics_params("x = 1\n"))
        .await
        .unwrap();
    assert!(response.result().is_some());
    engine.stop().await;
}
