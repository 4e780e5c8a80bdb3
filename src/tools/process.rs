//! Scoped execution of external tool processes.
//!
//! Every tool invocation spawns one child process, feeds it the request on
//! stdin and collects stdout/stderr. The child is spawned with
//! `kill_on_drop`, so when the invocation future is dropped (timeout,
//! cancellation, or the caller going away) the process is killed and reaped
//! by `async-process` instead of leaking across requests.

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use futures::AsyncWriteExt;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::environment::Capability;
use crate::error::ToolError;

/// Why a tool process did not produce output.
#[derive(Debug, Error)]
pub enum ProcessFailure {
    /// The executable could not be started.
    #[error("failed to start: {0}")]
    Spawn(io::Error),
    /// Reading the child's output failed.
    #[error("failed to read output: {0}")]
    Io(io::Error),
    /// The time budget elapsed; the child was killed.
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    /// The cancellation token fired; the child was killed.
    #[error("cancelled")]
    Cancelled,
}

impl ProcessFailure {
    /// Attributes the failure to `capability`.
    pub fn into_tool_error(self, capability: Capability) -> ToolError {
        match self {
            Self::Spawn(e) => ToolError::SpawnFailed {
                capability,
                reason: e.to_string(),
            },
            Self::Io(e) => ToolError::MalformedOutput {
                capability,
                reason: format!("failed to read tool output: {e}"),
            },
            Self::Timeout(timeout) => ToolError::Timeout {
                capability,
                timeout,
            },
            Self::Cancelled => ToolError::Cancelled { capability },
        }
    }
}

/// Captured result of a finished tool process.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    /// Exit status of the child.
    pub status: ExitStatus,
    /// Stdout, lossily decoded.
    pub stdout: String,
    /// Stderr, lossily decoded.
    pub stderr: String,
}

impl ToolOutput {
    /// Stderr trimmed to a short single cause for error messages.
    pub fn short_stderr(&self) -> String {
        let trimmed = self.stderr.trim();
        // Python tracebacks end with the exception line.
        let last = trimmed.lines().last().unwrap_or_default();
        if last.chars().count() > 512 {
            format!("{}...", last.chars().take(512).collect::<String>())
        } else {
            last.to_string()
        }
    }
}

/// A single invocation of an external program.
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: PathBuf,
    args: Vec<OsString>,
    cwd: Option<PathBuf>,
    stdin: Vec<u8>,
    timeout: Duration,
}

impl ToolCommand {
    /// Creates a command for `program` with a 10 second default budget.
    pub fn new(program: impl AsRef<Path>) -> Self {
        Self {
            program: program.as_ref().to_path_buf(),
            args: Vec::new(),
            cwd: None,
            stdin: Vec::new(),
            timeout: Duration::from_secs(10),
        }
    }

    /// Appends one argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends several arguments.
    #[must_use]
    pub fn args(mut self, args: impl IntoIterator<Item = impl Into<OsString>>) -> Self {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Sets the working directory of the child.
    #[must_use]
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Sets the bytes written to the child's stdin.
    #[must_use]
    pub fn stdin(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.stdin = input.into();
        self
    }

    /// Sets the time budget.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Runs the command to completion, its timeout, or cancellation.
    ///
    /// # Errors
    ///
    /// Returns a [`ProcessFailure`] when the child cannot be spawned, its
    /// output cannot be read, the budget elapses, or `cancel` fires. A
    /// non-zero exit is not an error here; callers inspect
    /// [`ToolOutput::status`].
    pub async fn run(self, cancel: &CancellationToken) -> Result<ToolOutput, ProcessFailure> {
        let mut cmd = async_process::Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &self.cwd {
            cmd.current_dir(cwd);
        }

        let started = Instant::now();
        let mut child = cmd.spawn().map_err(ProcessFailure::Spawn)?;
        let stdin = child.stdin.take();
        let input = self.stdin;

        let feed = async move {
            if let Some(mut stdin) = stdin {
                stdin.write_all(&input).await?;
                stdin.close().await?;
            }
            Ok::<(), io::Error>(())
        };

        let exchange = async move {
            let (fed, output) = futures::join!(feed, child.output());
            match fed {
                // The child may exit without reading all of its input.
                Err(e) if e.kind() != io::ErrorKind::BrokenPipe => {
                    warn!(error = %e, "failed to write tool stdin");
                }
                _ => {}
            }
            output
        };

        let output = tokio::select! {
            result = tokio::time::timeout(self.timeout, exchange) => match result {
                Ok(output) => output.map_err(ProcessFailure::Io)?,
                Err(_) => {
                    warn!(
                        program = %self.program.display(),
                        timeout_ms = self.timeout.as_millis(),
                        "tool process timed out, killed"
                    );
                    return Err(ProcessFailure::Timeout(self.timeout));
                }
            },
            () = cancel.cancelled() => {
                debug!(program = %self.program.display(), "tool process cancelled, killed");
                return Err(ProcessFailure::Cancelled);
            }
        };

        debug!(
            program = %self.program.display(),
            status = %output.status,
            elapsed_ms = started.elapsed().as_millis(),
            "tool process finished"
        );

        Ok(ToolOutput {
            status: output.status,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
