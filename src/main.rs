//! Pytools Engine - Entry Point
//!
//! This is the main entry point for the pytools-engine binary.
//! It sets up logging, parses arguments, and either runs the engine or talks
//! to a running one.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::{Level, info, warn};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use pytools_engine::client::{self, EngineClient};
use pytools_engine::config::{DEFAULT_CONFIG_FILE, EngineConfig};
use pytools_engine::environment::{InterpreterKind, InterpreterSelection};
use pytools_engine::server::{Engine, LifecycleState};

/// How long `serve` waits for an existing engine to answer.
const PING_TIMEOUT: Duration = Duration::from_millis(500);

/// Background engine serving Python code intelligence to editors.
#[derive(Parser, Debug)]
#[command(name = "pytools-engine")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// JSON settings file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Engine host.
    #[arg(long, global = true)]
    host: Option<String>,

    /// Engine port.
    #[arg(long, global = true)]
    port: Option<u16>,

    /// Log level: trace, debug, info, warn, error.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Directory for daily-rolling JSON log files.
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the engine in the foreground.
    Serve(ServeArgs),
    /// Check whether an engine is running.
    Ping,
    /// Ask a running engine to shut down.
    Shutdown,
    /// Send one request to a running engine and print the response.
    Request {
        /// Method name, e.g. `format.run`.
        method: String,
        /// Params as a JSON document.
        #[arg(long)]
        params: Option<String>,
    },
    /// Manage the settings file.
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(clap::Args, Debug)]
struct ServeArgs {
    /// Interpreter executable, or `auto`.
    #[arg(long)]
    interpreter: Option<InterpreterSelection>,

    /// Restrict auto-detection to conda, venv or system.
    #[arg(long)]
    kind: Option<InterpreterKind>,

    /// Project root directory.
    #[arg(long)]
    root: Option<PathBuf>,

    /// Time budget of one tool invocation, in milliseconds.
    #[arg(long)]
    tool_timeout_ms: Option<u64>,

    /// Concurrent tool invocations.
    #[arg(long)]
    max_workers: Option<usize>,

    /// Formatter line length.
    #[arg(long)]
    line_length: Option<u32>,
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Write a settings file with default values.
    Init {
        /// Where to write it.
        #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
        path: PathBuf,
    },
}

impl Args {
    /// Parses the log level string into a tracing Level.
    fn parse_log_level(&self) -> Result<Level> {
        match self.log_level.to_lowercase().as_str() {
            "trace" => Ok(Level::TRACE),
            "debug" => Ok(Level::DEBUG),
            "info" => Ok(Level::INFO),
            "warn" => Ok(Level::WARN),
            "error" => Ok(Level::ERROR),
            other => anyhow::bail!("invalid log level: {}", other),
        }
    }

    /// Builds the effective configuration: defaults, then the settings
    /// file, then flags.
    fn load_config(&self) -> Result<EngineConfig> {
        let mut config = match &self.config {
            Some(path) => EngineConfig::from_file(path)?,
            None => EngineConfig::default(),
        };
        if let Some(host) = &self.host {
            config.host.clone_from(host);
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Command::Serve(serve) = &self.command {
            serve.apply(&mut config);
        }
        config.validate()?;
        Ok(config)
    }
}

impl ServeArgs {
    fn apply(&self, config: &mut EngineConfig) {
        if let Some(interpreter) = &self.interpreter {
            config.interpreter = interpreter.clone();
        }
        if let Some(kind) = self.kind {
            config.kind = Some(kind);
        }
        if let Some(root) = &self.root {
            config.root.clone_from(root);
        }
        if let Some(timeout) = self.tool_timeout_ms {
            config.tool_timeout_ms = timeout;
        }
        if let Some(workers) = self.max_workers {
            config.max_workers = workers;
        }
        if self.line_length.is_some() {
            config.line_length = self.line_length;
        }
    }
}

/// Initializes the tracing subscriber for logging.
fn init_tracing(level: Level, log_dir: Option<&Path>) -> Result<()> {
    // Create an env filter that respects RUST_LOG but has a default level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("pytools_engine={level}")));

    // Optional structured log file, rotated daily
    let file_layer = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create log directory {}", dir.display()))?;
            let appender = RollingFileAppender::new(Rotation::DAILY, dir, "pytools-engine.log");
            Some(
                fmt::layer()
                    .with_writer(appender)
                    .with_ansi(false)
                    .with_target(true)
                    .with_file(true)
                    .with_line_number(true)
                    .with_thread_ids(true)
                    .json(),
            )
        }
        None => None,
    };

    // Logs go to stderr; stdout carries command output
    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(true)
                .with_target(true)
                .with_thread_ids(false)
                .with_file(true)
                .with_line_number(true),
        )
        .with(file_layer)
        .try_init()
        .context("failed to initialize tracing subscriber")?;

    Ok(())
}

/// Resolves on Ctrl-C, or SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received ctrl-c"),
        () = terminate => info!("received SIGTERM"),
    }
}

async fn serve(mut config: EngineConfig) -> Result<ExitCode> {
    let address = config.address();
    if client::ping(&address, PING_TIMEOUT).await {
        info!(address = %address, "engine already running, reusing it");
        return Ok(ExitCode::SUCCESS);
    }

    // Canonicalize the project root
    config.root = config.root.canonicalize().with_context(|| {
        format!("failed to canonicalize project root: {}", config.root.display())
    })?;

    info!(
        address = %address,
        root = %config.root.display(),
        interpreter = %String::from(config.interpreter.clone()),
        max_workers = config.max_workers,
        "starting pytools engine"
    );

    let engine = Engine::bind(config)
        .await
        .with_context(|| format!("failed to bind {address}"))?;

    let lifecycle = engine.lifecycle();
    tokio::spawn(async move {
        tokio::select! {
            () = shutdown_signal() => {
                lifecycle.transition(LifecycleState::ShuttingDown);
            }
            () = lifecycle.reached(LifecycleState::Stopped) => {}
        }
    });

    engine.run().await.context("engine failed")?;
    info!("engine shut down gracefully");
    Ok(ExitCode::SUCCESS)
}

async fn request(address: &str, method: &str, params: Value) -> Result<ExitCode> {
    let mut client = EngineClient::connect(address)
        .await
        .with_context(|| format!("no engine answering at {address}"))?;
    let response = client
        .call(method, params)
        .await
        .with_context(|| format!("{method} request failed"))?;

    println!(
        "{}",
        serde_json::to_string_pretty(&response).context("failed to render response")?
    );
    Ok(if response.error().is_some() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

/// Main entry point.
#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Parse command-line arguments
    let args = Args::parse();

    // Initialize tracing
    let log_level = args.parse_log_level()?;
    init_tracing(log_level, args.log_file.as_deref())?;

    if let Command::Config(ConfigCommand::Init { path }) = &args.command {
        EngineConfig::write_default(path)?;
        println!("✓ Wrote default settings to {}", path.display());
        return Ok(ExitCode::SUCCESS);
    }

    let config = args.load_config()?;
    let address = config.address();

    match args.command {
        Command::Serve(_) => serve(config).await,
        Command::Ping => {
            if client::ping(&address, PING_TIMEOUT).await {
                println!("engine running at {address}");
                Ok(ExitCode::SUCCESS)
            } else {
                println!("no engine at {address}");
                Ok(ExitCode::FAILURE)
            }
        }
        Command::Shutdown => request(&address, "shutdown", Value::Null).await,
        Command::Request { method, params } => {
            let params = match params {
                Some(raw) => serde_json::from_str(&raw).context("--params is not valid JSON")?,
                None => Value::Null,
            };
            request(&address, &method, params).await
        }
        Command::Config(_) => Ok(ExitCode::SUCCESS),
    }
}
