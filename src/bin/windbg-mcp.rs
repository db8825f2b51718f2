//! windbg-mcp - crash dump analysis tools for AI agents
//!
//! Speaks JSON lines on stdin/stdout: one tool-call request per line in,
//! one response per line out. Each session drives its own cdb.exe.
//!
//! # Usage
//!
//! ```bash
//! # Defaults: cdb from the Windows SDK, 30s command timeout
//! windbg-mcp
//!
//! # Explicit debugger and symbol path
//! windbg-mcp --cdb-path "C:\Debuggers\cdb.exe" --symbols-path "srv*C:\symbols"
//!
//! # Settings from a file, debug logging mirrored to stderr
//! windbg-mcp --config windbg-mcp.toml --verbose
//! ```
//!
//! Logs go to a file (stdout is the protocol channel), by default
//! `<local data dir>/windbg-mcp/windbg-mcp.log`. `RUST_LOG` adds directives.
//!
//! # Signal Handling
//!
//! - SIGTERM/SIGINT (Ctrl+C on Windows): close every session, then exit
//! - End of stdin: same

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::BufReader;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

use wdbgd::config::ServerConfig;
use wdbgd::registry::spawn_registry;
use wdbgd::server::ToolServer;
use wdbgd::tools::Tools;

// ============================================================================
// CLI Arguments
// ============================================================================

/// Crash dump analysis tool server driving cdb.exe
#[derive(Parser, Debug)]
#[command(name = "windbg-mcp", version, about)]
struct Args {
    /// TOML configuration file
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Path to cdb.exe (default: search standard install locations)
    #[arg(long, value_name = "PATH")]
    cdb_path: Option<PathBuf>,

    /// Symbol search path passed to cdb with -y
    #[arg(long, value_name = "PATH")]
    symbols_path: Option<String>,

    /// Default command timeout in seconds
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    /// Seconds a debugger may take to load its target
    #[arg(long, value_name = "SECS")]
    startup_timeout: Option<u64>,

    /// Close sessions idle for this many seconds
    #[arg(long, value_name = "SECS")]
    idle_timeout: Option<u64>,

    /// Maximum concurrent sessions
    #[arg(long, value_name = "N")]
    max_sessions: Option<usize>,

    /// Extra argument for every cdb launch (repeatable)
    #[arg(long = "cdb-arg", value_name = "ARG", allow_hyphen_values = true)]
    cdb_args: Vec<String>,

    /// Log file (default: <local data dir>/windbg-mcp/windbg-mcp.log)
    #[arg(long, value_name = "FILE")]
    log_file: Option<PathBuf>,

    /// Debug logging, also written to stderr
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    /// Loads the config file, then applies command-line overrides.
    fn into_config(self) -> Result<(ServerConfig, Option<PathBuf>)> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::load(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?,
            None => ServerConfig::default(),
        };

        if self.cdb_path.is_some() {
            config.cdb_path = self.cdb_path;
        }
        if self.symbols_path.is_some() {
            config.symbols_path = self.symbols_path;
        }
        if let Some(secs) = self.timeout {
            config.command_timeout_secs = secs;
        }
        if let Some(secs) = self.startup_timeout {
            config.startup_timeout_secs = secs;
        }
        if let Some(secs) = self.idle_timeout {
            config.idle_timeout_secs = secs;
        }
        if let Some(n) = self.max_sessions {
            config.max_sessions = n;
        }
        config.extra_args.extend(self.cdb_args);
        config.verbose |= self.verbose;

        config.validate().context("Invalid settings")?;
        Ok((config, self.log_file))
    }
}

// ============================================================================
// Logging
// ============================================================================

/// Returns the default path to the log file.
fn default_log_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("windbg-mcp")
        .join("windbg-mcp.log")
}

/// Initializes file logging. Never writes to stdout.
fn init_logging(log_path: &Path, verbose: bool) {
    let default_directive = if verbose {
        "wdbgd=debug,windbg_mcp=debug"
    } else {
        "wdbgd=info,windbg_mcp=info"
    };
    let mut filter = EnvFilter::from_default_env();
    for directive in default_directive.split(',') {
        if let Ok(d) = directive.parse() {
            filter = filter.add_directive(d);
        }
    }

    let file = log_path
        .parent()
        .map_or(Ok(()), fs::create_dir_all)
        .and_then(|()| OpenOptions::new().create(true).append(true).open(log_path));

    match (file, verbose) {
        (Ok(file), true) => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(Mutex::new(file).and(std::io::stderr))
            .with_ansi(false)
            .init(),
        (Ok(file), false) => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(Mutex::new(file))
            .with_ansi(false)
            .init(),
        (Err(e), _) => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
            error!(path = %log_path.display(), error = %e, "Cannot open log file, logging to stderr");
        }
    }
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let (config, log_file) = Args::parse().into_config()?;
    let log_path = log_file.unwrap_or_else(default_log_path);
    init_logging(&log_path, config.verbose);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        log = %log_path.display(),
        "windbg-mcp starting"
    );

    let cancel_token = CancellationToken::new();
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!(error = %e, "Error waiting for shutdown signal");
            return;
        }
        info!("Shutdown signal received");
        shutdown_token.cancel();
    });

    let registry = spawn_registry(config.registry_config());
    let tools = Tools::new(registry.clone(), config.command_timeout());
    let server = ToolServer::new(tools, cancel_token);

    let result = server
        .run(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
        .await;

    registry.shutdown().await;
    result.context("Tool server failed")?;

    info!("windbg-mcp stopped");
    Ok(())
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}
