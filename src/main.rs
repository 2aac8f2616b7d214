#![forbid(unsafe_code)]

//! `crossdebug` command-line front end for the orchestrator components.
//!
//! Runs the classifier against a source tree, launches and holds a headless
//! debug server until interrupted, or probes a server address.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use crossdebug::config::GlobalConfig;
use crossdebug::detection::InteractionClassifier;
use crossdebug::orchestrator::launcher::DebugServerLauncher;
use crossdebug::orchestrator::probe;
use crossdebug::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "crossdebug", about = "Cross-boundary debug session orchestrator", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file. Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Classify a program file or directory and print the detection result.
    Detect {
        /// Program file or package directory.
        path: PathBuf,
        /// Skip scanning and report a forced match.
        #[arg(long)]
        force: bool,
    },
    /// Ensure a headless debug server, print its descriptor and hold it
    /// until interrupted.
    Launch {
        /// Working directory for the server process.
        #[arg(long)]
        workdir: Option<PathBuf>,
    },
    /// Check whether a debug server accepts connections.
    Probe {
        /// Server host.
        host: String,
        /// Server port.
        port: u16,
        /// Connect timeout in milliseconds; defaults to `server.probe_timeout_ms`.
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let config = match &args.config {
        Some(path) => GlobalConfig::load_from_path(path)?,
        None => GlobalConfig::default(),
    };
    info!("configuration loaded");

    match args.command {
        Command::Detect { path, force } => {
            let classifier = InteractionClassifier::new(&config.orchestrator, &config.detection)?;
            let result = classifier.analyze(&path, force.then_some(true)).await;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Command::Launch { workdir } => {
            let workdir = match workdir {
                Some(dir) => dir,
                None => std::env::current_dir()
                    .map_err(|err| AppError::Io(format!("cannot read current dir: {err}")))?,
            };

            let launcher = DebugServerLauncher::new(&config);
            let descriptor = launcher.ensure_server(&workdir).await?;
            println!("{}", serde_json::to_string_pretty(&descriptor)?);

            // ── Wait for shutdown signal ────────────────────────
            shutdown_signal().await;
            info!("shutdown signal received");
            launcher.stop_all().await;
        }
        Command::Probe {
            host,
            port,
            timeout_ms,
        } => {
            let timeout = timeout_ms.map_or_else(|| config.server.probe_timeout(), Duration::from_millis);
            if probe::is_reachable(&host, port, timeout).await {
                println!("{host}:{port} reachable");
            } else {
                warn!(%host, port, "server unreachable");
                return Err(AppError::NotFound(format!("{host}:{port} is not reachable")));
            }
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter).with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
