//! Headless debug server process spawner.
//!
//! Spawns the server with:
//! - the fixed flags `--headless --accept-multiclient --continue
//!   --listen=<host>:<port>` after any configured leading arguments,
//! - `kill_on_drop(true)` so a dropped handle never leaks a server,
//! - a startup timeout: if the ready marker does not appear on stdout or
//!   stderr within the window, the process is killed and
//!   `AppError::LaunchTimeout` is returned.
//!
//! Once ready, the remaining output is drained in a background task and
//! logged at `debug` level so the pipes never fill up.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tracing::{debug, info, info_span, warn, Instrument};

use super::port_allocator::PortLease;
use crate::config::GlobalConfig;
use crate::{AppError, Result};

type OutputLines<R> = Lines<BufReader<R>>;

/// Settings for spawning one headless server.
#[derive(Debug, Clone)]
pub struct ServerSpawnConfig {
    /// Server executable.
    pub server_path: PathBuf,
    /// Arguments placed before the headless flags.
    pub server_args: Vec<String>,
    /// Interface passed in `--listen`.
    pub listen_host: String,
    /// Output substring that signals readiness.
    pub ready_marker: String,
    /// Maximum time to wait for the ready marker.
    pub startup_timeout: Duration,
}

impl ServerSpawnConfig {
    /// Derive spawn settings from the global configuration.
    #[must_use]
    pub fn from_config(config: &GlobalConfig) -> Self {
        Self {
            server_path: config.server_path(),
            server_args: config.server.server_args.clone(),
            listen_host: config.server.listen_host.clone(),
            ready_marker: config.server.ready_marker.clone(),
            startup_timeout: config.server.startup_timeout(),
        }
    }

    /// Full argument list for a server listening on `port`.
    #[must_use]
    pub fn headless_args(&self, port: u16) -> Vec<String> {
        let mut args = self.server_args.clone();
        args.extend([
            "--headless".to_owned(),
            "--accept-multiclient".to_owned(),
            "--continue".to_owned(),
            format!("--listen={}:{port}", self.listen_host),
        ]);
        args
    }
}

/// A server process that has reported readiness.
#[derive(Debug)]
pub struct SpawnedServer {
    /// Process handle; dropping it kills the server.
    pub child: Child,
    /// OS process id.
    pub pid: u32,
    /// Output line that contained the ready marker.
    pub ready_line: String,
}

/// Spawn a headless server on the leased port and wait for its ready marker.
///
/// # Errors
///
/// - `AppError::LaunchProcess`: spawn failure, or the process exited before
///   printing the marker.
/// - `AppError::LaunchTimeout`: no marker within `startup_timeout`; the
///   process has been killed.
pub async fn spawn_server(
    config: &ServerSpawnConfig,
    lease: PortLease,
    working_directory: &Path,
) -> Result<SpawnedServer> {
    let port = lease.release();
    let span = info_span!(
        "spawn_server",
        port,
        server = %config.server_path.display(),
        cwd = %working_directory.display()
    );

    launch(config, port, working_directory).instrument(span).await
}

async fn launch(
    config: &ServerSpawnConfig,
    port: u16,
    working_directory: &Path,
) -> Result<SpawnedServer> {
    let mut cmd = Command::new(&config.server_path);
    cmd.args(config.headless_args(port))
        .current_dir(working_directory)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .map_err(|err| AppError::LaunchProcess(format!("failed to spawn server: {err}")))?;

    let pid = child
        .id()
        .ok_or_else(|| AppError::LaunchProcess("server exited immediately".into()))?;
    let stdout_raw = child
        .stdout
        .take()
        .ok_or_else(|| AppError::LaunchProcess("failed to capture server stdout".into()))?;
    let stderr_raw = child
        .stderr
        .take()
        .ok_or_else(|| AppError::LaunchProcess("failed to capture server stderr".into()))?;

    let mut stdout = BufReader::new(stdout_raw).lines();
    let mut stderr = BufReader::new(stderr_raw).lines();

    let outcome = tokio::time::timeout(
        config.startup_timeout,
        wait_for_marker(&mut child, &mut stdout, &mut stderr, &config.ready_marker),
    )
    .await;

    let ready_line = match outcome {
        Ok(Ok(line)) => line,
        Ok(Err(err)) => {
            child.kill().await.ok();
            return Err(err);
        }
        Err(_elapsed) => {
            child.kill().await.ok();
            return Err(AppError::LaunchTimeout(format!(
                "server did not report `{}` within {:?}",
                config.ready_marker, config.startup_timeout
            )));
        }
    };

    info!(pid, ready_line = ready_line.trim(), "headless server ready");
    tokio::spawn(drain_output(port, stdout, stderr));

    Ok(SpawnedServer {
        child,
        pid,
        ready_line,
    })
}

/// Read both output streams until one line contains `marker`.
async fn wait_for_marker(
    child: &mut Child,
    stdout: &mut OutputLines<ChildStdout>,
    stderr: &mut OutputLines<ChildStderr>,
    marker: &str,
) -> Result<String> {
    let mut stdout_open = true;
    let mut stderr_open = true;

    loop {
        tokio::select! {
            line = stdout.next_line(), if stdout_open => match line {
                Ok(Some(line)) if line.contains(marker) => return Ok(line),
                Ok(Some(line)) => debug!(line = %line, "server stdout before ready"),
                Ok(None) => stdout_open = false,
                Err(err) => {
                    warn!(%err, "failed to read server stdout");
                    stdout_open = false;
                }
            },
            line = stderr.next_line(), if stderr_open => match line {
                Ok(Some(line)) if line.contains(marker) => return Ok(line),
                Ok(Some(line)) => debug!(line = %line, "server stderr before ready"),
                Ok(None) => stderr_open = false,
                Err(err) => {
                    warn!(%err, "failed to read server stderr");
                    stderr_open = false;
                }
            },
            status = child.wait() => {
                let reason = match status {
                    Ok(status) => status.code().map_or_else(
                        || "terminated by signal".to_owned(),
                        |c| format!("exited with code {c}"),
                    ),
                    Err(err) => format!("wait error: {err}"),
                };
                return Err(AppError::LaunchProcess(format!(
                    "server {reason} before ready signal"
                )));
            }
        }
    }
}

/// Forward post-ready output to the log until both streams close.
async fn drain_output(
    port: u16,
    mut stdout: OutputLines<ChildStdout>,
    mut stderr: OutputLines<ChildStderr>,
) {
    let mut stdout_open = true;
    let mut stderr_open = true;

    while stdout_open || stderr_open {
        tokio::select! {
            line = stdout.next_line(), if stdout_open => match line {
                Ok(Some(line)) => debug!(target: "crossdebug::server_output", port, line = %line),
                _ => stdout_open = false,
            },
            line = stderr.next_line(), if stderr_open => match line {
                Ok(Some(line)) => debug!(target: "crossdebug::server_output", port, line = %line),
                _ => stderr_open = false,
            },
        }
    }

    debug!(port, "server output closed");
}

// ── Tests ─────────────────────────────────────────────────────────────────────
