//! Debug server launcher.
//!
//! Guarantees a reachable headless debug server for nested sessions:
//! reuse a live one when possible, otherwise allocate a port, spawn a new
//! server and wait for it to report readiness. Owned servers live in the
//! `active_servers` registry until [`stop_server`](DebugServerLauncher::stop_server),
//! [`stop_all`](DebugServerLauncher::stop_all), or until their process exits
//! and is reaped.
//!
//! Every owned descriptor handed out by `ensure_server` is a reference on the
//! server. The primary session that carries it claims the reference when it
//! starts and releases it when it ends; [`release_server`](DebugServerLauncher::release_server)
//! stops the server only once no claimed reference and no fresh unclaimed
//! handout remains.
//!
//! Concurrent `ensure_server` calls are serialised by a single launch
//! guard, so two requests arriving together can never both allocate and
//! spawn a server.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::time::{Duration, Instant};

use tokio::process::Child;
use tokio::sync::Mutex;
use tracing::{debug, info, info_span, warn, Instrument};

use super::port_allocator;
use super::probe;
use super::spawner::{self, ServerSpawnConfig};
use crate::config::GlobalConfig;
use crate::models::server::ServerDescriptor;
use crate::Result;

/// An owned server, its process handle and who still needs it.
#[derive(Debug)]
struct ActiveServer {
    descriptor: ServerDescriptor,
    child: Child,
    claims: usize,
    unclaimed: VecDeque<Instant>,
}

impl ActiveServer {
    fn hand_out(&mut self) -> ServerDescriptor {
        self.unclaimed.push_back(Instant::now());
        self.descriptor.clone()
    }

    fn expire_handouts(&mut self, window: Duration) {
        self.unclaimed.retain(|at| at.elapsed() < window);
    }

    fn is_referenced(&self) -> bool {
        self.claims > 0 || !self.unclaimed.is_empty()
    }
}

/// Owner of every headless server this orchestrator starts.
#[derive(Debug)]
pub struct DebugServerLauncher {
    spawn: ServerSpawnConfig,
    probe_timeout: Duration,
    shutdown_grace: Duration,
    claim_window: Duration,
    reuse_env_var: String,
    active_servers: Mutex<HashMap<u16, ActiveServer>>,
    reuse_hint: Mutex<Option<u16>>,
    launch_guard: Mutex<()>,
}

impl DebugServerLauncher {
    /// Create a launcher with no running servers.
    #[must_use]
    pub fn new(config: &GlobalConfig) -> Self {
        Self {
            spawn: ServerSpawnConfig::from_config(config),
            probe_timeout: config.server.probe_timeout(),
            shutdown_grace: config.server.shutdown_grace(),
            claim_window: config.server.claim_window(),
            reuse_env_var: config.server.reuse_env_var.clone(),
            active_servers: Mutex::new(HashMap::new()),
            reuse_hint: Mutex::new(None),
            launch_guard: Mutex::new(()),
        }
    }

    /// Return a reachable server, starting one in `working_directory` if needed.
    ///
    /// Order of preference:
    /// 1. the server this launcher started last, if its process is alive and
    ///    it answers the health probe (owned descriptor),
    /// 2. a server advertised through the reuse environment variable that
    ///    answers the probe (unowned descriptor, never stopped here),
    /// 3. a freshly spawned server on a newly allocated port.
    ///
    /// Each owned descriptor returned counts as one unclaimed handout until
    /// a primary session claims it.
    ///
    /// No retry happens here; a failed launch is reported to the caller.
    ///
    /// # Errors
    ///
    /// `AppError::LaunchProcess` or `AppError::LaunchTimeout` when a new
    /// server cannot be started; `AppError::Io` when no port can be bound.
    pub async fn ensure_server(&self, working_directory: &Path) -> Result<ServerDescriptor> {
        let span = info_span!("ensure_server", cwd = %working_directory.display());
        async move {
            let _launch = self.launch_guard.lock().await;

            self.reap_exited().await;

            if let Some(descriptor) = self.reuse_owned().await {
                info!(port = descriptor.port, "reusing owned headless server");
                return Ok(descriptor);
            }

            if let Some(descriptor) = self.reuse_advertised(working_directory).await {
                info!(port = descriptor.port, "reusing advertised headless server");
                return Ok(descriptor);
            }

            let claimed: HashSet<u16> = self.active_servers.lock().await.keys().copied().collect();
            let lease = port_allocator::allocate(&self.spawn.listen_host, &claimed).await?;
            let port = lease.port();
            let spawned = spawner::spawn_server(&self.spawn, lease, working_directory).await?;

            let descriptor = ServerDescriptor {
                port,
                host: self.spawn.listen_host.clone(),
                process_id: Some(spawned.pid),
                working_directory: working_directory.to_path_buf(),
            };

            self.active_servers.lock().await.insert(
                port,
                ActiveServer {
                    descriptor: descriptor.clone(),
                    child: spawned.child,
                    claims: 0,
                    unclaimed: VecDeque::from([Instant::now()]),
                },
            );
            *self.reuse_hint.lock().await = Some(port);

            info!(port, pid = spawned.pid, "registered owned headless server");
            Ok(descriptor)
        }
        .instrument(span)
        .await
    }

    /// Stop an owned server regardless of outstanding references. Ports not
    /// owned by this launcher are ignored.
    ///
    /// Returns whether a server was stopped.
    pub async fn stop_server(&self, port: u16) -> bool {
        let removed = {
            let mut servers = self.active_servers.lock().await;
            servers.remove(&port)
        };

        let Some(server) = removed else {
            debug!(port, "stop requested for unowned or unknown server");
            return false;
        };

        self.retire(port, server).await;
        true
    }

    /// Bind one outstanding handout of `port` to a primary session.
    ///
    /// A primary that claims without a matching handout still counts, so
    /// every claim is balanced by one [`release_server`](Self::release_server).
    pub async fn claim_server(&self, port: u16) {
        let mut servers = self.active_servers.lock().await;
        let Some(server) = servers.get_mut(&port) else {
            debug!(port, "claim for unowned or unknown server");
            return;
        };
        server.unclaimed.pop_front();
        server.claims += 1;
        debug!(port, claims = server.claims, "server claimed by primary session");
    }

    /// Drop one claim on `port` and stop the server once nothing references
    /// it. Unclaimed handouts older than the claim window no longer count.
    ///
    /// Returns whether the server was stopped.
    pub async fn release_server(&self, port: u16) -> bool {
        let removed = {
            let mut servers = self.active_servers.lock().await;
            let Some(server) = servers.get_mut(&port) else {
                debug!(port, "release for unowned or unknown server");
                return false;
            };
            server.claims = server.claims.saturating_sub(1);
            server.expire_handouts(self.claim_window);
            if server.is_referenced() {
                debug!(
                    port,
                    claims = server.claims,
                    unclaimed = server.unclaimed.len(),
                    "server still referenced; keeping it"
                );
                return false;
            }
            servers.remove(&port)
        };

        match removed {
            Some(server) => {
                info!(port, "last reference released; stopping server");
                self.retire(port, server).await;
                true
            }
            None => false,
        }
    }

    async fn retire(&self, port: u16, server: ActiveServer) {
        {
            let mut hint = self.reuse_hint.lock().await;
            if *hint == Some(port) {
                *hint = None;
            }
        }

        terminate(server, self.shutdown_grace).await;
    }

    /// Stop every owned server.
    pub async fn stop_all(&self) {
        let servers: Vec<ActiveServer> = {
            let mut servers = self.active_servers.lock().await;
            servers.drain().map(|(_, server)| server).collect()
        };
        *self.reuse_hint.lock().await = None;

        info!(count = servers.len(), "stopping all owned headless servers");
        for server in servers {
            terminate(server, self.shutdown_grace).await;
        }
    }

    /// Descriptors of all owned servers.
    pub async fn active_descriptors(&self) -> Vec<ServerDescriptor> {
        let servers = self.active_servers.lock().await;
        let mut descriptors: Vec<ServerDescriptor> =
            servers.values().map(|s| s.descriptor.clone()).collect();
        descriptors.sort_by_key(|d| d.port);
        descriptors
    }

    /// Whether `port` belongs to an owned server.
    pub async fn owns_port(&self, port: u16) -> bool {
        self.active_servers.lock().await.contains_key(&port)
    }

    /// Port of the most recently launched owned server, if still registered.
    pub async fn reuse_hint(&self) -> Option<u16> {
        *self.reuse_hint.lock().await
    }

    /// Remove owned servers whose process has already exited.
    pub async fn reap_exited(&self) {
        let mut servers = self.active_servers.lock().await;
        let mut exited = Vec::new();

        for (port, server) in servers.iter_mut() {
            match server.child.try_wait() {
                Ok(Some(status)) => {
                    warn!(port, %status, "owned headless server exited; reaping");
                    exited.push(*port);
                }
                Ok(None) => {}
                Err(err) => {
                    warn!(port, %err, "failed to poll headless server; reaping");
                    exited.push(*port);
                }
            }
        }

        for port in &exited {
            servers.remove(port);
        }
        drop(servers);

        if !exited.is_empty() {
            let mut hint = self.reuse_hint.lock().await;
            if hint.is_some_and(|p| exited.contains(&p)) {
                *hint = None;
            }
        }
    }

    async fn reuse_owned(&self) -> Option<ServerDescriptor> {
        let port = (*self.reuse_hint.lock().await)?;
        let host = {
            let servers = self.active_servers.lock().await;
            servers.get(&port).map(|s| s.descriptor.host.clone())?
        };

        if !probe::is_reachable(&host, port, self.probe_timeout).await {
            debug!(port, "owned server did not answer health probe");
            return None;
        }

        // Stopped while probing: fall through to a fresh launch.
        let mut servers = self.active_servers.lock().await;
        servers.get_mut(&port).map(ActiveServer::hand_out)
    }

    async fn reuse_advertised(&self, working_directory: &Path) -> Option<ServerDescriptor> {
        let raw = std::env::var(&self.reuse_env_var).ok()?;
        let Some((host, port)) = parse_reuse_hint(&raw, &self.spawn.listen_host) else {
            warn!(var = %self.reuse_env_var, value = %raw, "ignoring malformed reuse hint");
            return None;
        };

        if self.owns_port(port).await {
            return None;
        }

        if probe::is_reachable(&host, port, self.probe_timeout).await {
            Some(ServerDescriptor {
                port,
                host,
                process_id: None,
                working_directory: working_directory.to_path_buf(),
            })
        } else {
            debug!(port, "advertised server did not answer health probe");
            None
        }
    }
}

/// Parse a reuse hint of the form `port` or `host:port`.
#[must_use]
pub fn parse_reuse_hint(raw: &str, default_host: &str) -> Option<(String, u16)> {
    let raw = raw.trim();
    let (host, port) = match raw.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() => (host.to_owned(), port),
        Some(_) => return None,
        None => (default_host.to_owned(), raw),
    };
    let port: u16 = port.parse().ok()?;
    (port >= port_allocator::MIN_EPHEMERAL_PORT).then_some((host, port))
}

/// SIGTERM, wait for the grace period, then kill.
async fn terminate(mut server: ActiveServer, grace: Duration) {
    let port = server.descriptor.port;

    if !request_shutdown(&mut server) {
        if let Err(err) = server.child.start_kill() {
            warn!(port, %err, "failed to signal headless server");
        }
    }

    match tokio::time::timeout(grace, server.child.wait()).await {
        Ok(Ok(status)) => info!(port, %status, "headless server stopped"),
        Ok(Err(err)) => warn!(port, %err, "failed to wait for headless server"),
        Err(_) => {
            warn!(port, "headless server ignored shutdown request; killing");
            if let Err(err) = server.child.kill().await {
                warn!(port, %err, "failed to kill headless server");
            }
        }
    }
}

#[cfg(unix)]
fn request_shutdown(server: &mut ActiveServer) -> bool {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Some(raw) = server.child.id().and_then(|id| i32::try_from(id).ok()) else {
        return false;
    };

    match kill(Pid::from_raw(raw), Signal::SIGTERM) {
        Ok(()) => true,
        Err(err) => {
            debug!(port = server.descriptor.port, %err, "SIGTERM failed");
            false
        }
    }
}

#[cfg(not(unix))]
fn request_shutdown(_server: &mut ActiveServer) -> bool {
    false
}

// ── Tests ─────────────────────────────────────────────────
