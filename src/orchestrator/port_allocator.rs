//! Ephemeral port allocation for headless debug servers.
//!
//! Ports come from the OS: bind a transient listener to port 0, read back
//! the assigned port and hand it out as a [`PortLease`]. The lease is
//! released right before the server is spawned, so a small window exists in
//! which another process could take the port; a launch that loses that race
//! fails and the next request allocates again.

use std::collections::HashSet;

use tokio::net::TcpListener;
use tracing::debug;

use crate::{AppError, Result};

/// Lowest port ever handed out.
pub const MIN_EPHEMERAL_PORT: u16 = 1025;
/// Bind attempts before giving up on finding an unclaimed port.
const MAX_ALLOCATION_ATTEMPTS: usize = 8;

/// A port reserved by a live transient listener.
#[derive(Debug)]
pub struct PortLease {
    port: u16,
    listener: TcpListener,
}

impl PortLease {
    /// The reserved port.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Close the transient listener so the server can bind the port.
    pub fn release(self) -> u16 {
        let port = self.port;
        drop(self.listener);
        debug!(port, "port lease released");
        port
    }
}

/// Allocate a fresh port on `host`, skipping any port in `claimed`.
///
/// Rejected listeners are held until allocation finishes so the OS cannot
/// hand the same port back on the next attempt.
///
/// # Errors
///
/// Returns `AppError::Io` if binding fails, or `AppError::LaunchProcess` if
/// no acceptable port turns up within the attempt budget.
pub async fn allocate(host: &str, claimed: &HashSet<u16>) -> Result<PortLease> {
    let mut rejected = Vec::new();

    for _ in 0..MAX_ALLOCATION_ATTEMPTS {
        let listener = TcpListener::bind((host, 0))
            .await
            .map_err(|err| AppError::Io(format!("failed to bind {host}:0: {err}")))?;
        let port = listener
            .local_addr()
            .map_err(|err| AppError::Io(format!("failed to read bound address: {err}")))?
            .port();

        if port >= MIN_EPHEMERAL_PORT && !claimed.contains(&port) {
            debug!(port, "port allocated");
            return Ok(PortLease { port, listener });
        }

        debug!(port, "rejecting claimed or privileged port");
        rejected.push(listener);
    }

    Err(AppError::LaunchProcess(format!(
        "no free port found on {host} after {MAX_ALLOCATION_ATTEMPTS} attempts"
    )))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
