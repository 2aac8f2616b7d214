//! TCP health probe for headless debug servers.

use std::time::Duration;

use tokio::net::TcpStream;
use tracing::debug;

/// Whether a TCP connection to `host:port` succeeds within `timeout`.
///
/// The connection is closed immediately; nothing is sent over it.
pub async fn is_reachable(host: &str, port: u16, timeout: Duration) -> bool {
    match tokio::time::timeout(timeout, TcpStream::connect((host, port))).await {
        Ok(Ok(_stream)) => true,
        Ok(Err(err)) => {
            debug!(host, port, %err, "health probe refused");
            false
        }
        Err(_elapsed) => {
            debug!(host, port, ?timeout, "health probe timed out");
            false
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
