//! Headless debug server descriptor.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// One live headless debug server.
///
/// A descriptor with `process_id` is owned by the launcher that spawned it.
/// Without `process_id` the server was discovered through the reuse channel
/// and is only ever probed, never stopped.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct ServerDescriptor {
    /// Listening TCP port.
    pub port: u16,
    /// Listening host.
    pub host: String,
    /// OS process id when the server is owned by this orchestrator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_id: Option<u32>,
    /// Directory the server process runs in.
    pub working_directory: PathBuf,
}

impl ServerDescriptor {
    /// Whether this orchestrator spawned the server and may stop it.
    #[must_use]
    pub fn is_owned(&self) -> bool {
        self.process_id.is_some()
    }

    /// `host:port` form handed to the host's attach configuration.
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
