//! Boundary to the host's native debug-session engine.
//!
//! The [`DebugHost`] trait is everything the orchestrator needs from the
//! host: starting and stopping sessions and reading the active-session set.
//! Lifecycle notifications arrive separately as [`HostEvent`]s on a channel
//! the host feeds; the stream includes sessions unrelated to this
//! orchestrator, so consumers filter on their own side-channel fields.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;

use chrono::{DateTime, Utc};

use crate::models::configuration::DebugConfiguration;
use crate::Result;

/// A session as reported by the host.
#[derive(Debug, Clone, PartialEq)]
pub struct HostSession {
    /// Host-assigned identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Parent session id, when the host exposes the linkage.
    pub parent_id: Option<String>,
    /// Workspace folder the session was started in.
    pub workspace_folder: Option<PathBuf>,
    /// Configuration the session was started with.
    pub configuration: DebugConfiguration,
    /// Host-side start time.
    pub started_at: DateTime<Utc>,
}

/// Session lifecycle notifications.
#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
    /// A session finished starting.
    SessionStarted(HostSession),
    /// A session terminated.
    SessionTerminated(HostSession),
}

/// Options for [`DebugHost::start_session`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartOptions {
    /// Session the new one is presented under.
    pub parent_session_id: Option<String>,
}

/// Host operations used by the hierarchy manager.
///
/// `start_session` reports only acceptance; the new session's identity
/// arrives later through a [`HostEvent::SessionStarted`].
pub trait DebugHost: Send + Sync {
    /// Ask the host to start a session.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Host` if the host rejects the request outright.
    fn start_session(
        &self,
        folder: Option<PathBuf>,
        configuration: DebugConfiguration,
        options: StartOptions,
    ) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + '_>>;

    /// Ask the host to stop a session. Stopping an unknown session is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Host` if the request cannot be delivered.
    fn stop_session(&self, session_id: &str)
        -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Snapshot of the sessions currently running in the host.
    fn active_sessions(&self) -> Pin<Box<dyn Future<Output = Vec<HostSession>> + Send + '_>>;
}
