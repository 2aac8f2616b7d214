//! Session records and the per-request hierarchy state machine.

use std::fmt::{Display, Formatter};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::configuration::DebugConfiguration;
use super::server::ServerDescriptor;

/// Role of a tracked debug session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionRole {
    /// Session attached to the program under test.
    Primary,
    /// Session attached to the spawned secondary process.
    Nested,
}

/// Progress of one debug request through the orchestrator.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HierarchyState {
    /// Nothing tracked yet.
    NoSession,
    /// Primary session registered.
    PrimaryStarted,
    /// Nested session requested from the host, identity unknown.
    NestedPending,
    /// Nested session registered against its primary.
    NestedStarted,
    /// Primary terminated and the hierarchy torn down.
    Terminated,
}

impl Display for HierarchyState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoSession => write!(f, "no_session"),
            Self::PrimaryStarted => write!(f, "primary_started"),
            Self::NestedPending => write!(f, "nested_pending"),
            Self::NestedStarted => write!(f, "nested_started"),
            Self::Terminated => write!(f, "terminated"),
        }
    }
}

impl HierarchyState {
    /// Determine whether a transition is permitted.
    ///
    /// `NestedPending → PrimaryStarted` covers a failed nested start and
    /// `NestedStarted → PrimaryStarted` a nested session closed on its own.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::NoSession, Self::PrimaryStarted)
                | (Self::PrimaryStarted, Self::NestedPending)
                | (Self::NestedPending, Self::NestedStarted | Self::PrimaryStarted)
                | (Self::NestedStarted, Self::PrimaryStarted)
                | (
                    Self::PrimaryStarted | Self::NestedPending | Self::NestedStarted,
                    Self::Terminated
                )
        )
    }
}

/// A debug session known to the hierarchy manager.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    /// Host-assigned session identifier.
    pub session_id: String,
    /// Primary or nested.
    pub role: SessionRole,
    /// Owning primary for nested records; always `None` for primaries.
    pub parent_session_id: Option<String>,
    /// Server the hierarchy is attached to.
    pub server: Option<ServerDescriptor>,
    /// Configuration snapshot the session was started with.
    pub request_config: DebugConfiguration,
    /// When the host reported the session as started.
    pub started_at: DateTime<Utc>,
}

impl SessionRecord {
    /// Record for a primary session.
    #[must_use]
    pub fn primary(
        session_id: String,
        server: Option<ServerDescriptor>,
        request_config: DebugConfiguration,
    ) -> Self {
        Self {
            session_id,
            role: SessionRole::Primary,
            parent_session_id: None,
            server,
            request_config,
            started_at: Utc::now(),
        }
    }

    /// Record for a nested session owned by `parent_session_id`.
    #[must_use]
    pub fn nested(
        session_id: String,
        parent_session_id: String,
        server: Option<ServerDescriptor>,
        request_config: DebugConfiguration,
    ) -> Self {
        Self {
            session_id,
            role: SessionRole::Nested,
            parent_session_id: Some(parent_session_id),
            server,
            request_config,
            started_at: Utc::now(),
        }
    }

    /// Whether this is a primary record.
    #[must_use]
    pub fn is_primary(&self) -> bool {
        self.role == SessionRole::Primary
    }
}
