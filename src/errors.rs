//! Error types shared across the orchestrator.

use std::fmt::{Display, Formatter};

/// Shared orchestrator result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Orchestrator error enumeration covering all domain failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Source scan failure; recovered locally by the classifier.
    Detection(String),
    /// Headless server did not report readiness within the startup window.
    LaunchTimeout(String),
    /// Headless server could not be spawned or exited before it was ready.
    LaunchProcess(String),
    /// The host refused or failed to start the nested session.
    NestedSessionStart(String),
    /// Nested-session identity could not be resolved unambiguously.
    IdentityResolution(String),
    /// Host-side operation failure.
    Host(String),
    /// File-system, socket or process I/O failure.
    Io(String),
    /// Requested entity does not exist.
    NotFound(String),
}

impl AppError {
    /// Whether this error belongs to the "launch failed" family that callers
    /// treat uniformly.
    #[must_use]
    pub fn is_launch_failure(&self) -> bool {
        matches!(self, Self::LaunchTimeout(_) | Self::LaunchProcess(_))
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Detection(msg) => write!(f, "detection: {msg}"),
            Self::LaunchTimeout(msg) => write!(f, "launch failed: timeout: {msg}"),
            Self::LaunchProcess(msg) => write!(f, "launch failed: {msg}"),
            Self::NestedSessionStart(msg) => write!(f, "nested session start: {msg}"),
            Self::IdentityResolution(msg) => write!(f, "identity resolution: {msg}"),
            Self::Host(msg) => write!(f, "host: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Config(format!("invalid json: {err}"))
    }
}
