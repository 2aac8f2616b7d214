//! Global configuration parsing and validation.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::{AppError, Result};

/// User-facing switches honoured by the orchestrator.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct OrchestratorSettings {
    /// When `false`, classification short-circuits to a negative result.
    #[serde(default = "default_true")]
    pub auto_detect: bool,
    /// Explicit headless debug server executable.
    #[serde(default)]
    pub server_path: Option<PathBuf>,
    /// Force cross-boundary debugging for every eligible request.
    #[serde(default)]
    pub force_enabled: Option<bool>,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            auto_detect: true,
            server_path: None,
            force_enabled: None,
        }
    }
}

/// Source scanning bounds for the interaction classifier.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct DetectionConfig {
    /// File-name glob selecting test-like sources.
    #[serde(default = "default_test_file_glob")]
    pub test_file_glob: String,
    /// Directory names never descended into.
    #[serde(default = "default_exclude_dirs")]
    pub exclude_dirs: Vec<String>,
    /// Maximum directory depth below the candidate root.
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    /// Additional module-path substrings treated as import signals.
    #[serde(default)]
    pub extra_import_tokens: Vec<String>,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            test_file_glob: default_test_file_glob(),
            exclude_dirs: default_exclude_dirs(),
            max_depth: default_max_depth(),
            extra_import_tokens: Vec::new(),
        }
    }
}

/// Headless debug server launch settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ServerConfig {
    /// Arguments placed before the fixed headless flags.
    #[serde(default = "default_server_args")]
    pub server_args: Vec<String>,
    /// Interface the server listens on.
    #[serde(default = "default_listen_host")]
    pub listen_host: String,
    /// Substring on the server's output that signals readiness.
    #[serde(default = "default_ready_marker")]
    pub ready_marker: String,
    /// Hard limit for a cold server start.
    #[serde(default = "default_startup_timeout_ms")]
    pub startup_timeout_ms: u64,
    /// TCP connect timeout used by the health probe.
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    /// Grace period between SIGTERM and a forced kill.
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
    /// Environment variable advertising an externally managed server port.
    #[serde(default = "default_reuse_env_var")]
    pub reuse_env_var: String,
    /// How long a handed-out owned server waits for its primary session to
    /// claim it before the handout stops keeping the server alive.
    #[serde(default = "default_claim_window_ms")]
    pub claim_window_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server_args: default_server_args(),
            listen_host: default_listen_host(),
            ready_marker: default_ready_marker(),
            startup_timeout_ms: default_startup_timeout_ms(),
            probe_timeout_ms: default_probe_timeout_ms(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
            reuse_env_var: default_reuse_env_var(),
            claim_window_ms: default_claim_window_ms(),
        }
    }
}

impl ServerConfig {
    /// Startup timeout as a [`Duration`].
    #[must_use]
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    /// Health-probe timeout as a [`Duration`].
    #[must_use]
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    /// Shutdown grace period as a [`Duration`].
    #[must_use]
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    /// Handout claim window as a [`Duration`].
    #[must_use]
    pub fn claim_window(&self) -> Duration {
        Duration::from_millis(self.claim_window_ms)
    }
}

/// Session matching and nested-session settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SessionConfig {
    /// Host session type this orchestrator registers against.
    #[serde(default = "default_debug_type")]
    pub debug_type: String,
    /// Execution mode that is enhanced; any other mode passes through.
    #[serde(default = "default_test_mode")]
    pub test_mode: String,
    /// Prefix for the nested session's display name.
    #[serde(default = "default_nested_name_prefix")]
    pub nested_name_prefix: String,
    /// Delay between active-session polls during identity fallback.
    #[serde(default = "default_identity_poll_interval_ms")]
    pub identity_poll_interval_ms: u64,
    /// Number of active-session polls before giving up.
    #[serde(default = "default_identity_poll_attempts")]
    pub identity_poll_attempts: u32,
    /// How long a terminated primary is remembered for late nested sessions.
    #[serde(default = "default_retired_retention_ms")]
    pub retired_retention_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            debug_type: default_debug_type(),
            test_mode: default_test_mode(),
            nested_name_prefix: default_nested_name_prefix(),
            identity_poll_interval_ms: default_identity_poll_interval_ms(),
            identity_poll_attempts: default_identity_poll_attempts(),
            retired_retention_ms: default_retired_retention_ms(),
        }
    }
}

impl SessionConfig {
    /// Identity poll interval as a [`Duration`].
    #[must_use]
    pub fn identity_poll_interval(&self) -> Duration {
        Duration::from_millis(self.identity_poll_interval_ms)
    }

    /// Retired-primary retention as a [`Duration`].
    #[must_use]
    pub fn retired_retention(&self) -> Duration {
        Duration::from_millis(self.retired_retention_ms)
    }
}

fn default_true() -> bool {
    true
}

fn default_test_file_glob() -> String {
    "*_test.go".into()
}

fn default_exclude_dirs() -> Vec<String> {
    ["vendor", "third_party", "node_modules", ".git", "testdata"]
        .iter()
        .map(|d| (*d).to_owned())
        .collect()
}

fn default_max_depth() -> usize {
    12
}

fn default_server_args() -> Vec<String> {
    vec!["dap".into()]
}

fn default_listen_host() -> String {
    "127.0.0.1".into()
}

fn default_ready_marker() -> String {
    "listening at".into()
}

fn default_startup_timeout_ms() -> u64 {
    5000
}

fn default_probe_timeout_ms() -> u64 {
    1000
}

fn default_shutdown_grace_ms() -> u64 {
    2000
}

fn default_reuse_env_var() -> String {
    "CROSSDEBUG_SERVER_PORT".into()
}

fn default_claim_window_ms() -> u64 {
    120_000
}

fn default_debug_type() -> String {
    "go".into()
}

fn default_test_mode() -> String {
    "test".into()
}

fn default_nested_name_prefix() -> String {
    "Nested: ".into()
}

fn default_identity_poll_interval_ms() -> u64 {
    100
}

fn default_identity_poll_attempts() -> u32 {
    20
}

fn default_retired_retention_ms() -> u64 {
    60_000
}

/// Default server executable when none is configured.
pub const DEFAULT_SERVER_PATH: &str = "dlv";

/// Global configuration parsed from `crossdebug.toml`.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Detection / server-path / force switches.
    #[serde(default)]
    pub orchestrator: OrchestratorSettings,
    /// Classifier scan bounds.
    #[serde(default)]
    pub detection: DetectionConfig,
    /// Headless server launch settings.
    #[serde(default)]
    pub server: ServerConfig,
    /// Session matching settings.
    #[serde(default)]
    pub session: SessionConfig,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Server executable, falling back to [`DEFAULT_SERVER_PATH`].
    #[must_use]
    pub fn server_path(&self) -> PathBuf {
        self.orchestrator
            .server_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SERVER_PATH))
    }

    /// Validate cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` describing the first violated constraint.
    pub fn validate(&self) -> Result<()> {
        if self.server.startup_timeout_ms == 0 {
            return Err(AppError::Config(
                "server.startup_timeout_ms must be greater than zero".into(),
            ));
        }

        if self.server.probe_timeout_ms == 0 {
            return Err(AppError::Config(
                "server.probe_timeout_ms must be greater than zero".into(),
            ));
        }

        if self.server.ready_marker.trim().is_empty() {
            return Err(AppError::Config(
                "server.ready_marker must not be empty".into(),
            ));
        }

        if self.server.reuse_env_var.trim().is_empty() {
            return Err(AppError::Config(
                "server.reuse_env_var must not be empty".into(),
            ));
        }

        glob::Pattern::new(&self.detection.test_file_glob).map_err(|err| {
            AppError::Config(format!(
                "detection.test_file_glob `{}` invalid: {err}",
                self.detection.test_file_glob
            ))
        })?;

        if self.session.debug_type.trim().is_empty() {
            return Err(AppError::Config(
                "session.debug_type must not be empty".into(),
            ));
        }

        if self.session.identity_poll_attempts == 0 {
            return Err(AppError::Config(
                "session.identity_poll_attempts must be greater than zero".into(),
            ));
        }

        Ok(())
    }
}
