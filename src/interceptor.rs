//! Configuration interceptor.
//!
//! Sits in the host's configuration-resolution pipeline for one session
//! type. A request that qualifies (matching type, test mode, positive
//! classification, running server) gets a namespaced side-channel field;
//! everything else is handed back untouched. No error ever escapes: a
//! failed enhancement is indistinguishable from one that was not needed.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::SessionConfig;
use crate::detection::InteractionClassifier;
use crate::models::configuration::{DebugConfiguration, SideChannel};
use crate::orchestrator::launcher::DebugServerLauncher;

/// Configuration Interceptor registered against one debug type.
#[derive(Debug, Clone)]
pub struct ConfigurationInterceptor {
    classifier: Arc<InteractionClassifier>,
    launcher: Arc<DebugServerLauncher>,
    session: SessionConfig,
}

impl ConfigurationInterceptor {
    /// Create an interceptor.
    #[must_use]
    pub fn new(
        classifier: Arc<InteractionClassifier>,
        launcher: Arc<DebugServerLauncher>,
        session: SessionConfig,
    ) -> Self {
        Self {
            classifier,
            launcher,
            session,
        }
    }

    /// Session type this interceptor is registered for.
    #[must_use]
    pub fn debug_type(&self) -> &str {
        &self.session.debug_type
    }

    /// Resolve a debug request, adding the side channel when cross-boundary
    /// debugging applies.
    ///
    /// The returned configuration is either `config` itself or a copy with
    /// exactly one extra field; caller fields are never touched.
    pub async fn resolve(
        &self,
        folder: Option<&Path>,
        config: DebugConfiguration,
        cancel: &CancellationToken,
    ) -> DebugConfiguration {
        let span = info_span!(
            "resolve_configuration",
            name = config.name().unwrap_or_default(),
            mode = config.mode().unwrap_or_default()
        );

        async move {
            if !self.is_eligible(&config) {
                return config;
            }

            let Some(root) = candidate_root(folder, &config) else {
                debug!("no program or workspace folder to classify");
                return config;
            };

            let detection = tokio::select! {
                () = cancel.cancelled() => {
                    debug!("resolution cancelled during classification");
                    return config;
                }
                result = self.classifier.analyze(&root, config.force_requested()) => result,
            };

            if !detection.matched {
                return config;
            }

            let working_directory = if root.is_dir() {
                root.clone()
            } else {
                root.parent().map_or_else(|| root.clone(), Path::to_path_buf)
            };

            let server = tokio::select! {
                () = cancel.cancelled() => {
                    debug!("resolution cancelled during server launch");
                    return config;
                }
                result = self.launcher.ensure_server(&working_directory) => result,
            };

            let server = match server {
                Ok(server) => server,
                Err(err) => {
                    warn!(%err, "debug server unavailable; continuing with a single session");
                    return config;
                }
            };

            let side_channel = SideChannel {
                server,
                correlation_id: Uuid::new_v4().to_string(),
                evidence: detection.evidence_paths,
            };

            match config.with_side_channel(&side_channel) {
                Ok(enhanced) => {
                    info!(
                        address = %side_channel.server.address(),
                        correlation = %side_channel.correlation_id,
                        "request enhanced for cross-boundary debugging"
                    );
                    enhanced
                }
                Err(err) => {
                    warn!(%err, "failed to attach side channel");
                    config
                }
            }
        }
        .instrument(span)
        .await
    }

    fn is_eligible(&self, config: &DebugConfiguration) -> bool {
        if config.debug_type() != Some(self.session.debug_type.as_str()) {
            debug!("different debug type; passing through");
            return false;
        }
        if config.mode() != Some(self.session.test_mode.as_str()) {
            debug!("not a test request; passing through");
            return false;
        }
        if config.side_channel().is_some() || config.nested_marker().is_some() {
            debug!("request already carries orchestrator fields");
            return false;
        }
        true
    }
}

/// Directory or file the classifier should look at.
///
/// A program that cannot be resolved to an existing path falls back to the
/// workspace folder.
fn candidate_root(folder: Option<&Path>, config: &DebugConfiguration) -> Option<PathBuf> {
    match config.program_path(folder) {
        Some(program) if program.exists() => Some(program),
        program => {
            if let Some(raw) = config.get_str("program") {
                debug!(
                    program = raw,
                    resolved = ?program,
                    "program not resolvable; classifying the workspace folder"
                );
            }
            folder.map(Path::to_path_buf)
        }
    }
}
