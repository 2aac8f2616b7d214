//! Session orchestration.
//!
//! Owns the long-lived pieces (server launcher, hierarchy manager, host
//! event loop) and ties their lifetime to [`Orchestrator::activate`] /
//! [`Orchestrator::deactivate`] rather than to any single request.

pub mod event_monitor;
pub mod identity;
pub mod launcher;
pub mod port_allocator;
pub mod probe;
pub mod session_manager;
pub mod spawner;

use std::path::Path;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::GlobalConfig;
use crate::detection::InteractionClassifier;
use crate::host::{DebugHost, HostEvent};
use crate::interceptor::ConfigurationInterceptor;
use crate::models::configuration::DebugConfiguration;
use crate::Result;

use self::launcher::DebugServerLauncher;
use self::session_manager::SessionHierarchyManager;

/// Cross-boundary debug session orchestrator.
#[derive(Debug)]
pub struct Orchestrator {
    config: Arc<GlobalConfig>,
    launcher: Arc<DebugServerLauncher>,
    interceptor: ConfigurationInterceptor,
    manager: SessionHierarchyManager,
    cancel: CancellationToken,
}

impl Orchestrator {
    /// Wire the components against `host`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the configuration is invalid.
    pub fn new(config: GlobalConfig, host: Arc<dyn DebugHost>) -> Result<Self> {
        config.validate()?;

        let classifier = Arc::new(InteractionClassifier::new(
            &config.orchestrator,
            &config.detection,
        )?);
        let launcher = Arc::new(DebugServerLauncher::new(&config));
        let interceptor = ConfigurationInterceptor::new(
            classifier,
            Arc::clone(&launcher),
            config.session.clone(),
        );
        let manager =
            SessionHierarchyManager::new(host, Arc::clone(&launcher), config.session.clone());

        Ok(Self {
            config: Arc::new(config),
            launcher,
            interceptor,
            manager,
            cancel: CancellationToken::new(),
        })
    }

    /// Session type the interceptor is registered for.
    #[must_use]
    pub fn debug_type(&self) -> &str {
        self.interceptor.debug_type()
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &GlobalConfig {
        &self.config
    }

    /// Configuration-resolution hook. Never fails; see
    /// [`ConfigurationInterceptor::resolve`].
    pub async fn resolve_configuration(
        &self,
        folder: Option<&Path>,
        config: DebugConfiguration,
    ) -> DebugConfiguration {
        let request = self.cancel.child_token();
        self.interceptor.resolve(folder, config, &request).await
    }

    /// Start consuming host session events.
    #[must_use]
    pub fn activate(&self, events: mpsc::Receiver<HostEvent>) -> JoinHandle<()> {
        info!(debug_type = %self.debug_type(), "orchestrator activated");
        event_monitor::spawn_event_monitor(self.manager.clone(), events, self.cancel.clone())
    }

    /// Stop the event loop, abandon in-flight resolutions and stop every
    /// owned server.
    pub async fn deactivate(&self) {
        self.cancel.cancel();
        self.launcher.stop_all().await;
        info!("orchestrator deactivated");
    }

    /// Hierarchy manager handle.
    #[must_use]
    pub fn manager(&self) -> &SessionHierarchyManager {
        &self.manager
    }

    /// Server launcher handle.
    #[must_use]
    pub fn launcher(&self) -> &Arc<DebugServerLauncher> {
        &self.launcher
    }
}
