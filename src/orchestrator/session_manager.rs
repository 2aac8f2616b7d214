//! Session hierarchy management.
//!
//! Tracks primary sessions that carry a side-channel payload, starts their
//! nested sessions against the launched server, links nested identities as
//! they become known and tears the hierarchy down when the primary ends.
//!
//! All bookkeeping lives in one [`SessionTable`] behind a single mutex.
//! Every check-then-write happens under one guard; host calls are made only
//! after the guard is dropped.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::identity::{self, Linkage, PendingNested};
use super::launcher::DebugServerLauncher;
use crate::config::SessionConfig;
use crate::host::{DebugHost, HostEvent, HostSession, StartOptions};
use crate::models::configuration::{DebugConfiguration, NestedMarker, SideChannel};
use crate::models::session::{HierarchyState, SessionRecord};
use crate::{AppError, Result};

/// One primary and whatever nested state hangs off it.
#[derive(Debug, Clone)]
struct Hierarchy {
    primary: SessionRecord,
    state: HierarchyState,
    pending: Option<PendingNested>,
    nested: Option<SessionRecord>,
}

impl Hierarchy {
    fn transition(&mut self, next: HierarchyState) {
        if self.state.can_transition_to(next) {
            debug!(
                primary = %self.primary.session_id,
                from = %self.state,
                to = %next,
                "hierarchy transition"
            );
            self.state = next;
        } else {
            warn!(
                primary = %self.primary.session_id,
                from = %self.state,
                to = %next,
                "ignoring invalid hierarchy transition"
            );
        }
    }
}

/// Primary-keyed hierarchy table plus the nested → primary index.
///
/// `retired` remembers terminated primaries for a bounded time so that a
/// nested session arriving after its primary is recognised and stopped.
#[derive(Debug, Default)]
struct SessionTable {
    hierarchies: HashMap<String, Hierarchy>,
    nested_to_primary: HashMap<String, String>,
    retired: HashMap<String, Instant>,
}

impl SessionTable {
    fn retire(&mut self, primary_id: String, retention: Duration) {
        self.retired.retain(|_, at| at.elapsed() < retention);
        self.retired.insert(primary_id, Instant::now());
    }

    fn is_retired(&self, primary_id: &str) -> bool {
        self.retired.contains_key(primary_id)
    }

    fn is_tracked(&self, session_id: &str) -> bool {
        self.hierarchies.contains_key(session_id) || self.nested_to_primary.contains_key(session_id)
    }

    fn tracked_ids(&self) -> HashSet<String> {
        self.hierarchies
            .keys()
            .chain(self.nested_to_primary.keys())
            .cloned()
            .collect()
    }

    fn pending(&self) -> impl Iterator<Item = &PendingNested> {
        self.hierarchies.values().filter_map(|h| h.pending.as_ref())
    }

    fn is_pending(&self, pending: &PendingNested) -> bool {
        self.hierarchies
            .get(&pending.primary_id)
            .and_then(|h| h.pending.as_ref())
            .is_some_and(|p| p.correlation_id == pending.correlation_id)
    }

    /// Attach `session` as the nested record of `primary_id`.
    fn register_nested(&mut self, primary_id: &str, session: &HostSession) -> bool {
        let Some(hierarchy) = self.hierarchies.get_mut(primary_id) else {
            return false;
        };
        if hierarchy.state != HierarchyState::NestedPending {
            return false;
        }

        hierarchy.nested = Some(SessionRecord::nested(
            session.id.clone(),
            primary_id.to_owned(),
            hierarchy.primary.server.clone(),
            session.configuration.clone(),
        ));
        hierarchy.pending = None;
        hierarchy.transition(HierarchyState::NestedStarted);
        self.nested_to_primary
            .insert(session.id.clone(), primary_id.to_owned());
        true
    }

    /// Primary a late or duplicate nested session claims to belong to.
    fn claimed_parent(&self, session: &HostSession) -> Option<String> {
        session
            .configuration
            .nested_marker()
            .map(|m| m.parent_session_id)
            .or_else(|| {
                session
                    .parent_id
                    .clone()
                    .filter(|p| self.is_retired(p) || self.hierarchies.contains_key(p))
            })
    }
}

/// Session Hierarchy Manager.
///
/// Cheap to clone; clones share the same table.
#[derive(Clone)]
pub struct SessionHierarchyManager {
    host: Arc<dyn DebugHost>,
    launcher: Arc<DebugServerLauncher>,
    session: SessionConfig,
    table: Arc<Mutex<SessionTable>>,
}

impl std::fmt::Debug for SessionHierarchyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHierarchyManager")
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

impl SessionHierarchyManager {
    /// Create a manager with an empty table.
    #[must_use]
    pub fn new(
        host: Arc<dyn DebugHost>,
        launcher: Arc<DebugServerLauncher>,
        session: SessionConfig,
    ) -> Self {
        Self {
            host,
            launcher,
            session,
            table: Arc::new(Mutex::new(SessionTable::default())),
        }
    }

    /// Dispatch one host event.
    ///
    /// Returns the handle of the nested-start task when the event registered
    /// a new primary.
    pub async fn handle_event(&self, event: HostEvent) -> Option<JoinHandle<()>> {
        match event {
            HostEvent::SessionStarted(session) => self.on_session_started(session).await,
            HostEvent::SessionTerminated(session) => {
                self.on_session_terminated(&session).await;
                None
            }
        }
    }

    /// React to a started session.
    ///
    /// Sessions without a side channel that are not nested sessions we asked
    /// for are ignored.
    pub async fn on_session_started(&self, session: HostSession) -> Option<JoinHandle<()>> {
        let span = info_span!("session_started", session_id = %session.id, name = %session.name);

        async move {
            let mut orphan = None;
            {
                let mut table = self.table.lock().await;

                if table.is_tracked(&session.id) {
                    debug!("session already tracked");
                    return None;
                }

                let linked = identity::match_event(&session, table.pending())
                    .map(|(p, linkage)| (p.primary_id.clone(), linkage));
                if let Some((primary_id, linkage)) = linked {
                    if table.register_nested(&primary_id, &session) {
                        info!(primary = %primary_id, ?linkage, "nested session registered");
                        return None;
                    }
                }

                if let Some(parent) = table.claimed_parent(&session) {
                    if table.is_retired(&parent) || !table.hierarchies.contains_key(&parent) {
                        orphan = Some(parent);
                    } else {
                        warn!(
                            primary = %parent,
                            "primary already has a nested session; ignoring extra candidate"
                        );
                        return None;
                    }
                }
            }

            if let Some(parent) = orphan {
                warn!(primary = %parent, "nested session outlived its primary; stopping");
                if let Err(err) = self.host.stop_session(&session.id).await {
                    warn!(%err, "failed to stop orphaned nested session");
                }
                return None;
            }

            let side_channel = session.configuration.side_channel()?;
            self.register_primary(session, side_channel).await
        }
        .instrument(span)
        .await
    }

    /// React to a terminated session.
    pub async fn on_session_terminated(&self, session: &HostSession) {
        let span = info_span!("session_terminated", session_id = %session.id);

        async {
            let mut table = self.table.lock().await;

            if let Some(mut hierarchy) = table.hierarchies.remove(&session.id) {
                hierarchy.transition(HierarchyState::Terminated);
                if let Some(nested) = &hierarchy.nested {
                    table.nested_to_primary.remove(&nested.session_id);
                }
                table.retire(session.id.clone(), self.session.retired_retention());
                drop(table);

                let owned_port = hierarchy
                    .primary
                    .server
                    .as_ref()
                    .filter(|s| s.is_owned())
                    .map(|s| s.port);

                if let Some(nested) = hierarchy.nested {
                    info!(nested = %nested.session_id, "stopping nested session with its primary");
                    if let Err(err) = self.host.stop_session(&nested.session_id).await {
                        warn!(%err, nested = %nested.session_id, "failed to stop nested session");
                    }
                }

                if let Some(port) = owned_port {
                    self.launcher.release_server(port).await;
                }

                info!("primary hierarchy terminated");
                return;
            }

            if let Some(primary_id) = table.nested_to_primary.remove(&session.id) {
                if let Some(hierarchy) = table.hierarchies.get_mut(&primary_id) {
                    hierarchy.nested = None;
                    hierarchy.transition(HierarchyState::PrimaryStarted);
                }
                info!(primary = %primary_id, "nested session terminated; primary kept");
            }
        }
        .instrument(span)
        .await;
    }

    /// Snapshot of all tracked records, primaries first.
    pub async fn records(&self) -> Vec<SessionRecord> {
        let table = self.table.lock().await;
        let mut primaries: Vec<&Hierarchy> = table.hierarchies.values().collect();
        primaries.sort_by_key(|h| h.primary.started_at);

        let mut records: Vec<SessionRecord> =
            primaries.iter().map(|h| h.primary.clone()).collect();
        records.extend(primaries.iter().filter_map(|h| h.nested.clone()));
        records
    }

    /// Hierarchy state for a primary session id.
    ///
    /// Unknown ids report `NoSession`, retired ones `Terminated`.
    pub async fn state_of(&self, primary_id: &str) -> HierarchyState {
        let table = self.table.lock().await;
        match table.hierarchies.get(primary_id) {
            Some(h) => h.state,
            None if table.is_retired(primary_id) => HierarchyState::Terminated,
            None => HierarchyState::NoSession,
        }
    }

    /// Nested session id currently linked to `primary_id`.
    pub async fn nested_of(&self, primary_id: &str) -> Option<String> {
        let table = self.table.lock().await;
        table
            .hierarchies
            .get(primary_id)
            .and_then(|h| h.nested.as_ref())
            .map(|n| n.session_id.clone())
    }

    /// Configuration for the nested session attached to `side_channel`'s server.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the correlation marker cannot be encoded.
    pub fn nested_configuration(
        &self,
        primary: &HostSession,
        side_channel: &SideChannel,
    ) -> Result<DebugConfiguration> {
        let primary_name = primary
            .configuration
            .name()
            .unwrap_or(primary.name.as_str());

        let mut config = DebugConfiguration::new()
            .with("type", self.session.debug_type.as_str())
            .with("request", "attach")
            .with("mode", "remote")
            .with(
                "name",
                format!("{}{primary_name}", self.session.nested_name_prefix),
            )
            .with("host", side_channel.server.host.as_str())
            .with("port", side_channel.server.port);

        config.set_nested_marker(&NestedMarker {
            parent_session_id: primary.id.clone(),
            correlation_id: side_channel.correlation_id.clone(),
        })?;
        Ok(config)
    }

    async fn register_primary(
        &self,
        session: HostSession,
        side_channel: SideChannel,
    ) -> Option<JoinHandle<()>> {
        let nested_config = match self.nested_configuration(&session, &side_channel) {
            Ok(config) => config,
            Err(err) => {
                warn!(%err, "cannot build nested configuration; primary left alone");
                return None;
            }
        };

        let pending = PendingNested {
            primary_id: session.id.clone(),
            correlation_id: if side_channel.correlation_id.is_empty() {
                Uuid::new_v4().to_string()
            } else {
                side_channel.correlation_id.clone()
            },
            expected_name: nested_config.name().unwrap_or_default().to_owned(),
            requested_at: Utc::now(),
        };

        {
            let mut table = self.table.lock().await;
            if table.is_tracked(&session.id) {
                return None;
            }
            let mut hierarchy = Hierarchy {
                primary: SessionRecord::primary(
                    session.id.clone(),
                    Some(side_channel.server.clone()),
                    session.configuration.clone(),
                ),
                state: HierarchyState::NoSession,
                pending: Some(pending.clone()),
                nested: None,
            };
            hierarchy.transition(HierarchyState::PrimaryStarted);
            hierarchy.transition(HierarchyState::NestedPending);
            table.hierarchies.insert(session.id.clone(), hierarchy);
        }

        if side_channel.server.is_owned() {
            self.launcher.claim_server(side_channel.server.port).await;
        }

        info!(
            port = side_channel.server.port,
            correlation = %pending.correlation_id,
            "primary registered; starting nested session"
        );

        let manager = self.clone();
        Some(tokio::spawn(
            async move { manager.start_nested(session, nested_config, pending).await }
                .in_current_span(),
        ))
    }

    async fn start_nested(
        &self,
        primary: HostSession,
        nested_config: DebugConfiguration,
        pending: PendingNested,
    ) {
        let options = StartOptions {
            parent_session_id: Some(primary.id.clone()),
        };

        let outcome = self
            .host
            .start_session(primary.workspace_folder.clone(), nested_config, options)
            .await;

        let failure = match outcome {
            Ok(true) => None,
            Ok(false) => Some(AppError::NestedSessionStart(
                "host declined to start the nested session".into(),
            )),
            Err(err) => Some(AppError::NestedSessionStart(err.to_string())),
        };

        if let Some(err) = failure {
            warn!(%err, "nested session failed to start; primary unaffected");
            let mut table = self.table.lock().await;
            if let Some(hierarchy) = table.hierarchies.get_mut(&primary.id) {
                if hierarchy.state == HierarchyState::NestedPending {
                    hierarchy.pending = None;
                    hierarchy.transition(HierarchyState::PrimaryStarted);
                }
            }
            return;
        }

        self.resolve_by_polling(&pending).await;
    }

    /// Bounded active-session polling used when no started event links the
    /// nested session.
    async fn resolve_by_polling(&self, pending: &PendingNested) {
        let attempts = self.session.identity_poll_attempts;

        for attempt in 1..=attempts {
            if !self.table.lock().await.is_pending(pending) {
                return;
            }

            let sessions = self.host.active_sessions().await;

            let mut table = self.table.lock().await;
            if !table.is_pending(pending) {
                return;
            }
            let exclude = table.tracked_ids();
            if let Some(selection) = identity::select_candidate(&sessions, pending, &exclude) {
                if selection.is_ambiguous() {
                    let err = AppError::IdentityResolution(format!(
                        "{} candidates for nested session of {}",
                        selection.candidates, pending.primary_id
                    ));
                    warn!(%err, chosen = %selection.session.id, "picked most recent candidate");
                }
                if selection.linkage == Linkage::Heuristic {
                    debug!(chosen = %selection.session.id, "nested session matched by name");
                }
                if table.register_nested(&pending.primary_id, &selection.session) {
                    info!(
                        nested = %selection.session.id,
                        attempt,
                        "nested session registered from active sessions"
                    );
                }
                return;
            }
            drop(table);

            tokio::time::sleep(self.session.identity_poll_interval()).await;
        }

        let err = AppError::IdentityResolution(format!(
            "no nested session for {} after {attempts} polls",
            pending.primary_id
        ));
        warn!(%err, "nested session identity unresolved");
    }
}
