//! Nested-session identity resolution through events and bounded polling.

use std::sync::Arc;

use chrono::{Duration, Utc};
use crossdebug::host::{DebugHost, HostEvent, HostSession};
use crossdebug::models::configuration::DebugConfiguration;
use crossdebug::models::session::HierarchyState;
use crossdebug::orchestrator::launcher::DebugServerLauncher;
use crossdebug::orchestrator::session_manager::SessionHierarchyManager;
use tokio::sync::mpsc;

use super::test_helpers::{
    drain_events, fake_server_config, primary_session, unowned_server, Echo, FakeHost,
    StartReply,
};

fn setup(echo: Echo) -> (Arc<FakeHost>, SessionHierarchyManager, mpsc::Receiver<HostEvent>) {
    let config = fake_server_config("CROSSDEBUG_TEST_IDENTITY_UNSET");
    let (tx, rx) = mpsc::channel(16);
    let host = Arc::new(FakeHost::new(echo, StartReply::Accept, Some(tx)));
    let manager = SessionHierarchyManager::new(
        Arc::clone(&host) as Arc<dyn DebugHost>,
        Arc::new(DebugServerLauncher::new(&config)),
        config.session.clone(),
    );
    (host, manager, rx)
}

async fn start(manager: &SessionHierarchyManager, rx: &mut mpsc::Receiver<HostEvent>) {
    let primary = primary_session("primary-1", unowned_server(40300), None);
    let task = manager
        .handle_event(HostEvent::SessionStarted(primary))
        .await
        .expect("nested start scheduled");
    task.await.expect("nested start task");
    drain_events(manager, rx).await;
}

fn attach_session(id: &str, name: &str, parent: Option<&str>, age_secs: i64) -> HostSession {
    HostSession {
        id: id.into(),
        name: name.into(),
        parent_id: parent.map(str::to_owned),
        workspace_folder: None,
        configuration: DebugConfiguration::new()
            .with("type", "go")
            .with("request", "attach"),
        started_at: Utc::now() - Duration::seconds(age_secs),
    }
}

#[tokio::test]
async fn active_session_polling_resolves_identity() {
    let (_host, manager, mut rx) = setup(Echo::ActiveOnly);
    start(&manager, &mut rx).await;

    assert_eq!(manager.state_of("primary-1").await, HierarchyState::NestedStarted);
    assert_eq!(manager.nested_of("primary-1").await.as_deref(), Some("nested-1"));
}

#[tokio::test]
async fn echoed_marker_resolves_identity_without_parent_id() {
    let (_host, manager, mut rx) = setup(Echo::EventWithMarker);
    start(&manager, &mut rx).await;

    assert_eq!(manager.state_of("primary-1").await, HierarchyState::NestedStarted);
    assert_eq!(manager.nested_of("primary-1").await.as_deref(), Some("nested-1"));
}

#[tokio::test]
async fn event_and_poll_together_register_once() {
    let (_host, manager, mut rx) = setup(Echo::Both);
    start(&manager, &mut rx).await;

    let records = manager.records().await;
    assert_eq!(records.len(), 2);
    assert_eq!(manager.nested_of("primary-1").await.as_deref(), Some("nested-1"));
}

#[tokio::test]
async fn unresolved_identity_stays_pending_within_bounds() {
    let (_host, manager, mut rx) = setup(Echo::Nothing);
    let started = std::time::Instant::now();
    start(&manager, &mut rx).await;

    assert_eq!(manager.state_of("primary-1").await, HierarchyState::NestedPending);
    // 5 polls of 20ms each; bounded well below a second.
    assert!(started.elapsed() < std::time::Duration::from_secs(2));
}

#[tokio::test]
async fn ambiguous_candidates_pick_the_most_recent() {
    let (host, manager, mut rx) = setup(Echo::Nothing);
    host.push_active(attach_session("older", "x", Some("primary-1"), 3));
    host.push_active(attach_session("newer", "y", Some("primary-1"), 0));
    host.push_active(attach_session("unrelated", "z", Some("someone-else"), 0));

    start(&manager, &mut rx).await;

    assert_eq!(manager.nested_of("primary-1").await.as_deref(), Some("newer"));
}

#[tokio::test]
async fn name_heuristic_is_last_resort() {
    let (host, manager, mut rx) = setup(Echo::Nothing);
    host.push_active(attach_session("by-name", "Nested: TestShim", None, -1));

    start(&manager, &mut rx).await;

    assert_eq!(manager.nested_of("primary-1").await.as_deref(), Some("by-name"));
}

#[tokio::test]
async fn stale_name_match_is_not_linked() {
    let (host, manager, mut rx) = setup(Echo::Nothing);
    host.push_active(attach_session("stale", "Nested: TestShim", None, 60));

    start(&manager, &mut rx).await;

    assert_eq!(manager.state_of("primary-1").await, HierarchyState::NestedPending);
}
