//! Orchestrator activation and shutdown of the host event loop.

use std::sync::Arc;
use std::time::Duration;

use crossdebug::host::{DebugHost, HostEvent};
use crossdebug::models::session::HierarchyState;
use crossdebug::Orchestrator;
use tokio::sync::mpsc;

use super::test_helpers::{
    fake_server_config, primary_session, unowned_server, wait_for_state, Echo, FakeHost,
    StartReply,
};

fn orchestrator(host: Arc<FakeHost>) -> Orchestrator {
    Orchestrator::new(
        fake_server_config("CROSSDEBUG_TEST_MONITOR_UNSET"),
        host as Arc<dyn DebugHost>,
    )
    .expect("orchestrator")
}

#[tokio::test]
async fn monitor_stops_on_deactivate() {
    let host = Arc::new(FakeHost::new(Echo::Nothing, StartReply::Accept, None));
    let orchestrator = orchestrator(host);
    let (_tx, rx) = mpsc::channel::<HostEvent>(4);

    let monitor = orchestrator.activate(rx);
    orchestrator.deactivate().await;

    tokio::time::timeout(Duration::from_secs(2), monitor)
        .await
        .expect("monitor exits")
        .expect("monitor joins");
}

#[tokio::test]
async fn monitor_stops_when_event_stream_closes() {
    let host = Arc::new(FakeHost::new(Echo::Nothing, StartReply::Accept, None));
    let orchestrator = orchestrator(host);
    let (tx, rx) = mpsc::channel::<HostEvent>(4);

    let monitor = orchestrator.activate(rx);
    drop(tx);

    tokio::time::timeout(Duration::from_secs(2), monitor)
        .await
        .expect("monitor exits")
        .expect("monitor joins");
}

#[tokio::test]
async fn nested_started_event_is_delivered_while_start_is_in_flight() {
    let (tx, rx) = mpsc::channel(16);
    let host = Arc::new(FakeHost::new(
        Echo::EventWithParent,
        StartReply::Accept,
        Some(tx.clone()),
    ));
    let orchestrator = orchestrator(Arc::clone(&host));
    let monitor = orchestrator.activate(rx);

    tx.send(HostEvent::SessionStarted(primary_session(
        "primary-1",
        unowned_server(40400),
        None,
    )))
    .await
    .expect("send");

    assert!(
        wait_for_state(orchestrator.manager(), "primary-1", HierarchyState::NestedStarted).await
    );
    assert_eq!(host.starts().len(), 1);

    orchestrator.deactivate().await;
    monitor.await.expect("monitor joins");
}

#[tokio::test]
async fn unrelated_events_are_ignored() {
    let (tx, rx) = mpsc::channel(16);
    let host = Arc::new(FakeHost::new(Echo::Nothing, StartReply::Accept, None));
    let orchestrator = orchestrator(Arc::clone(&host));
    let monitor = orchestrator.activate(rx);

    let mut plain = primary_session("other", unowned_server(40401), None);
    plain.configuration = crossdebug::models::configuration::DebugConfiguration::new()
        .with("type", "python");
    tx.send(HostEvent::SessionStarted(plain.clone()))
        .await
        .expect("send");
    tx.send(HostEvent::SessionTerminated(plain)).await.expect("send");

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(host.starts().is_empty());
    assert!(host.stops().is_empty());
    assert!(orchestrator.manager().records().await.is_empty());

    orchestrator.deactivate().await;
    monitor.await.expect("monitor joins");
}
