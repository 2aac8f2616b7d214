//! Host event loop.
//!
//! Feeds every [`HostEvent`] into the hierarchy manager until the channel
//! closes or the cancellation token fires.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::session_manager::SessionHierarchyManager;
use crate::host::HostEvent;

/// Spawn the background task consuming host session events.
///
/// Nested-session starts are detached from the loop, so a slow host
/// acknowledgement never blocks delivery of the nested session's own
/// started event.
#[must_use]
pub fn spawn_event_monitor(
    manager: SessionHierarchyManager,
    mut events: mpsc::Receiver<HostEvent>,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                () = cancel.cancelled() => {
                    info!("host event monitor shutting down");
                    break;
                }
                event = events.recv() => event,
            };

            let Some(event) = event else {
                info!("host event stream closed");
                break;
            };

            if manager.handle_event(event).await.is_some() {
                debug!("nested session start scheduled");
            }
        }
    })
}
