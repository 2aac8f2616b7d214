//! Shared fixtures for orchestrator integration tests.
//!
//! Provides a scripted [`FakeHost`], fake headless-server configuration and
//! session builders so individual test modules can focus on behaviour.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use chrono::Utc;
use crossdebug::config::GlobalConfig;
use crossdebug::host::{DebugHost, HostEvent, HostSession, StartOptions};
use crossdebug::models::configuration::{DebugConfiguration, SideChannel};
use crossdebug::models::server::ServerDescriptor;
use crossdebug::models::session::HierarchyState;
use crossdebug::orchestrator::session_manager::SessionHierarchyManager;
use crossdebug::{AppError, Result};
use serde_json::json;
use tokio::sync::mpsc;

/// Fake headless server: prints the ready marker, then idles.
pub const READY_SCRIPT: &str = r#"echo "DAP server listening at: ${4#--listen=}"; exec sleep 30"#;

/// Test source that triggers the import and runtime-API signals.
pub const CONTAINERD_TEST: &str = r#"package shimtest

import (
	"testing"

	"github.com/containerd/containerd/runtime/v2/shim"
)

func TestShim(t *testing.T) {
	shim.Run("io.containerd.test.v1", nil)
}
"#;

/// Test source with arithmetic and an HTTP call only.
pub const NORMAL_TEST: &str = r#"package shimtest

import (
	"net/http"
	"testing"
)

func TestAdd(t *testing.T) {
	if 1+1 != 2 {
		t.Fatal("math")
	}
	_, _ = http.Get("http://example.com")
}
"#;

/// How the fake host makes a newly started session visible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Echo {
    /// Started event carrying the parent id; not listed in active sessions.
    EventWithParent,
    /// Started event without parent id; configuration (and marker) echoed.
    EventWithMarker,
    /// No event; listed in active sessions with its parent id.
    ActiveOnly,
    /// Started event with parent id and listed in active sessions.
    Both,
    /// Accepted but never visible.
    Nothing,
}

/// What `start_session` answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartReply {
    Accept,
    Decline,
    Fail,
}

/// One recorded `start_session` call.
#[derive(Debug, Clone)]
pub struct StartCall {
    pub folder: Option<PathBuf>,
    pub configuration: DebugConfiguration,
    pub options: StartOptions,
}

/// Scripted [`DebugHost`] recording every call.
pub struct FakeHost {
    echo: Echo,
    reply: StartReply,
    events: Option<mpsc::Sender<HostEvent>>,
    next_id: AtomicUsize,
    starts: Mutex<Vec<StartCall>>,
    stops: Mutex<Vec<String>>,
    active: Mutex<Vec<HostSession>>,
}

impl FakeHost {
    pub fn new(echo: Echo, reply: StartReply, events: Option<mpsc::Sender<HostEvent>>) -> Self {
        Self {
            echo,
            reply,
            events,
            next_id: AtomicUsize::new(1),
            starts: Mutex::new(Vec::new()),
            stops: Mutex::new(Vec::new()),
            active: Mutex::new(Vec::new()),
        }
    }

    pub fn starts(&self) -> Vec<StartCall> {
        self.starts.lock().unwrap().clone()
    }

    pub fn stops(&self) -> Vec<String> {
        self.stops.lock().unwrap().clone()
    }

    /// Add a session to the active-session snapshot.
    pub fn push_active(&self, session: HostSession) {
        self.active.lock().unwrap().push(session);
    }

    fn accept(&self, folder: Option<PathBuf>, configuration: DebugConfiguration, options: &StartOptions) {
        let id = format!("nested-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        let name = configuration.name().unwrap_or("nested").to_owned();
        let mut session = HostSession {
            id,
            name,
            parent_id: options.parent_session_id.clone(),
            workspace_folder: folder,
            configuration,
            started_at: Utc::now(),
        };

        match self.echo {
            Echo::EventWithParent => self.emit(session),
            Echo::EventWithMarker => {
                session.parent_id = None;
                self.emit(session);
            }
            Echo::ActiveOnly => self.push_active(session),
            Echo::Both => {
                self.push_active(session.clone());
                self.emit(session);
            }
            Echo::Nothing => {}
        }
    }

    fn emit(&self, session: HostSession) {
        if let Some(tx) = &self.events {
            tx.try_send(HostEvent::SessionStarted(session))
                .expect("event channel has room");
        }
    }
}

impl DebugHost for FakeHost {
    fn start_session(
        &self,
        folder: Option<PathBuf>,
        configuration: DebugConfiguration,
        options: StartOptions,
    ) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + '_>> {
        Box::pin(async move {
            self.starts.lock().unwrap().push(StartCall {
                folder: folder.clone(),
                configuration: configuration.clone(),
                options: options.clone(),
            });

            match self.reply {
                StartReply::Accept => {
                    self.accept(folder, configuration, &options);
                    Ok(true)
                }
                StartReply::Decline => Ok(false),
                StartReply::Fail => Err(AppError::Host("attach refused".into())),
            }
        })
    }

    fn stop_session(
        &self,
        session_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let session_id = session_id.to_owned();
        Box::pin(async move {
            self.active.lock().unwrap().retain(|s| s.id != session_id);
            self.stops.lock().unwrap().push(session_id);
            Ok(())
        })
    }

    fn active_sessions(&self) -> Pin<Box<dyn Future<Output = Vec<HostSession>> + Send + '_>> {
        Box::pin(async move { self.active.lock().unwrap().clone() })
    }
}

/// Configuration whose server is the scripted fake and whose identity
/// polling is short.
pub fn fake_server_config(reuse_env_var: &str) -> GlobalConfig {
    let mut config = GlobalConfig::default();
    config.orchestrator.server_path = Some(PathBuf::from("sh"));
    config.server.server_args = vec!["-c".into(), READY_SCRIPT.into(), "fake-dlv".into()];
    config.server.startup_timeout_ms = 3000;
    config.server.probe_timeout_ms = 200;
    config.server.shutdown_grace_ms = 1000;
    config.server.reuse_env_var = reuse_env_var.into();
    config.session.identity_poll_interval_ms = 20;
    config.session.identity_poll_attempts = 5;
    config
}

/// A `go` test-mode launch request for `program`.
pub fn test_request(program: &str) -> DebugConfiguration {
    DebugConfiguration::from_value(json!({
        "type": "go",
        "request": "launch",
        "mode": "test",
        "name": "TestShim",
        "program": program,
        "buildFlags": "-tags=integration",
    }))
    .expect("object")
}

/// Scratch workspace containing `content` as `name`.
pub fn workspace(name: &str, content: &str) -> tempfile::TempDir {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::write(dir.path().join(name), content).expect("write source");
    dir
}

/// An unowned server descriptor; nothing needs to listen on it.
pub fn unowned_server(port: u16) -> ServerDescriptor {
    ServerDescriptor {
        port,
        host: "127.0.0.1".into(),
        process_id: None,
        working_directory: PathBuf::from("/tmp"),
    }
}

/// Host session for an enhanced primary request.
pub fn primary_session(id: &str, server: ServerDescriptor, folder: Option<&Path>) -> HostSession {
    let side_channel = SideChannel {
        server,
        correlation_id: format!("corr-{id}"),
        evidence: Vec::new(),
    };
    let configuration = test_request("${workspaceFolder}")
        .with_side_channel(&side_channel)
        .expect("side channel");
    session_with(id, configuration, folder)
}

/// Host session with an arbitrary configuration.
pub fn session_with(id: &str, configuration: DebugConfiguration, folder: Option<&Path>) -> HostSession {
    HostSession {
        id: id.into(),
        name: configuration.name().unwrap_or(id).to_owned(),
        parent_id: None,
        workspace_folder: folder.map(Path::to_path_buf),
        configuration,
        started_at: Utc::now(),
    }
}

/// Poll `manager` until `primary_id` reaches `state`.
pub async fn wait_for_state(
    manager: &SessionHierarchyManager,
    primary_id: &str,
    state: HierarchyState,
) -> bool {
    for _ in 0..150 {
        if manager.state_of(primary_id).await == state {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

/// Feed every queued event into `manager`, awaiting any nested-start task.
pub async fn drain_events(manager: &SessionHierarchyManager, rx: &mut mpsc::Receiver<HostEvent>) {
    while let Ok(event) = rx.try_recv() {
        if let Some(task) = manager.handle_event(event).await {
            task.await.expect("nested start task");
        }
    }
}
