//! Pass-through behaviour of the configuration interceptor.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crossdebug::config::GlobalConfig;
use crossdebug::detection::InteractionClassifier;
use crossdebug::interceptor::ConfigurationInterceptor;
use crossdebug::models::configuration::{DebugConfiguration, SIDE_CHANNEL_KEY};
use crossdebug::orchestrator::launcher::DebugServerLauncher;
use serde_json::json;
use tokio_util::sync::CancellationToken;

const CONTAINERD_TEST: &str =
    "package shimtest\n\nimport \"github.com/containerd/containerd/runtime/v2/shim\"\n";

/// Interceptor whose launcher can never start a server.
fn interceptor() -> (ConfigurationInterceptor, Arc<DebugServerLauncher>) {
    let mut config = GlobalConfig::default();
    config.orchestrator.server_path = Some(PathBuf::from("/nonexistent/crossdebug/dlv"));
    config.server.reuse_env_var = "CROSSDEBUG_TEST_INTERCEPTOR_UNSET".into();

    let classifier = Arc::new(
        InteractionClassifier::new(&config.orchestrator, &config.detection).expect("classifier"),
    );
    let launcher = Arc::new(DebugServerLauncher::new(&config));
    (
        ConfigurationInterceptor::new(classifier, Arc::clone(&launcher), config.session),
        launcher,
    )
}

fn test_request() -> DebugConfiguration {
    DebugConfiguration::from_value(json!({
        "type": "go",
        "request": "launch",
        "mode": "test",
        "name": "Test shim",
        "program": "${workspaceFolder}",
    }))
    .expect("object")
}

fn shim_workspace() -> tempfile::TempDir {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::write(dir.path().join("containerd_test.go"), CONTAINERD_TEST).expect("write");
    dir
}

async fn resolve(
    interceptor: &ConfigurationInterceptor,
    folder: Option<&Path>,
    config: DebugConfiguration,
) -> DebugConfiguration {
    interceptor
        .resolve(folder, config, &CancellationToken::new())
        .await
}

#[tokio::test]
async fn registered_type_is_the_configured_one() {
    let (interceptor, _) = interceptor();
    assert_eq!(interceptor.debug_type(), "go");
}

#[tokio::test]
async fn non_test_mode_passes_through() {
    let dir = shim_workspace();
    let (interceptor, _) = interceptor();
    let request = test_request().with("mode", "debug");

    let resolved = resolve(&interceptor, Some(dir.path()), request.clone()).await;
    assert_eq!(resolved, request);
}

#[tokio::test]
async fn other_debug_type_passes_through() {
    let dir = shim_workspace();
    let (interceptor, _) = interceptor();
    let request = test_request().with("type", "python");

    let resolved = resolve(&interceptor, Some(dir.path()), request.clone()).await;
    assert_eq!(resolved, request);
}

#[tokio::test]
async fn request_without_program_or_folder_passes_through() {
    let (interceptor, _) = interceptor();
    let request = DebugConfiguration::new()
        .with("type", "go")
        .with("mode", "test");

    let resolved = resolve(&interceptor, None, request.clone()).await;
    assert_eq!(resolved, request);
}

#[tokio::test]
async fn already_enhanced_request_is_not_enhanced_twice() {
    let dir = shim_workspace();
    let (interceptor, _) = interceptor();
    let request = test_request().with(SIDE_CHANNEL_KEY, json!({"correlationId": "x"}));

    let resolved = resolve(&interceptor, Some(dir.path()), request.clone()).await;
    assert_eq!(resolved, request);
}

#[tokio::test]
async fn launch_failure_degrades_to_unmodified_request() {
    let dir = shim_workspace();
    let (interceptor, launcher) = interceptor();
    let request = test_request();

    let resolved = resolve(&interceptor, Some(dir.path()), request.clone()).await;

    assert_eq!(resolved, request);
    assert!(resolved.side_channel().is_none());
    assert!(launcher.active_descriptors().await.is_empty());
}

#[tokio::test]
async fn cancelled_request_passes_through() {
    let dir = shim_workspace();
    let (interceptor, _) = interceptor();
    let cancel = CancellationToken::new();
    cancel.cancel();
    let request = test_request();

    let resolved = interceptor
        .resolve(Some(dir.path()), request.clone(), &cancel)
        .await;
    assert_eq!(resolved, request);
}

#[tokio::test]
async fn negative_classification_is_idempotent() {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::write(
        dir.path().join("math_test.go"),
        "package math\n\nimport \"testing\"\n\nfunc TestAdd(t *testing.T) { _ = 1 + 1 }\n",
    )
    .expect("write");
    let (interceptor, _) = interceptor();
    let request = test_request();

    let first = resolve(&interceptor, Some(dir.path()), request.clone()).await;
    let second = resolve(&interceptor, Some(dir.path()), request.clone()).await;

    assert_eq!(first, request);
    assert_eq!(second, first);
}
