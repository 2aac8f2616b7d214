//! Side-channel and marker handling on opaque debug configurations.

use std::path::PathBuf;

use crossdebug::models::configuration::{
    DebugConfiguration, NestedMarker, SideChannel, NESTED_MARKER_KEY, SIDE_CHANNEL_KEY,
};
use crossdebug::models::server::ServerDescriptor;
use serde_json::json;

fn request() -> DebugConfiguration {
    DebugConfiguration::from_value(json!({
        "type": "go",
        "request": "launch",
        "mode": "test",
        "name": "Test shim",
        "program": "${workspaceFolder}/shimtest",
        "args": ["-test.run", "TestShim"],
        "env": {"GOFLAGS": "-count=1"},
    }))
    .expect("object")
}

fn side_channel() -> SideChannel {
    SideChannel {
        server: ServerDescriptor {
            port: 40123,
            host: "127.0.0.1".into(),
            process_id: Some(4242),
            working_directory: PathBuf::from("/ws/shimtest"),
        },
        correlation_id: "corr-1".into(),
        evidence: vec!["a_test.go:3: import: github.com/containerd".into()],
    }
}

#[test]
fn side_channel_is_additive() {
    let original = request();
    let enhanced = original.with_side_channel(&side_channel()).expect("enhance");

    assert_eq!(enhanced.as_map().len(), original.as_map().len() + 1);
    for (key, value) in original.as_map() {
        assert_eq!(enhanced.get(key), Some(value), "field {key} changed");
    }
    assert!(enhanced.get(SIDE_CHANNEL_KEY).is_some());
    assert!(original.side_channel().is_none(), "input must stay untouched");
}

#[test]
fn side_channel_wire_shape_is_camel_case() {
    let enhanced = request().with_side_channel(&side_channel()).expect("enhance");
    let raw = enhanced.get(SIDE_CHANNEL_KEY).expect("side channel");

    assert_eq!(raw["server"]["host"], "127.0.0.1");
    assert_eq!(raw["server"]["port"], 40123);
    assert_eq!(raw["server"]["processId"], 4242);
    assert_eq!(raw["correlationId"], "corr-1");
    assert_eq!(enhanced.side_channel(), Some(side_channel()));
}

#[test]
fn unowned_descriptor_omits_process_id() {
    let descriptor = ServerDescriptor {
        port: 40123,
        host: "127.0.0.1".into(),
        process_id: None,
        working_directory: PathBuf::from("/ws"),
    };
    let value = serde_json::to_value(&descriptor).expect("serialize");

    assert!(value.get("processId").is_none());
    assert!(!descriptor.is_owned());
    assert_eq!(descriptor.address(), "127.0.0.1:40123");
}

#[test]
fn malformed_side_channel_reads_as_absent() {
    let config = request().with(SIDE_CHANNEL_KEY, "not an object");
    assert!(config.side_channel().is_none());
}

#[test]
fn nested_marker_round_trips_through_json() {
    let mut config = DebugConfiguration::new().with("request", "attach");
    let marker = NestedMarker {
        parent_session_id: "primary-1".into(),
        correlation_id: "corr-1".into(),
    };
    config.set_nested_marker(&marker).expect("marker");

    let value = config.clone().into_value();
    assert_eq!(value[NESTED_MARKER_KEY]["parentSessionId"], "primary-1");

    let back = DebugConfiguration::from_value(value).expect("object");
    assert_eq!(back.nested_marker(), Some(marker));
}

#[test]
fn accessors_read_well_known_fields() {
    let config = request().with("forceNestedDebug", true);

    assert_eq!(config.debug_type(), Some("go"));
    assert_eq!(config.request(), Some("launch"));
    assert_eq!(config.mode(), Some("test"));
    assert_eq!(config.name(), Some("Test shim"));
    assert_eq!(config.force_requested(), Some(true));
    assert_eq!(request().force_requested(), None);
    assert_eq!(
        config.program_path(Some(std::path::Path::new("/ws"))),
        Some(PathBuf::from("/ws/shimtest"))
    );
}
