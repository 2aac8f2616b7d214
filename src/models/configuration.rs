//! Opaque debug configuration plus the namespaced side-channel fields.
//!
//! The host hands configurations around as free-form JSON objects. The
//! orchestrator only ever adds the keys [`SIDE_CHANNEL_KEY`] (on the primary
//! request) and [`NESTED_MARKER_KEY`] (on the nested attach request); every
//! other field is left exactly as the caller supplied it.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::server::ServerDescriptor;
use crate::{AppError, Result};

/// Key carrying the [`SideChannel`] on a primary request.
pub const SIDE_CHANNEL_KEY: &str = "__crossdebug";
/// Key carrying the [`NestedMarker`] on a nested attach request.
pub const NESTED_MARKER_KEY: &str = "__crossdebugNested";
/// Per-request override equivalent to `force_enabled`.
pub const FORCE_KEY: &str = "forceNestedDebug";

/// Payload attached to a primary request once a server is available.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SideChannel {
    /// Server the nested session attaches to.
    pub server: ServerDescriptor,
    /// Token echoed on the nested request to correlate it with its primary.
    pub correlation_id: String,
    /// Classifier evidence, for diagnostics only.
    #[serde(default)]
    pub evidence: Vec<String>,
}

/// Marker attached to a nested attach request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NestedMarker {
    /// Primary session the nested request was started for.
    pub parent_session_id: String,
    /// Correlation token copied from the primary's side channel.
    pub correlation_id: String,
}

/// A host debug configuration object.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct DebugConfiguration(Map<String, Value>);

impl DebugConfiguration {
    /// Empty configuration.
    #[must_use]
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Wrap a JSON value, which must be an object.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` for non-object values.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(AppError::Config(format!(
                "debug configuration must be an object, got {other}"
            ))),
        }
    }

    /// Builder-style field insertion.
    #[must_use]
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.0.insert(key.to_owned(), value.into());
        self
    }

    /// Raw field access.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// String field access.
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// `type` field.
    #[must_use]
    pub fn debug_type(&self) -> Option<&str> {
        self.get_str("type")
    }

    /// `request` field (`launch` / `attach`).
    #[must_use]
    pub fn request(&self) -> Option<&str> {
        self.get_str("request")
    }

    /// `mode` field.
    #[must_use]
    pub fn mode(&self) -> Option<&str> {
        self.get_str("mode")
    }

    /// `name` field.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.get_str("name")
    }

    /// `program` resolved against `folder`, expanding `${workspaceFolder}`.
    ///
    /// Any other host variable (`${fileDirname}`, `${file}`) is only known to
    /// the host editor, so a program still carrying one yields `None`.
    #[must_use]
    pub fn program_path(&self, folder: Option<&Path>) -> Option<PathBuf> {
        let raw = self.get_str("program")?;
        let expanded = match folder {
            Some(folder) => raw.replace("${workspaceFolder}", &folder.to_string_lossy()),
            None if raw.contains("${workspaceFolder}") => return None,
            None => raw.to_owned(),
        };
        if expanded.contains("${") {
            return None;
        }
        let path = PathBuf::from(expanded);
        match folder {
            Some(folder) if path.is_relative() => Some(folder.join(path)),
            _ => Some(path),
        }
    }

    /// Per-request force override, if present.
    #[must_use]
    pub fn force_requested(&self) -> Option<bool> {
        self.0.get(FORCE_KEY).and_then(Value::as_bool)
    }

    /// Decode the side channel, if this is an enhanced primary request.
    #[must_use]
    pub fn side_channel(&self) -> Option<SideChannel> {
        self.0
            .get(SIDE_CHANNEL_KEY)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Copy of this configuration with the side channel added.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the payload cannot be serialised.
    pub fn with_side_channel(&self, side_channel: &SideChannel) -> Result<Self> {
        let mut enhanced = self.clone();
        enhanced
            .0
            .insert(SIDE_CHANNEL_KEY.to_owned(), serde_json::to_value(side_channel)?);
        Ok(enhanced)
    }

    /// Decode the nested marker, if this is a nested attach request.
    #[must_use]
    pub fn nested_marker(&self) -> Option<NestedMarker> {
        self.0
            .get(NESTED_MARKER_KEY)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Add the nested marker in place.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the marker cannot be serialised.
    pub fn set_nested_marker(&mut self, marker: &NestedMarker) -> Result<()> {
        self.0
            .insert(NESTED_MARKER_KEY.to_owned(), serde_json::to_value(marker)?);
        Ok(())
    }

    /// Underlying JSON object.
    #[must_use]
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Convert back into a JSON value.
    #[must_use]
    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}
