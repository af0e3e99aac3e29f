//! Bodies exchanged over the boundary endpoints.

use chrono::{DateTime, Utc};
use serde::{ser::SerializeMap, Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Ok,
    Error,
}

/// Reply to `load`, `start`, `stop` and `unload`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleResponse {
    pub status: ResponseStatus,
    #[serde(default)]
    pub message: String,
}

impl LifecycleResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            status: ResponseStatus::Ok,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: ResponseStatus::Error,
            message: message.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == ResponseStatus::Ok
    }
}

/// Keys of [`HealthReport`] owned by the lifecycle controller.
pub const HEALTH_FIELDS: [&str; 4] = ["status", "loaded", "started", "timestamp"];

/// Reply to `GET /plugin/health`. Plugins add their own fields through `extra`;
/// an extra key that collides with a fixed field is never serialized.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HealthReport {
    pub status: String,
    pub loaded: bool,
    pub started: bool,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl HealthReport {
    pub fn new(loaded: bool, started: bool) -> Self {
        Self {
            status: "ok".to_string(),
            loaded,
            started,
            timestamp: Utc::now(),
            extra: Map::new(),
        }
    }

    /// Adds a diagnostic field. Keys in [`HEALTH_FIELDS`] are ignored; a plugin
    /// that wants another status token assigns `status` directly.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let key = key.into();
        if !HEALTH_FIELDS.contains(&key.as_str()) {
            self.extra.insert(key, value.into());
        }
        self
    }
}

impl Serialize for HealthReport {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("status", &self.status)?;
        map.serialize_entry("loaded", &self.loaded)?;
        map.serialize_entry("started", &self.started)?;
        map.serialize_entry("timestamp", &self.timestamp)?;
        for (key, value) in &self.extra {
            if !HEALTH_FIELDS.contains(&key.as_str()) {
                map.serialize_entry(key, value)?;
            }
        }
        map.end()
    }
}

/// Payload the host forwards to a service endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceCall {
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default)]
    pub kwargs: Map<String, Value>,
}

impl ServiceCall {
    pub fn with_kwarg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.kwargs.insert(key.into(), value.into());
        self
    }

    pub fn kwarg(&self, key: &str) -> Option<&Value> {
        self.kwargs.get(key)
    }
}
