use std::{net::SocketAddr, str::FromStr, time::Duration};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tether_sdk::{PluginIdentity, PLACEHOLDER_NAME};

use crate::lifecycle::Operation;

/// Root configuration structure deserialized from TOML.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub plugin: PluginSection,
    pub server: Server,
    pub lifecycle: LifecycleConfig,
    pub host: HostConfig,
    /// Plugin-specific values, read through [`Config::setting`].
    pub settings: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginSection {
    pub name: String,
    pub version: String,
    pub description: String,
    pub author: String,
}

impl Default for PluginSection {
    fn default() -> Self {
        Self {
            name: PLACEHOLDER_NAME.to_string(),
            version: "0.0.0".to_string(),
            description: String::new(),
            author: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Server {
    pub bind: String,
}

impl Default for Server {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8100".to_string(),
        }
    }
}

/// Timing targets for plugin hooks. Overruns are logged, never enforced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    pub load_budget_ms: u64,
    pub stop_budget_ms: u64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            load_budget_ms: 1_000,
            stop_budget_ms: 5_000,
        }
    }
}

impl LifecycleConfig {
    pub fn budget(&self, op: Operation) -> Option<Duration> {
        match op {
            Operation::Load => Some(Duration::from_millis(self.load_budget_ms)),
            Operation::Stop => Some(Duration::from_millis(self.stop_budget_ms)),
            Operation::Start | Operation::Unload => None,
        }
    }
}

/// Timeouts the host side applies when talking to a plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    pub request_timeout_ms: u64,
    pub lifecycle_timeout_ms: u64,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 5_000,
            lifecycle_timeout_ms: 10_000,
        }
    }
}

impl HostConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn lifecycle_timeout(&self) -> Duration {
        Duration::from_millis(self.lifecycle_timeout_ms)
    }
}

impl Config {
    pub fn from_toml(raw: &str) -> Result<Self> {
        toml::from_str(raw).context("invalid configuration")
    }

    /// Validates structural invariants and provides actionable error messages.
    pub fn validate(&self) -> Result<()> {
        if self.plugin.name.trim().is_empty() {
            bail!("plugin.name must not be empty");
        }
        self.server
            .parse_bind_addr()
            .with_context(|| format!("invalid server.bind address `{}`", self.server.bind))?;
        if self.lifecycle.load_budget_ms == 0 || self.lifecycle.stop_budget_ms == 0 {
            bail!("lifecycle budgets must be greater than zero");
        }
        if self.host.request_timeout_ms == 0 || self.host.lifecycle_timeout_ms == 0 {
            bail!("host timeouts must be greater than zero");
        }
        Ok(())
    }

    pub fn identity(&self) -> PluginIdentity {
        PluginIdentity::new(&self.plugin.name, &self.plugin.version)
            .with_description(&self.plugin.description)
            .with_author(&self.plugin.author)
    }

    pub fn setting(&self, key: &str) -> Option<&Value> {
        self.settings.get(key)
    }

    pub fn setting_u64(&self, key: &str) -> Result<Option<u64>> {
        match self.setting(key) {
            None => Ok(None),
            Some(value) => value
                .as_u64()
                .map(Some)
                .with_context(|| format!("setting `{key}` must be a non-negative integer")),
        }
    }
}

impl Server {
    pub fn parse_bind_addr(&self) -> Result<SocketAddr> {
        if self.bind.starts_with(':') {
            let addr = format!("0.0.0.0{}", self.bind);
            Ok(SocketAddr::from_str(&addr)?)
        } else {
            Ok(SocketAddr::from_str(&self.bind)?)
        }
    }
}
