use serde::{Deserialize, Serialize};

/// Name carried by a plugin that never set its own identity.
pub const PLACEHOLDER_NAME: &str = "unknown_plugin";
/// Every remote plugin is a system plugin.
pub const PLUGIN_KIND: &str = "system";
/// Every remote plugin runs out of process.
pub const PLUGIN_MODE: &str = "remote";

/// Who a plugin is. Fixed once the plugin process has constructed it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginIdentity {
    name: String,
    version: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    author: String,
}

impl PluginIdentity {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            description: String::new(),
            author: String::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = author.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn author(&self) -> &str {
        &self.author
    }

    pub fn kind(&self) -> &'static str {
        PLUGIN_KIND
    }

    pub fn mode(&self) -> &'static str {
        PLUGIN_MODE
    }

    /// True while the name is empty or still the placeholder.
    pub fn is_placeholder(&self) -> bool {
        self.name.trim().is_empty() || self.name == PLACEHOLDER_NAME
    }
}

impl Default for PluginIdentity {
    fn default() -> Self {
        Self::new(PLACEHOLDER_NAME, "0.0.0")
    }
}
