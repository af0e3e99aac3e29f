use serde::{Deserialize, Serialize};

use crate::{identity::PluginIdentity, service::ServiceDescriptor};

/// Discovery document served at `GET /plugin/metadata`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginMetadata {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub mode: String,
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub services: Vec<ServiceDescriptor>,
}

impl PluginMetadata {
    pub fn service(&self, name: &str) -> Option<&ServiceDescriptor> {
        self.services.iter().find(|service| service.name == name)
    }
}

/// Merges identity fields with the current service list.
pub fn build_metadata(identity: &PluginIdentity, services: &[ServiceDescriptor]) -> PluginMetadata {
    PluginMetadata {
        name: identity.name().to_string(),
        kind: identity.kind().to_string(),
        mode: identity.mode().to_string(),
        version: identity.version().to_string(),
        description: identity.description().to_string(),
        author: identity.author().to_string(),
        services: services.to_vec(),
    }
}
