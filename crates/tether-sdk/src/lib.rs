//! Contract types shared by remote plugins and the host that manages them.

pub mod error;
pub mod identity;
pub mod metadata;
pub mod service;
pub mod validate;
pub mod wire;

pub use error::ConfigError;
pub use identity::{PluginIdentity, PLACEHOLDER_NAME};
pub use metadata::{build_metadata, PluginMetadata};
pub use service::{Method, ServiceDescriptor, ServiceRegistry};
pub use validate::{validate, validate_document};
pub use wire::{HealthReport, HEALTH_FIELDS, LifecycleResponse, ResponseStatus, ServiceCall};

/// Lifecycle endpoints every remote plugin serves.
pub mod paths {
    pub const METADATA: &str = "/plugin/metadata";
    pub const HEALTH: &str = "/plugin/health";
    pub const LOAD: &str = "/plugin/load";
    pub const START: &str = "/plugin/start";
    pub const STOP: &str = "/plugin/stop";
    pub const UNLOAD: &str = "/plugin/unload";

    pub const ALL: [&str; 6] = [METADATA, HEALTH, LOAD, START, STOP, UNLOAD];

    /// Lifecycle paths answer first, so a service declared on one is unreachable.
    pub fn is_reserved(path: &str) -> bool {
        ALL.contains(&path)
    }
}
