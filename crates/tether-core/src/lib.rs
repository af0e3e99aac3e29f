pub mod client;
pub mod config;
pub mod error;
pub mod handlers;
pub mod lifecycle;
pub mod plugin;
pub mod router;
pub mod runtime;
pub mod server;

pub use client::PluginClient;
pub use config::{Config, HostConfig, LifecycleConfig};
pub use error::TransitionError;
pub use handlers::{Endpoint, Reply};
pub use lifecycle::{LifecycleController, LifecycleState, Operation, Transition};
pub use plugin::{RemotePlugin, ServiceHandler};
pub use runtime::{PluginRuntime, PluginRuntimeBuilder};
pub use server::PluginServer;

/// Returns the crate version baked in at compile time.
pub const fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
