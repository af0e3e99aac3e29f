use serde_json::Value;
use tether_sdk::{
    build_metadata, validate, ConfigError, HealthReport, PluginIdentity, PluginMetadata,
    ServiceCall, ServiceDescriptor, ServiceRegistry,
};
use tower::{util::BoxCloneSyncService, Service};

use crate::{
    config::LifecycleConfig,
    lifecycle::{LifecycleController, LifecycleState},
    plugin::{RemotePlugin, ServiceHandler},
    router::{ServiceRoute, ServiceRouter},
};

/// Everything one plugin process exposes: identity, declared services and the
/// lifecycle controller. The service set is fixed once the runtime is built.
pub struct PluginRuntime<P> {
    identity: PluginIdentity,
    registry: ServiceRegistry,
    router: ServiceRouter,
    controller: LifecycleController<P>,
}

impl<P: RemotePlugin> PluginRuntime<P> {
    pub fn identity(&self) -> &PluginIdentity {
        &self.identity
    }

    pub fn services(&self) -> &[ServiceDescriptor] {
        self.registry.list()
    }

    /// Answer to the host's discovery query. Valid in every lifecycle state.
    pub fn metadata(&self) -> PluginMetadata {
        build_metadata(&self.identity, self.registry.list())
    }

    pub fn validate(&self) -> Vec<String> {
        validate(&self.identity, self.registry.list())
    }

    pub fn controller(&self) -> &LifecycleController<P> {
        &self.controller
    }

    pub fn router(&self) -> &ServiceRouter {
        &self.router
    }

    pub fn state(&self) -> LifecycleState {
        self.controller.state()
    }

    pub async fn health(&self) -> HealthReport {
        self.controller.health().await
    }

    /// Best-effort stop then unload, for process shutdown without a host.
    pub async fn shutdown(&self) {
        if let Err(err) = self.controller.stop().await {
            tracing::warn!(error = %err, "stop during shutdown failed");
        }
        self.controller.unload().await;
    }
}

/// Collects service declarations before the plugin is handed to the runtime.
pub struct PluginRuntimeBuilder {
    identity: PluginIdentity,
    registry: ServiceRegistry,
    handlers: Vec<ServiceHandler>,
}

impl PluginRuntimeBuilder {
    pub fn new(identity: PluginIdentity) -> Self {
        Self {
            identity,
            registry: ServiceRegistry::new(),
            handlers: Vec::new(),
        }
    }

    /// Declares a service and binds its handler. Rejected declarations leave
    /// the builder unchanged and should abort startup.
    pub fn service<S>(
        mut self,
        name: &str,
        endpoint: &str,
        method: &str,
        description: Option<&str>,
        handler: S,
    ) -> Result<Self, ConfigError>
    where
        S: Service<ServiceCall, Response = Value, Error = anyhow::Error>
            + Clone
            + Send
            + Sync
            + 'static,
        S::Future: Send + 'static,
    {
        self.registry.register(name, endpoint, method, description)?;
        self.handlers.push(BoxCloneSyncService::new(handler));
        Ok(self)
    }

    pub fn services(&self) -> &[ServiceDescriptor] {
        self.registry.list()
    }

    pub fn build<P: RemotePlugin>(self, plugin: P, config: &LifecycleConfig) -> PluginRuntime<P> {
        let routes = self
            .registry
            .list()
            .iter()
            .cloned()
            .zip(self.handlers)
            .map(|(descriptor, handler)| ServiceRoute {
                descriptor,
                handler,
            })
            .collect();
        PluginRuntime {
            identity: self.identity,
            registry: self.registry,
            router: ServiceRouter::new(routes),
            controller: LifecycleController::new(plugin, config),
        }
    }
}
