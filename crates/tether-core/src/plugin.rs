use async_trait::async_trait;
use serde_json::Value;
use tether_sdk::{HealthReport, ServiceCall};
use tower::util::BoxCloneSyncService;

/// Handler bound to one declared service endpoint.
pub type ServiceHandler = BoxCloneSyncService<ServiceCall, Value, anyhow::Error>;

/// Capability hooks implemented by plugin authors.
///
/// Hooks are driven by [`crate::LifecycleController`], never called directly by
/// the transport. Each one may be invoked again after it already succeeded, so
/// implementations must tolerate repeats.
#[async_trait]
pub trait RemotePlugin: Send + Sync + 'static {
    /// Prepare resources and check configuration. No background work yet.
    async fn on_load(&self) -> anyhow::Result<()>;

    /// Start background work. Registered services must be ready on return.
    async fn on_start(&self) -> anyhow::Result<()>;

    /// Stop taking new work. Durable resources and state stay intact.
    async fn on_stop(&self) -> anyhow::Result<()>;

    /// Final teardown before the process exits. Failures are only logged.
    async fn on_unload(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Add diagnostic fields to the base report. Must not mutate state.
    async fn health(&self, report: HealthReport) -> HealthReport {
        report
    }
}
