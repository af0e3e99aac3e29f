use std::{fmt, sync::Arc, time::Instant};

use anyhow::anyhow;
use serde::{Deserialize, Serialize};
use tether_sdk::HealthReport;
use tokio::sync::{watch, Mutex};

use crate::{config::LifecycleConfig, error::TransitionError, plugin::RemotePlugin};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LifecycleState {
    Unloaded,
    Loaded,
    Started,
    Stopped,
}

impl LifecycleState {
    pub fn is_loaded(self) -> bool {
        !matches!(self, LifecycleState::Unloaded)
    }

    pub fn is_started(self) -> bool {
        matches!(self, LifecycleState::Started)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleState::Unloaded => "UNLOADED",
            LifecycleState::Loaded => "LOADED",
            LifecycleState::Started => "STARTED",
            LifecycleState::Stopped => "STOPPED",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Load,
    Start,
    Stop,
    Unload,
}

impl Operation {
    pub const ALL: [Operation; 4] = [
        Operation::Load,
        Operation::Start,
        Operation::Stop,
        Operation::Unload,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Load => "load",
            Operation::Start => "start",
            Operation::Stop => "stop",
            Operation::Unload => "unload",
        }
    }

    /// State reached when the operation takes effect.
    pub fn target(self) -> LifecycleState {
        match self {
            Operation::Load => LifecycleState::Loaded,
            Operation::Start => LifecycleState::Started,
            Operation::Stop => LifecycleState::Stopped,
            Operation::Unload => LifecycleState::Unloaded,
        }
    }

    fn past_tense(self) -> &'static str {
        match self {
            Operation::Load => "loaded",
            Operation::Start => "started",
            Operation::Stop => "stopped",
            Operation::Unload => "unloaded",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a successful lifecycle call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub op: Operation,
    pub from: LifecycleState,
    pub to: LifecycleState,
    /// False when the call was already satisfied and no hook ran.
    pub applied: bool,
}

impl Transition {
    pub fn message(&self) -> String {
        if self.applied {
            format!("plugin {}", self.op.past_tense())
        } else if self.to == self.op.target() || self.op == Operation::Load {
            format!("plugin already {}", self.op.past_tense())
        } else {
            format!("plugin is {}; nothing to {}", self.to, self.op)
        }
    }
}

/// Owns the single lifecycle state of a plugin process.
///
/// Transitions are serialized by an async gate, so overlapping calls from the
/// host queue up instead of interleaving. Reads go through a watch channel and
/// never wait for a transition in progress.
pub struct LifecycleController<P> {
    plugin: Arc<P>,
    state: watch::Sender<LifecycleState>,
    gate: Mutex<()>,
    config: LifecycleConfig,
}

impl<P: RemotePlugin> LifecycleController<P> {
    pub fn new(plugin: P, config: &LifecycleConfig) -> Self {
        let (state, _) = watch::channel(LifecycleState::Unloaded);
        Self {
            plugin: Arc::new(plugin),
            state,
            gate: Mutex::new(()),
            config: config.clone(),
        }
    }

    pub fn plugin(&self) -> &P {
        &self.plugin
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    pub async fn apply(&self, op: Operation) -> Result<Transition, TransitionError> {
        match op {
            Operation::Load => self.load().await,
            Operation::Start => self.start().await,
            Operation::Stop => self.stop().await,
            Operation::Unload => Ok(self.unload().await),
        }
    }

    pub async fn load(&self) -> Result<Transition, TransitionError> {
        let _gate = self.gate.lock().await;
        let from = self.state();
        if from != LifecycleState::Unloaded {
            return Ok(self.skip(Operation::Load, from));
        }
        self.run_hook(Operation::Load)
            .await
            .map_err(|err| self.fail(Operation::Load, err))?;
        Ok(self.commit(Operation::Load, from, "applied"))
    }

    pub async fn start(&self) -> Result<Transition, TransitionError> {
        let _gate = self.gate.lock().await;
        let from = self.state();
        match from {
            LifecycleState::Started => return Ok(self.skip(Operation::Start, from)),
            LifecycleState::Unloaded => {
                let err = TransitionError::NotLoaded {
                    op: Operation::Start,
                    state: from,
                };
                self.record_failure(Operation::Start, &err.to_string());
                return Err(err);
            }
            LifecycleState::Loaded | LifecycleState::Stopped => {}
        }
        self.run_hook(Operation::Start)
            .await
            .map_err(|err| self.fail(Operation::Start, err))?;
        Ok(self.commit(Operation::Start, from, "applied"))
    }

    pub async fn stop(&self) -> Result<Transition, TransitionError> {
        let _gate = self.gate.lock().await;
        let from = self.state();
        if from != LifecycleState::Started {
            return Ok(self.skip(Operation::Stop, from));
        }
        self.run_hook(Operation::Stop)
            .await
            .map_err(|err| self.fail(Operation::Stop, err))?;
        Ok(self.commit(Operation::Stop, from, "applied"))
    }

    /// Tears the plugin down. Always ends in `UNLOADED`; cleanup failures are
    /// logged and dropped because the process exits right after.
    pub async fn unload(&self) -> Transition {
        let _gate = self.gate.lock().await;
        let from = self.state();
        if from == LifecycleState::Unloaded {
            return self.skip(Operation::Unload, from);
        }

        if from == LifecycleState::Started {
            tracing::warn!("unload requested while started; stopping first");
            let stopped: anyhow::Result<()> = self.run_hook(Operation::Stop).await;
            if let Err(err) = stopped {
                let message = format!("{err:#}");
                tracing::warn!(error = %message, "stop before unload failed");
            }
        }

        let cleanup: anyhow::Result<()> = self.run_hook(Operation::Unload).await;
        let outcome = match cleanup {
            Ok(()) => "applied",
            Err(err) => {
                let message = format!("{err:#}");
                tracing::warn!(error = %message, "unload cleanup failed; plugin unloaded anyway");
                "cleanup_error"
            }
        };
        self.commit(Operation::Unload, from, outcome)
    }

    /// Base report from the current flags, extended by the plugin.
    pub async fn health(&self) -> HealthReport {
        let state = self.state();
        let base = HealthReport::new(state.is_loaded(), state.is_started());
        let fallback = base.clone();
        let plugin = Arc::clone(&self.plugin);
        match tokio::spawn(async move { plugin.health(base).await }).await {
            Ok(mut report) => {
                report.loaded = state.is_loaded();
                report.started = state.is_started();
                report
            }
            Err(err) => {
                tracing::warn!(error = %err, "health hook failed; returning base report");
                fallback
            }
        }
    }

    /// Runs a hook on its own task so a panic in plugin code surfaces as an error.
    async fn run_hook(&self, op: Operation) -> anyhow::Result<()> {
        let plugin = Arc::clone(&self.plugin);
        let started = Instant::now();
        let hook = tokio::spawn(async move {
            match op {
                Operation::Load => plugin.on_load().await,
                Operation::Start => plugin.on_start().await,
                Operation::Stop => plugin.on_stop().await,
                Operation::Unload => plugin.on_unload().await,
            }
        });
        let outcome = match hook.await {
            Ok(result) => result,
            Err(err) if err.is_panic() => Err(anyhow!("{op} hook panicked")),
            Err(err) => Err(anyhow!("{op} hook did not complete: {err}")),
        };

        let elapsed = started.elapsed();
        if let Some(budget) = self.config.budget(op) {
            if elapsed > budget {
                tracing::warn!(
                    op = %op,
                    elapsed_ms = elapsed.as_millis() as u64,
                    budget_ms = budget.as_millis() as u64,
                    "lifecycle hook exceeded its time budget"
                );
            }
        }
        outcome
    }

    /// Publishes the target state. `outcome` labels the single counter bump.
    fn commit(&self, op: Operation, from: LifecycleState, outcome: &'static str) -> Transition {
        let to = op.target();
        self.state.send_replace(to);
        tracing::info!(op = %op, from = %from, to = %to, outcome, "lifecycle transition");
        metrics::counter!(
            "tether_lifecycle_transitions_total",
            "op" => op.as_str(),
            "outcome" => outcome
        )
        .increment(1);
        Transition {
            op,
            from,
            to,
            applied: true,
        }
    }

    fn skip(&self, op: Operation, state: LifecycleState) -> Transition {
        tracing::debug!(op = %op, state = %state, "lifecycle operation already satisfied");
        metrics::counter!(
            "tether_lifecycle_transitions_total",
            "op" => op.as_str(),
            "outcome" => "skipped"
        )
        .increment(1);
        Transition {
            op,
            from: state,
            to: state,
            applied: false,
        }
    }

    fn fail(&self, op: Operation, err: anyhow::Error) -> TransitionError {
        let message = format!("{err:#}");
        self.record_failure(op, &message);
        TransitionError::Hook { op, message }
    }

    fn record_failure(&self, op: Operation, message: &str) {
        tracing::warn!(op = %op, state = %self.state(), error = %message, "lifecycle transition failed");
        metrics::counter!(
            "tether_lifecycle_transitions_total",
            "op" => op.as_str(),
            "outcome" => "error"
        )
        .increment(1);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::fmt;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering::SeqCst};
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;
    use tracing::field::{Field, Visit};
    use tracing::{Event, Level, Subscriber};
    use tracing_subscriber::layer::{Context, SubscriberExt};
    use tracing_subscriber::Layer;

    use super::*;

    /// Keeps every event emitted while installed, with its fields rendered.
    #[derive(Clone, Default)]
    struct Captured(Arc<StdMutex<Vec<(Level, BTreeMap<&'static str, String>)>>>);

    #[derive(Default)]
    struct Fields(BTreeMap<&'static str, String>);

    impl Visit for Fields {
        fn record_str(&mut self, field: &Field, value: &str) {
            self.0.insert(field.name(), value.to_string());
        }

        fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
            self.0.insert(field.name(), format!("{value:?}"));
        }
    }

    impl<S: Subscriber> Layer<S> for Captured {
        fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
            let mut fields = Fields::default();
            event.record(&mut fields);
            self.0.lock().unwrap().push((*event.metadata().level(), fields.0));
        }
    }

    impl Captured {
        fn matching(&self, level: Level, message: &str) -> Vec<BTreeMap<&'static str, String>> {
            self.0
                .lock()
                .unwrap()
                .iter()
                .filter(|(lvl, fields)| {
                    *lvl == level
                        && fields.get("message").is_some_and(|m| m.starts_with(message))
                })
                .map(|(_, fields)| fields.clone())
                .collect()
        }
    }

    #[derive(Default)]
    struct Probe {
        loads: AtomicUsize,
        starts: AtomicUsize,
        stops: AtomicUsize,
        unloads: AtomicUsize,
        fail_load: AtomicBool,
        panic_start: AtomicBool,
        fail_unload: AtomicBool,
    }

    #[async_trait]
    impl RemotePlugin for Probe {
        async fn on_load(&self) -> anyhow::Result<()> {
            self.loads.fetch_add(1, SeqCst);
            if self.fail_load.load(SeqCst) {
                anyhow::bail!("database unavailable");
            }
            Ok(())
        }

        async fn on_start(&self) -> anyhow::Result<()> {
            if self.panic_start.load(SeqCst) {
                panic!("worker pool exploded");
            }
            self.starts.fetch_add(1, SeqCst);
            Ok(())
        }

        async fn on_stop(&self) -> anyhow::Result<()> {
            self.stops.fetch_add(1, SeqCst);
            Ok(())
        }

        async fn on_unload(&self) -> anyhow::Result<()> {
            self.unloads.fetch_add(1, SeqCst);
            if self.fail_unload.load(SeqCst) {
                anyhow::bail!("flush failed");
            }
            Ok(())
        }

        async fn health(&self, report: HealthReport) -> HealthReport {
            report.with_field("loads", self.loads.load(SeqCst))
        }
    }

    fn controller() -> LifecycleController<Probe> {
        LifecycleController::new(Probe::default(), &LifecycleConfig::default())
    }

    #[tokio::test]
    async fn repeated_load_is_a_noop() {
        let lifecycle = controller();
        assert!(lifecycle.load().await.unwrap().applied);
        for _ in 0..3 {
            let transition = lifecycle.load().await.unwrap();
            assert!(!transition.applied);
            assert_eq!(transition.message(), "plugin already loaded");
        }
        assert_eq!(lifecycle.state(), LifecycleState::Loaded);
        assert_eq!(lifecycle.plugin().loads.load(SeqCst), 1);
    }

    #[tokio::test]
    async fn start_before_load_is_rejected() {
        let lifecycle = controller();
        let err = lifecycle.start().await.unwrap_err();
        assert!(matches!(err, TransitionError::NotLoaded { .. }));
        assert_eq!(lifecycle.state(), LifecycleState::Unloaded);
        assert_eq!(lifecycle.plugin().starts.load(SeqCst), 0);
    }

    #[tokio::test]
    async fn stop_start_cycles_repeat() {
        let lifecycle = controller();
        lifecycle.load().await.unwrap();
        lifecycle.start().await.unwrap();
        for _ in 0..3 {
            let stopped = lifecycle.stop().await.unwrap();
            assert_eq!(stopped.from, LifecycleState::Started);
            assert_eq!(stopped.to, LifecycleState::Stopped);
            assert!(!lifecycle.stop().await.unwrap().applied);
            let started = lifecycle.start().await.unwrap();
            assert_eq!(started.to, LifecycleState::Started);
        }
        assert_eq!(lifecycle.plugin().starts.load(SeqCst), 4);
        assert_eq!(lifecycle.plugin().stops.load(SeqCst), 3);
    }

    #[tokio::test]
    async fn stop_without_start_leaves_state_alone() {
        let lifecycle = controller();
        lifecycle.load().await.unwrap();
        let transition = lifecycle.stop().await.unwrap();
        assert!(!transition.applied);
        assert_eq!(transition.message(), "plugin is LOADED; nothing to stop");
        assert_eq!(lifecycle.state(), LifecycleState::Loaded);
        assert_eq!(lifecycle.plugin().stops.load(SeqCst), 0);
    }

    #[tokio::test]
    async fn failed_load_keeps_previous_state() {
        let lifecycle = controller();
        lifecycle.plugin().fail_load.store(true, SeqCst);
        let err = lifecycle.load().await.unwrap_err();
        assert_eq!(
            err,
            TransitionError::Hook {
                op: Operation::Load,
                message: "database unavailable".into(),
            }
        );
        assert_eq!(lifecycle.state(), LifecycleState::Unloaded);

        lifecycle.plugin().fail_load.store(false, SeqCst);
        assert!(lifecycle.load().await.unwrap().applied);
    }

    #[tokio::test]
    async fn panicking_hook_is_reported_as_error() {
        let lifecycle = controller();
        lifecycle.load().await.unwrap();
        lifecycle.plugin().panic_start.store(true, SeqCst);
        let err = lifecycle.start().await.unwrap_err();
        assert!(err.to_string().contains("panicked"));
        assert_eq!(lifecycle.state(), LifecycleState::Loaded);
    }

    #[tokio::test]
    async fn unload_swallows_cleanup_failure() {
        let lifecycle = controller();
        lifecycle.plugin().fail_unload.store(true, SeqCst);
        lifecycle.load().await.unwrap();
        lifecycle.start().await.unwrap();
        lifecycle.stop().await.unwrap();

        let transition = lifecycle.unload().await;
        assert!(transition.applied);
        assert_eq!(lifecycle.state(), LifecycleState::Unloaded);
        assert_eq!(lifecycle.plugin().unloads.load(SeqCst), 1);

        assert!(!lifecycle.unload().await.applied);
        assert_eq!(lifecycle.plugin().unloads.load(SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_cleanup_is_logged_and_counted_once() {
        let captured = Captured::default();
        let _guard =
            tracing::subscriber::set_default(tracing_subscriber::registry().with(captured.clone()));

        let lifecycle = controller();
        lifecycle.plugin().fail_unload.store(true, SeqCst);
        lifecycle.load().await.unwrap();
        assert!(lifecycle.unload().await.applied);

        let warnings = captured.matching(Level::WARN, "unload cleanup failed");
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0]["error"].contains("flush failed"));

        let transitions: Vec<_> = captured
            .matching(Level::INFO, "lifecycle transition")
            .into_iter()
            .filter(|fields| fields["op"] == "unload")
            .collect();
        assert_eq!(transitions.len(), 1);
        assert_eq!(transitions[0]["outcome"], "cleanup_error");
    }

    #[tokio::test]
    async fn clean_unload_is_counted_as_applied() {
        let captured = Captured::default();
        let _guard =
            tracing::subscriber::set_default(tracing_subscriber::registry().with(captured.clone()));

        let lifecycle = controller();
        lifecycle.load().await.unwrap();
        lifecycle.unload().await;

        assert!(captured.matching(Level::WARN, "unload cleanup failed").is_empty());
        let unloads: Vec<_> = captured
            .matching(Level::INFO, "lifecycle transition")
            .into_iter()
            .filter(|fields| fields["op"] == "unload")
            .collect();
        assert_eq!(unloads.len(), 1);
        assert_eq!(unloads[0]["outcome"], "applied");
    }

    #[tokio::test]
    async fn unload_while_started_stops_first() {
        let lifecycle = controller();
        lifecycle.load().await.unwrap();
        lifecycle.start().await.unwrap();
        lifecycle.unload().await;
        assert_eq!(lifecycle.state(), LifecycleState::Unloaded);
        assert_eq!(lifecycle.plugin().stops.load(SeqCst), 1);
        assert_eq!(lifecycle.plugin().unloads.load(SeqCst), 1);
    }

    #[tokio::test]
    async fn health_reports_flags_and_plugin_fields() {
        let lifecycle = controller();
        let report = lifecycle.health().await;
        assert!(!report.loaded && !report.started);

        lifecycle.load().await.unwrap();
        lifecycle.start().await.unwrap();
        let report = lifecycle.health().await;
        assert_eq!(report.status, "ok");
        assert!(report.loaded && report.started);
        assert_eq!(report.extra["loads"], 1);
        assert_eq!(lifecycle.state(), LifecycleState::Started);
    }

    #[tokio::test]
    async fn subscribers_observe_transitions() {
        let lifecycle = controller();
        let mut rx = lifecycle.subscribe();
        lifecycle.load().await.unwrap();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), LifecycleState::Loaded);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_loads_run_the_hook_once() {
        let lifecycle = Arc::new(controller());
        let mut calls = tokio::task::JoinSet::new();
        for _ in 0..8 {
            let lifecycle = Arc::clone(&lifecycle);
            calls.spawn(async move { lifecycle.load().await });
        }
        while let Some(result) = calls.join_next().await {
            assert!(result.unwrap().is_ok());
        }
        assert_eq!(lifecycle.state(), LifecycleState::Loaded);
        assert_eq!(lifecycle.plugin().loads.load(SeqCst), 1);
    }
}
