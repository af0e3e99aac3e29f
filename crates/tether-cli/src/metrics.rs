//! Bundled demo plugin: collects metric reports and serves a dump.

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Map, Value};
use tether_core::{Config, PluginRuntime, PluginRuntimeBuilder, RemotePlugin};
use tether_sdk::{HealthReport, ServiceCall};
use tokio::{sync::watch, task::JoinHandle};
use tower::service_fn;

const DEFAULT_FLUSH_INTERVAL_SECS: u64 = 60;
const DEFAULT_MAX_SERIES: u64 = 1_000;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Series {
    pub count: u64,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
    pub last: f64,
    pub tags: Map<String, Value>,
}

#[derive(Debug, Default)]
pub struct MetricStore {
    series: BTreeMap<String, Series>,
    reports: u64,
    max_series: usize,
}

impl MetricStore {
    pub fn new(max_series: usize) -> Self {
        Self {
            max_series,
            ..Self::default()
        }
    }

    pub fn record(&mut self, name: &str, value: f64, tags: Map<String, Value>) -> Result<&Series> {
        if !self.series.contains_key(name) && self.series.len() >= self.max_series {
            bail!("series limit of {} reached; `{name}` rejected", self.max_series);
        }
        self.reports += 1;
        let series = self
            .series
            .entry(name.to_string())
            .and_modify(|series| {
                series.count += 1;
                series.sum += value;
                series.min = series.min.min(value);
                series.max = series.max.max(value);
                series.last = value;
            })
            .or_insert_with(|| Series {
                count: 1,
                sum: value,
                min: value,
                max: value,
                last: value,
                tags: Map::new(),
            });
        series.tags.extend(tags);
        Ok(series)
    }

    pub fn series_count(&self) -> usize {
        self.series.len()
    }

    pub fn reports(&self) -> u64 {
        self.reports
    }

    pub fn dump(&self) -> Value {
        json!({
            "reports": self.reports,
            "series": self.series,
        })
    }

    pub fn clear(&mut self) {
        self.series.clear();
        self.reports = 0;
    }
}

struct Flusher {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

pub struct MetricsPlugin {
    store: Arc<Mutex<MetricStore>>,
    flush_interval_secs: u64,
    flusher: Mutex<Option<Flusher>>,
}

impl MetricsPlugin {
    pub fn from_config(config: &Config) -> Result<Self> {
        let flush_interval_secs = config
            .setting_u64("flush_interval_secs")?
            .unwrap_or(DEFAULT_FLUSH_INTERVAL_SECS);
        let max_series = config
            .setting_u64("max_series")?
            .unwrap_or(DEFAULT_MAX_SERIES);
        let max_series = usize::try_from(max_series).context("max_series is too large")?;
        Ok(Self {
            store: Arc::new(Mutex::new(MetricStore::new(max_series))),
            flush_interval_secs,
            flusher: Mutex::new(None),
        })
    }

    pub fn store(&self) -> Arc<Mutex<MetricStore>> {
        Arc::clone(&self.store)
    }

    async fn halt_flusher(&self) {
        let flusher = lock(&self.flusher).take();
        if let Some(flusher) = flusher {
            flusher.stop.send_replace(true);
            if let Err(err) = flusher.handle.await {
                tracing::warn!(error = %err, "metrics flusher ended abnormally");
            }
        }
    }
}

#[async_trait]
impl RemotePlugin for MetricsPlugin {
    async fn on_load(&self) -> Result<()> {
        if self.flush_interval_secs == 0 {
            bail!("settings.flush_interval_secs must be greater than zero");
        }
        tracing::info!(flush_interval_secs = self.flush_interval_secs, "metrics plugin loaded");
        Ok(())
    }

    async fn on_start(&self) -> Result<()> {
        let mut slot = lock(&self.flusher);
        if slot.is_some() {
            return Ok(());
        }
        let (stop, mut stopped) = watch::channel(false);
        let store = Arc::clone(&self.store);
        let period = Duration::from_secs(self.flush_interval_secs);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = stopped.changed() => break,
                    _ = ticker.tick() => {
                        let (series, reports) = summarize(&store);
                        tracing::info!(series, reports, "metrics summary");
                    }
                }
            }
        });
        *slot = Some(Flusher { stop, handle });
        Ok(())
    }

    async fn on_stop(&self) -> Result<()> {
        self.halt_flusher().await;
        Ok(())
    }

    async fn on_unload(&self) -> Result<()> {
        self.halt_flusher().await;
        let (series, reports) = summarize(&self.store);
        lock(&self.store).clear();
        tracing::info!(series, reports, "metrics discarded on unload");
        Ok(())
    }

    async fn health(&self, report: HealthReport) -> HealthReport {
        let (series, reports) = summarize(&self.store);
        report
            .with_field("series", series)
            .with_field("reports", reports)
    }
}

/// Builds the runtime with both metrics services bound.
pub fn runtime(config: &Config) -> Result<PluginRuntime<MetricsPlugin>> {
    let plugin = MetricsPlugin::from_config(config)?;
    let report_store = plugin.store();
    let dump_store = plugin.store();
    let runtime = PluginRuntimeBuilder::new(config.identity())
        .service(
            "metrics.report",
            "/metrics/report",
            "POST",
            Some("Report metric value with tags"),
            service_fn(move |call: ServiceCall| {
                let store = Arc::clone(&report_store);
                async move { report(&store, &call) }
            }),
        )?
        .service(
            "metrics.dump",
            "/metrics/dump",
            "GET",
            Some("Dump all metrics"),
            service_fn(move |_call: ServiceCall| {
                let store = Arc::clone(&dump_store);
                async move { Ok::<_, anyhow::Error>(lock(&store).dump()) }
            }),
        )?
        .build(plugin, &config.lifecycle);
    Ok(runtime)
}

fn report(store: &Mutex<MetricStore>, call: &ServiceCall) -> Result<Value> {
    let name = call
        .kwarg("name")
        .and_then(Value::as_str)
        .context("kwargs.name must be a string")?;
    let value = call
        .kwarg("value")
        .and_then(Value::as_f64)
        .context("kwargs.value must be a number")?;
    let tags = match call.kwarg("tags") {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(tags)) => tags.clone(),
        Some(_) => bail!("kwargs.tags must be an object"),
    };

    let mut store = lock(store);
    let series = store.record(name, value, tags)?;
    Ok(json!({ "status": "ok", "series": name, "count": series.count }))
}

fn summarize(store: &Mutex<MetricStore>) -> (usize, u64) {
    let store = lock(store);
    (store.series_count(), store.reports())
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
