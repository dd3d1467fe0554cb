//! Prometheus-backed metrics registry and snapshot helpers.
//!
//! # Design
//! - Encapsulates collector registration to keep the public API small.
//! - Exposes only the counters and gauges an update run reports.

use std::sync::Arc;

use prometheus::core::Collector;
use prometheus::{IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use serde::Serialize;

use crate::error::{Result, TelemetryError};

const RUN_UPDATED: &str = "updated";
const RUN_UP_TO_DATE: &str = "up_to_date";
const RUN_FAILED: &str = "failed";

/// Prometheus-backed metrics registry for update runs.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    registry: Registry,
    stages_total: IntCounterVec,
    runs_total: IntCounterVec,
    last_release_timestamp_seconds: IntGauge,
}

/// Point-in-time view of the run counters.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    /// Runs that rebuilt and repackaged the dataset.
    pub runs_updated: u64,
    /// Runs that found the local copy current.
    pub runs_up_to_date: u64,
    /// Runs aborted by a stage failure.
    pub runs_failed: u64,
    /// Publication time of the newest release seen, in unix seconds.
    pub last_release_timestamp_seconds: i64,
}

impl Metrics {
    /// Construct a new metrics registry with the updater collectors registered.
    ///
    /// # Errors
    ///
    /// Returns [`TelemetryError::Collector`] naming the first metric that could not
    /// be built or registered.
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let stages_total = register(
            &registry,
            "updater_stages_total",
            IntCounterVec::new(
                Opts::new(
                    "updater_stages_total",
                    "Update pipeline stage transitions by status",
                ),
                &["stage", "status"],
            ),
        )?;
        let runs_total = register(
            &registry,
            "updater_runs_total",
            IntCounterVec::new(
                Opts::new("updater_runs_total", "Update pipeline runs by outcome"),
                &["outcome"],
            ),
        )?;
        let last_release_timestamp_seconds = register(
            &registry,
            "updater_last_release_timestamp_seconds",
            IntGauge::with_opts(Opts::new(
                "updater_last_release_timestamp_seconds",
                "Publication time of the newest upstream release observed",
            )),
        )?;

        Ok(Self {
            inner: Arc::new(MetricsInner {
                registry,
                stages_total,
                runs_total,
                last_release_timestamp_seconds,
            }),
        })
    }

    /// Increment the stage transition counter.
    pub fn inc_stage(&self, stage: &str, status: &str) {
        self.inner
            .stages_total
            .with_label_values(&[stage, status])
            .inc();
    }

    /// Increment the run counter for the given outcome.
    pub fn inc_run(&self, outcome: &str) {
        self.inner.runs_total.with_label_values(&[outcome]).inc();
    }

    /// Record the publication time of the newest upstream release.
    pub fn set_last_release_timestamp(&self, seconds: i64) {
        self.inner.last_release_timestamp_seconds.set(seconds);
    }

    /// Render the metrics registry using the Prometheus text exposition format.
    ///
    /// # Errors
    ///
    /// Returns [`TelemetryError::Exposition`] if the registry cannot be encoded.
    pub fn render(&self) -> Result<String> {
        TextEncoder::new()
            .encode_to_string(&self.inner.registry.gather())
            .map_err(|source| TelemetryError::Exposition { source })
    }

    /// Take a point-in-time snapshot of the run counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            runs_updated: self.run_count(RUN_UPDATED),
            runs_up_to_date: self.run_count(RUN_UP_TO_DATE),
            runs_failed: self.run_count(RUN_FAILED),
            last_release_timestamp_seconds: self.inner.last_release_timestamp_seconds.get(),
        }
    }

    fn run_count(&self, outcome: &str) -> u64 {
        self.inner.runs_total.with_label_values(&[outcome]).get()
    }
}

fn register<C>(
    registry: &Registry,
    metric: &'static str,
    built: prometheus::Result<C>,
) -> Result<C>
where
    C: Collector + Clone + 'static,
{
    let collector = built.map_err(|source| TelemetryError::Collector { metric, source })?;
    registry
        .register(Box::new(collector.clone()))
        .map_err(|source| TelemetryError::Collector { metric, source })?;
    Ok(collector)
}
