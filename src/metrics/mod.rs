//! Metrics for the reconcile/write path
//!
//! Metric names follow `upsert_{phase}_{name}` and are registered up front so a
//! rendered snapshot lists them even before the first batch runs.

pub mod core;
pub mod upsert;

pub use self::core::{time_operation, TimingGuard};
pub use upsert::UpsertMetrics;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use tracing::{info, warn};

static HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Installs the Prometheus recorder and registers every metric. Idempotent.
pub fn init_metrics() {
    if HANDLE.get().is_some() {
        return;
    }
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            if HANDLE.set(handle).is_ok() {
                UpsertMetrics::register_metrics();
                info!(
                    "Metrics recorder installed ({} metrics registered)",
                    UpsertMetrics::metrics_documentation().len()
                );
            }
        }
        Err(e) => warn!("Failed to install metrics recorder: {}", e),
    }
}

/// Prometheus text for everything recorded so far, if the recorder is installed.
pub fn render() -> Option<String> {
    HANDLE.get().map(PrometheusHandle::render)
}

/// Trait for phase-specific metrics collections
pub trait PhaseMetrics {
    /// Touch every metric of the phase so it exists before first use
    fn register_metrics();

    fn phase_name() -> &'static str;

    fn metrics_documentation() -> Vec<MetricDoc>;
}

/// Documentation for a single metric
#[derive(Debug, Clone)]
pub struct MetricDoc {
    pub name: &'static str,
    pub metric_type: MetricType,
    pub help: &'static str,
    pub labels: Vec<&'static str>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricType {
    Counter,
    Histogram,
}

/// Builds `upsert_{phase}_{name}` (counters get a `_total` suffix)
macro_rules! phase_metric {
    (counter, $phase:literal, $name:literal) => {
        concat!("upsert_", $phase, "_", $name, "_total")
    };
    (histogram, $phase:literal, $name:literal) => {
        concat!("upsert_", $phase, "_", $name)
    };
}

pub(crate) use phase_metric;
