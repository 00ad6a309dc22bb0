//! Reconcile & write phase metrics

use crate::metrics::{phase_metric, MetricDoc, MetricType, PhaseMetrics};
use crate::pipeline::reconciler::ReconcileStats;

pub const ROWS_CREATED: &str = phase_metric!(counter, "write", "rows_created");
pub const ROWS_UPDATED: &str = phase_metric!(counter, "write", "rows_updated");
pub const DUPLICATES_DROPPED: &str = phase_metric!(counter, "reconcile", "duplicates_dropped");
pub const UPDATES_SKIPPED: &str = phase_metric!(counter, "reconcile", "updates_skipped");
pub const EXISTENCE_CHECKS: &str = phase_metric!(counter, "reconcile", "existence_checks");
pub const BATCHES_FAILED: &str = phase_metric!(counter, "batch", "failed");
pub const BATCH_DURATION: &str = phase_metric!(histogram, "batch", "duration_seconds");

pub struct UpsertMetrics;

impl UpsertMetrics {
    pub fn record_created(table: &str, rows: usize) {
        if rows > 0 {
            ::metrics::counter!(ROWS_CREATED, "table" => table.to_string()).increment(rows as u64);
        }
    }

    pub fn record_updated(table: &str, rows: usize) {
        if rows > 0 {
            ::metrics::counter!(ROWS_UPDATED, "table" => table.to_string()).increment(rows as u64);
        }
    }

    pub fn record_reconciled(table: &str, stats: &ReconcileStats) {
        let table = table.to_string();
        ::metrics::counter!(DUPLICATES_DROPPED, "table" => table.clone())
            .increment(stats.duplicates as u64);
        ::metrics::counter!(UPDATES_SKIPPED, "table" => table.clone())
            .increment(stats.skipped_updates as u64);
        ::metrics::counter!(EXISTENCE_CHECKS, "table" => table)
            .increment(stats.existence_checks as u64);
    }

    pub fn record_batch_failed(shape: &str) {
        ::metrics::counter!(BATCHES_FAILED, "shape" => shape.to_string()).increment(1);
    }
}

impl PhaseMetrics for UpsertMetrics {
    fn register_metrics() {
        use metrics::{counter, histogram};

        let _ = counter!(ROWS_CREATED);
        let _ = counter!(ROWS_UPDATED);
        let _ = counter!(DUPLICATES_DROPPED);
        let _ = counter!(UPDATES_SKIPPED);
        let _ = counter!(EXISTENCE_CHECKS);
        let _ = counter!(BATCHES_FAILED);
        let _ = histogram!(BATCH_DURATION);
    }

    fn phase_name() -> &'static str {
        "upsert"
    }

    fn metrics_documentation() -> Vec<MetricDoc> {
        vec![
            MetricDoc {
                name: ROWS_CREATED,
                metric_type: MetricType::Counter,
                help: "Rows inserted by bulk creates",
                labels: vec!["table"],
            },
            MetricDoc {
                name: ROWS_UPDATED,
                metric_type: MetricType::Counter,
                help: "Rows changed by bulk updates",
                labels: vec!["table"],
            },
            MetricDoc {
                name: DUPLICATES_DROPPED,
                metric_type: MetricType::Counter,
                help: "Records dropped because their match key repeated within a batch",
                labels: vec!["table"],
            },
            MetricDoc {
                name: UPDATES_SKIPPED,
                metric_type: MetricType::Counter,
                help: "Existing records dropped because the shape disallows updates",
                labels: vec!["table"],
            },
            MetricDoc {
                name: EXISTENCE_CHECKS,
                metric_type: MetricType::Counter,
                help: "Existence queries issued while reconciling",
                labels: vec!["table"],
            },
            MetricDoc {
                name: BATCHES_FAILED,
                metric_type: MetricType::Counter,
                help: "Batches aborted by a lookup, existence or write failure",
                labels: vec!["shape"],
            },
            MetricDoc {
                name: BATCH_DURATION,
                metric_type: MetricType::Histogram,
                help: "Wall time to reconcile and flush one batch",
                labels: vec!["shape"],
            },
        ]
    }
}
