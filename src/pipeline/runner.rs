use crate::config::Config;
use crate::error::{Result, UpsertError};
use crate::metrics::{time_operation, upsert::BATCH_DURATION, UpsertMetrics};
use crate::pipeline::reconciler::{ReconcileStats, Reconciler, Reconciliation};
use crate::pipeline::writer::{BatchWriter, FlushSummary};
use crate::registry::ShapeRegistry;
use crate::store::SqliteStore;
use crate::types::Record;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, info_span};
use uuid::Uuid;

/// Result of one successfully processed batch.
#[derive(Debug, Clone, Serialize)]
pub struct BatchOutcome {
    pub batch_id: Uuid,
    pub shape: String,
    pub started_at: DateTime<Utc>,
    pub created: usize,
    pub updated: usize,
    pub stats: ReconcileStats,
}

/// Owns the store connection and routes each batch through reconcile + flush.
///
/// Batches are processed one at a time on the caller's thread. The connection
/// lives exactly as long as the pipeline: [`UpsertPipeline::close`] releases it
/// explicitly, dropping the pipeline releases it too.
pub struct UpsertPipeline {
    store: SqliteStore,
    shapes: ShapeRegistry,
}

impl UpsertPipeline {
    pub fn new(store: SqliteStore, shapes: ShapeRegistry) -> Self {
        Self { store, shapes }
    }

    pub fn open(config: &Config) -> Result<Self> {
        let shapes = ShapeRegistry::from_config(config)?;
        let store = SqliteStore::open(&config.database.path, config.database.busy_timeout())?
            .with_page_size(config.writer.page_size);
        info!("Pipeline opened with {} shapes", shapes.len());
        Ok(Self::new(store, shapes))
    }

    pub fn store(&self) -> &SqliteStore {
        &self.store
    }

    pub fn shapes(&self) -> &ShapeRegistry {
        &self.shapes
    }

    /// Classifies a batch without writing anything.
    pub fn reconcile(&self, shape: &str, records: &[Record]) -> Result<Reconciliation> {
        let descriptor = self.shapes.get(shape)?;
        Reconciler::new(&self.store).reconcile(descriptor, records)
    }

    /// Reconciles and flushes one batch.
    ///
    /// Failures come back as [`UpsertError::Batch`] carrying the shape, batch id
    /// and size so the caller can log the batch and move on to the next one.
    pub fn process_batch(&mut self, shape: &str, records: &[Record]) -> Result<BatchOutcome> {
        let batch_id = Uuid::new_v4();
        let started_at = Utc::now();
        let span = info_span!("batch", shape = %shape, batch_id = %batch_id, records = records.len());
        let _enter = span.enter();
        let _timing = time_operation(BATCH_DURATION).with_label("shape", shape);

        match self.run(shape, records) {
            Ok((summary, stats)) => {
                info!(
                    created = summary.created,
                    updated = summary.updated,
                    duplicates = stats.duplicates,
                    skipped_updates = stats.skipped_updates,
                    "Batch flushed"
                );
                Ok(BatchOutcome {
                    batch_id,
                    shape: shape.to_string(),
                    started_at,
                    created: summary.created,
                    updated: summary.updated,
                    stats,
                })
            }
            Err(source) => {
                UpsertMetrics::record_batch_failed(shape);
                error!(
                    statement = source.statement().unwrap_or("-"),
                    "Batch failed: {}", source
                );
                Err(UpsertError::Batch {
                    shape: shape.to_string(),
                    batch_id,
                    records: records.len(),
                    source: Box::new(source),
                })
            }
        }
    }

    fn run(&mut self, shape: &str, records: &[Record]) -> Result<(FlushSummary, ReconcileStats)> {
        let descriptor = self.shapes.get(shape)?;
        let plan = Reconciler::new(&self.store).reconcile(descriptor, records)?;
        UpsertMetrics::record_reconciled(descriptor.table(), &plan.stats);
        let summary = BatchWriter::new(&mut self.store).flush(descriptor, &plan)?;
        Ok((summary, plan.stats))
    }

    /// Releases the connection.
    pub fn close(self) -> Result<()> {
        info!("Closing pipeline");
        self.store.close()
    }
}
