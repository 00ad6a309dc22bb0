use crate::descriptor::RecordDescriptor;
use crate::error::Result;
use crate::metrics::UpsertMetrics;
use crate::pipeline::reconciler::Reconciliation;
use crate::store::BatchSink;
use crate::types::Row;
use serde::Serialize;
use tracing::info;

/// Rows written by one flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FlushSummary {
    pub created: usize,
    pub updated: usize,
}

/// Flushes reconciled rows as bulk statements, one transaction per call.
pub struct BatchWriter<'a, S: BatchSink + ?Sized> {
    sink: &'a mut S,
}

impl<'a, S: BatchSink + ?Sized> BatchWriter<'a, S> {
    pub fn new(sink: &'a mut S) -> Self {
        Self { sink }
    }

    /// Bulk insert. Skips the store entirely when there is nothing to write.
    pub fn create(&mut self, table: &str, fields: &[String], rows: &[Row]) -> Result<usize> {
        if rows.is_empty() {
            return Ok(0);
        }
        let created = self.sink.create(table, fields, rows)?;
        info!("Saved to {}: {}", table, rows.len());
        Ok(created)
    }

    /// Bulk update joined on `match_fields`, which must be part of `fields`.
    pub fn update(
        &mut self,
        table: &str,
        fields: &[String],
        match_fields: &[String],
        rows: &[Row],
    ) -> Result<usize> {
        if rows.is_empty() {
            return Ok(0);
        }
        let updated = self.sink.update(table, fields, match_fields, rows)?;
        info!("Updated in {}: {}", table, rows.len());
        Ok(updated)
    }

    /// Writes creates first, then updates.
    pub fn flush(&mut self, descriptor: &RecordDescriptor, plan: &Reconciliation) -> Result<FlushSummary> {
        let table = descriptor.table();
        let created = self.create(table, &plan.fields, &plan.to_create)?;
        UpsertMetrics::record_created(table, created);
        let updated = self.update(table, &plan.fields, descriptor.match_fields(), &plan.to_update)?;
        UpsertMetrics::record_updated(table, updated);
        Ok(FlushSummary { created, updated })
    }
}
