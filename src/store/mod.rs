// Store boundary: the reads the reconciler needs and the bulk writes the writer issues.

pub mod sql;
pub mod sqlite;

pub use sqlite::SqliteStore;

use crate::error::Result;
use crate::types::{FieldValue, Row};

/// Read-only queries issued while reconciling a batch.
pub trait KeyLookup {
    /// Returns `(primary_key, referenced_field)` pairs for every row of `table`
    /// whose `referenced_field` is one of `values`, in the order the store yields them.
    fn select_references(
        &self,
        table: &str,
        primary_key: &str,
        referenced_field: &str,
        values: &[FieldValue],
    ) -> Result<Vec<(FieldValue, FieldValue)>>;

    /// Whether a row of `table` matches every `(field, value)` pair.
    fn exists(&self, table: &str, matches: &[(&str, &FieldValue)]) -> Result<bool>;
}

/// Bulk writes. Each call is one transaction: it commits everything or nothing.
pub trait BatchSink {
    fn create(&mut self, table: &str, fields: &[String], rows: &[Row]) -> Result<usize>;

    fn update(
        &mut self,
        table: &str,
        fields: &[String],
        match_fields: &[String],
        rows: &[Row],
    ) -> Result<usize>;
}
