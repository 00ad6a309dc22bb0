use crate::error::Result;
use crate::store::KeyLookup;
use crate::types::FieldValue;
use std::cell::Cell;
use tracing::trace;

/// Answers "is this match key already stored?" and counts how often it was asked.
///
/// A failed query is an error for the caller, never a "not found".
pub struct ExistenceChecker<'a> {
    lookup: &'a dyn KeyLookup,
    checks: Cell<usize>,
}

impl<'a> ExistenceChecker<'a> {
    pub fn new(lookup: &'a dyn KeyLookup) -> Self {
        Self {
            lookup,
            checks: Cell::new(0),
        }
    }

    pub fn exists(&self, table: &str, matches: &[(&str, &FieldValue)]) -> Result<bool> {
        self.checks.set(self.checks.get() + 1);
        let found = self.lookup.exists(table, matches)?;
        trace!(table, found, "existence check");
        Ok(found)
    }

    pub fn checks(&self) -> usize {
        self.checks.get()
    }
}
