use crate::descriptor::RecordDescriptor;
use crate::error::{Result, UpsertError};
use crate::pipeline::existence::ExistenceChecker;
use crate::pipeline::resolver::{Resolution, SubstitutionResolver};
use crate::store::KeyLookup;
use crate::types::{FieldValue, MatchKey, Record, Row};
use serde::Serialize;
use std::collections::HashSet;
use tracing::{debug, warn};

/// What happened to the records of one batch besides being classified.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileStats {
    pub records: usize,
    /// Declared fields left out of the write shape, in declared order.
    pub dropped_fields: Vec<String>,
    /// Records skipped because an earlier record had the same match key.
    pub duplicates: usize,
    /// Existing records skipped because the shape does not allow updates.
    pub skipped_updates: usize,
    pub existence_checks: usize,
}

/// Create/update split for one batch, ready for the writer.
///
/// Every row is ordered like `fields`. The value is built per batch and
/// consumed by the writer; nothing is kept between batches.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Reconciliation {
    pub fields: Vec<String>,
    pub to_create: Vec<Row>,
    pub to_update: Vec<Row>,
    pub stats: ReconcileStats,
}

impl Reconciliation {
    pub fn is_empty(&self) -> bool {
        self.to_create.is_empty() && self.to_update.is_empty()
    }
}

/// Decides, per record, whether it is new, an update, or dropped.
///
/// Only reads from the store; the writer does all the writing.
pub struct Reconciler<'a> {
    lookup: &'a dyn KeyLookup,
}

impl<'a> Reconciler<'a> {
    pub fn new(lookup: &'a dyn KeyLookup) -> Self {
        Self { lookup }
    }

    pub fn reconcile(&self, descriptor: &RecordDescriptor, records: &[Record]) -> Result<Reconciliation> {
        let mut result = Reconciliation::default();
        result.stats.records = records.len();
        if records.is_empty() {
            return Ok(result);
        }

        let resolver = SubstitutionResolver::new(self.lookup);
        let mut columns: Vec<Vec<FieldValue>> = Vec::new();
        // Pre-substitution values of the match fields, keyed by field name.
        let mut raw_match_columns: Vec<(&str, Vec<FieldValue>)> = Vec::new();

        for field in descriptor.fields() {
            // A field is written only if every record in the batch supplied it.
            let Some(raw) = column(records, field) else {
                debug!("Field {} not supplied by every record; dropped for this batch", field);
                result.stats.dropped_fields.push(field.clone());
                continue;
            };

            if descriptor.is_match_field(field) {
                raw_match_columns.push((field.as_str(), raw.clone()));
            }

            let values = match descriptor.substitution(field) {
                Some(rule) => {
                    let table = descriptor.referenced_table(rule);
                    match resolver.resolve(table, &rule.primary_key, &rule.referenced_field, &raw)? {
                        Resolution::Resolved(ids) => ids,
                        Resolution::Unmatched => {
                            warn!(
                                "No {}.{} matches for field {}; dropped for this batch",
                                table, rule.referenced_field, field
                            );
                            result.stats.dropped_fields.push(field.clone());
                            continue;
                        }
                    }
                }
                None => raw,
            };

            result.fields.push(field.clone());
            columns.push(values);
        }

        // Every match field must survive, even when nothing else did.
        let mut key_columns = Vec::with_capacity(descriptor.match_fields().len());
        for field in descriptor.match_fields() {
            let position = result.fields.iter().position(|f| f == field);
            let raw = raw_match_columns.iter().find(|(name, _)| *name == field.as_str());
            match (position, raw) {
                (Some(position), Some((_, raw))) => key_columns.push((field.as_str(), position, raw)),
                _ => {
                    return Err(UpsertError::IncompleteMatchKey {
                        table: descriptor.table().to_string(),
                        field: field.clone(),
                    })
                }
            }
        }

        if result.fields.is_empty() {
            warn!(
                "No field of {} survived for {} records; nothing to write",
                descriptor.table(),
                records.len()
            );
            return Ok(result);
        }

        let rows = transpose(&columns, records.len());

        if key_columns.is_empty() {
            result.to_create = rows;
            return Ok(result);
        }

        let checker = ExistenceChecker::new(self.lookup);
        let mut processed = HashSet::new();
        for (index, row) in rows.into_iter().enumerate() {
            let key = MatchKey::from_values(key_columns.iter().map(|&(_, _, raw)| &raw[index]));
            if !processed.insert(key) {
                result.stats.duplicates += 1;
                continue;
            }

            let matches: Vec<(&str, &FieldValue)> = key_columns
                .iter()
                .map(|&(field, position, _)| (field, &row[position]))
                .collect();
            let found = checker.exists(descriptor.table(), &matches)?;

            if !found {
                result.to_create.push(row);
            } else if descriptor.update_allowed() {
                result.to_update.push(row);
            } else {
                result.stats.skipped_updates += 1;
            }
        }
        result.stats.existence_checks = checker.checks();

        debug!(
            table = descriptor.table(),
            create = result.to_create.len(),
            update = result.to_update.len(),
            duplicates = result.stats.duplicates,
            skipped_updates = result.stats.skipped_updates,
            "Reconciled batch"
        );
        Ok(result)
    }
}

/// The values of `field` across all records, or `None` if any record lacks it.
fn column(records: &[Record], field: &str) -> Option<Vec<FieldValue>> {
    records.iter().map(|r| r.get(field).cloned()).collect()
}

fn transpose(columns: &[Vec<FieldValue>], len: usize) -> Vec<Row> {
    (0..len)
        .map(|i| columns.iter().map(|c| c[i].clone()).collect())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::Substitution;
    use std::cell::RefCell;
    use std::collections::HashMap;

    /// Existing keys per table plus a reference table; records every existence query.
    #[derive(Default)]
    struct FakeStore {
        existing: Vec<Vec<FieldValue>>,
        references: HashMap<String, FieldValue>,
        checks: RefCell<Vec<Vec<FieldValue>>>,
        fail_exists: bool,
    }

    impl KeyLookup for FakeStore {
        fn select_references(
            &self,
            _table: &str,
            _primary_key: &str,
            _referenced_field: &str,
            values: &[FieldValue],
        ) -> Result<Vec<(FieldValue, FieldValue)>> {
            Ok(values
                .iter()
                .filter_map(|v| {
                    self.references
                        .get(&v.lookup_key())
                        .map(|id| (id.clone(), v.clone()))
                })
                .collect())
        }

        fn exists(&self, table: &str, matches: &[(&str, &FieldValue)]) -> Result<bool> {
            if self.fail_exists {
                return Err(UpsertError::ExistenceCheck {
                    table: table.to_string(),
                    statement: "SELECT EXISTS (...)".into(),
                    source: rusqlite::Error::InvalidQuery,
                });
            }
            let key: Vec<FieldValue> = matches.iter().map(|(_, v)| (*v).clone()).collect();
            self.checks.borrow_mut().push(key.clone());
            Ok(self.existing.contains(&key))
        }
    }

    fn products() -> RecordDescriptor {
        RecordDescriptor::builder("products_product")
            .fields(["id", "name", "cat"])
            .match_fields(["id"])
            .build()
            .unwrap()
    }

    #[test]
    fn test_empty_batch_yields_empty_result() {
        let store = FakeStore::default();
        let result = Reconciler::new(&store).reconcile(&products(), &[]).unwrap();
        assert!(result.is_empty());
        assert!(result.fields.is_empty());
    }

    #[test]
    fn test_first_occurrence_of_a_key_wins() {
        let store = FakeStore::default();
        let records = vec![
            Record::new().with("id", 1).with("name", "A").with("cat", "X"),
            Record::new().with("id", 1).with("name", "A2").with("cat", "Y"),
        ];

        let result = Reconciler::new(&store).reconcile(&products(), &records).unwrap();
        assert_eq!(
            result.to_create,
            vec![vec![FieldValue::from(1), FieldValue::from("A"), FieldValue::from("X")]]
        );
        assert_eq!(result.stats.duplicates, 1);
        assert_eq!(store.checks.borrow().len(), 1);
    }

    #[test]
    fn test_field_missing_from_one_record_is_dropped_batch_wide() {
        let store = FakeStore::default();
        let records = vec![
            Record::new().with("id", 1).with("name", "A").with("cat", "X"),
            Record::new().with("id", 2).with("name", "B"),
        ];

        let result = Reconciler::new(&store).reconcile(&products(), &records).unwrap();
        assert_eq!(result.fields, vec!["id".to_string(), "name".to_string()]);
        assert_eq!(result.stats.dropped_fields, vec!["cat".to_string()]);
        assert_eq!(result.to_create[0], vec![FieldValue::from(1), FieldValue::from("A")]);
    }

    #[test]
    fn test_undeclared_fields_are_ignored() {
        let store = FakeStore::default();
        let records = vec![Record::new()
            .with("id", 1)
            .with("name", "A")
            .with("cat", "X")
            .with("color", "red")];

        let result = Reconciler::new(&store).reconcile(&products(), &records).unwrap();
        assert_eq!(result.fields.len(), 3);
        assert_eq!(result.to_create[0].len(), 3);
    }

    #[test]
    fn test_substituted_key_checks_resolved_value() {
        let store = FakeStore {
            existing: vec![vec![7.into(), 11.into()]],
            references: HashMap::from([("shoes".to_string(), 11.into())]),
            ..Default::default()
        };
        let descriptor = RecordDescriptor::builder("products_product_categories")
            .fields(["product_id", "category_id"])
            .match_fields(["product_id", "category_id"])
            .substitute("category_id", Substitution::new("slug").in_table("products_category"))
            .update_allowed(false)
            .build()
            .unwrap();
        let records = vec![
            Record::new().with("product_id", 7).with("category_id", "shoes"),
            Record::new().with("product_id", 8).with("category_id", "shoes"),
        ];

        let result = Reconciler::new(&store).reconcile(&descriptor, &records).unwrap();
        assert_eq!(result.to_create, vec![vec![FieldValue::from(8), FieldValue::from(11)]]);
        assert!(result.to_update.is_empty());
        assert_eq!(result.stats.skipped_updates, 1);
        assert_eq!(store.checks.borrow()[0], vec![FieldValue::from(7), FieldValue::from(11)]);
    }

    #[test]
    fn test_unresolved_match_field_rejects_batch() {
        let store = FakeStore::default();
        let descriptor = RecordDescriptor::builder("products_product_tags")
            .fields(["product_id", "tag_id"])
            .match_fields(["product_id", "tag_id"])
            .substitute("tag_id", Substitution::new("code").in_table("products_tag"))
            .build()
            .unwrap();
        let records = vec![Record::new().with("product_id", 1).with("tag_id", "nope")];

        let err = Reconciler::new(&store).reconcile(&descriptor, &records).unwrap_err();
        assert!(matches!(err, UpsertError::IncompleteMatchKey { field, .. } if field == "tag_id"));
    }

    #[test]
    fn test_batch_without_any_declared_field_fails_on_match_key() {
        let store = FakeStore::default();
        let records = vec![
            Record::new().with("sku", "A-1").with("colour", "red"),
            Record::new().with("sku", "A-2"),
        ];

        let err = Reconciler::new(&store).reconcile(&products(), &records).unwrap_err();
        assert!(matches!(err, UpsertError::IncompleteMatchKey { field, .. } if field == "id"));
        assert!(store.checks.borrow().is_empty());
    }

    #[test]
    fn test_batch_without_any_declared_field_is_empty_when_unkeyed() {
        let store = FakeStore::default();
        let descriptor = RecordDescriptor::builder("products_productimage")
            .fields(["product_id", "url"])
            .build()
            .unwrap();
        let records = vec![Record::new().with("sku", "A-1")];

        let result = Reconciler::new(&store).reconcile(&descriptor, &records).unwrap();
        assert!(result.is_empty());
        assert_eq!(result.stats.dropped_fields.len(), 2);
    }

    #[test]
    fn test_existence_failure_aborts_instead_of_creating() {
        let store = FakeStore {
            fail_exists: true,
            ..Default::default()
        };
        let records = vec![Record::new().with("id", 1).with("name", "A").with("cat", "X")];

        let err = Reconciler::new(&store).reconcile(&products(), &records).unwrap_err();
        assert!(matches!(err, UpsertError::ExistenceCheck { .. }));
    }
}
