use crate::error::{Result, UpsertError};
use crate::store::KeyLookup;
use crate::types::FieldValue;
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

/// Outcome of resolving one column of referenced values.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// One primary key per input value, in input order.
    Resolved(Vec<FieldValue>),
    /// The store matched none of the values; the field is dropped for the batch.
    Unmatched,
}

/// Replaces foreign natural keys with the referenced table's primary keys.
pub struct SubstitutionResolver<'a> {
    lookup: &'a dyn KeyLookup,
}

impl<'a> SubstitutionResolver<'a> {
    pub fn new(lookup: &'a dyn KeyLookup) -> Self {
        Self { lookup }
    }

    /// Resolves `values` against `table.referenced_field` with a single query.
    ///
    /// When several rows share a referenced value the first row returned by the
    /// store wins. Parity is checked per value: if at least one value matched,
    /// every value must have matched or the call fails with
    /// [`UpsertError::Resolution`].
    pub fn resolve(
        &self,
        table: &str,
        primary_key: &str,
        referenced_field: &str,
        values: &[FieldValue],
    ) -> Result<Resolution> {
        let mut seen = HashSet::new();
        let unique: Vec<FieldValue> = values
            .iter()
            .filter(|v| seen.insert(v.lookup_key()))
            .cloned()
            .collect();

        let rows = self
            .lookup
            .select_references(table, primary_key, referenced_field, &unique)?;
        if rows.is_empty() {
            debug!(
                "No {}.{} rows match {} values; dropping the field",
                table,
                referenced_field,
                unique.len()
            );
            return Ok(Resolution::Unmatched);
        }

        let mut ids: HashMap<String, FieldValue> = HashMap::with_capacity(rows.len());
        let mut numeric = HashSet::new();
        for (id, referenced) in rows {
            let key = referenced.lookup_key();
            if !matches!(referenced, FieldValue::Text(_)) {
                numeric.insert(key.clone());
            }
            match ids.get(&key) {
                Some(first) if *first != id => warn!(
                    "{}.{} = {} maps to several rows; keeping {} over {}",
                    table, referenced_field, key, first, id
                ),
                Some(_) => {}
                None => {
                    ids.insert(key, id);
                }
            }
        }

        let mut resolved = Vec::with_capacity(values.len());
        let mut unmatched = Vec::new();
        for value in values {
            let key = value.lookup_key();
            let id = ids.get(&key).or_else(|| {
                numeric_key(value)
                    .filter(|k| numeric.contains(k))
                    .and_then(|k| ids.get(&k))
            });
            match id {
                Some(id) => resolved.push(id.clone()),
                None if !unmatched.contains(&key) => unmatched.push(key),
                None => {}
            }
        }

        if !unmatched.is_empty() {
            return Err(UpsertError::Resolution {
                table: table.to_string(),
                field: referenced_field.to_string(),
                expected: values.len(),
                unmatched,
            });
        }
        Ok(Resolution::Resolved(resolved))
    }
}

/// Key of numeric-looking text in the form the store reports numbers, so
/// `"1.50"` finds a REAL `1.5` and `"007"` an INTEGER `7`. Only consulted
/// against referenced values the store returned as numbers.
fn numeric_key(value: &FieldValue) -> Option<String> {
    let FieldValue::Text(text) = value else {
        return None;
    };
    let text = text.trim();
    if let Ok(i) = text.parse::<i64>() {
        return Some(FieldValue::Integer(i).lookup_key());
    }
    text.parse::<f64>()
        .ok()
        .filter(|r| r.is_finite())
        .map(|r| FieldValue::Real(r).lookup_key())
}
