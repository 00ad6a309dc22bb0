use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

/// A scalar value supplied by a crawler or read back from the store.
///
/// Values are opaque to the engine: they are bound as statement parameters and
/// compared by their canonical text form (see [`FieldValue::lookup_key`]).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Integer(i64),
    Real(f64),
    Text(String),
}

impl FieldValue {
    /// Converts a JSON value. `null` means "not provided" and yields `None`.
    ///
    /// Booleans are stored as 0/1, arrays and objects as their JSON text.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::Bool(b) => Some(Self::Integer(i64::from(*b))),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Some(Self::Integer(i)),
                None => n.as_f64().map(Self::Real),
            },
            Value::String(s) => Some(Self::Text(s.clone())),
            other => Some(Self::Text(other.to_string())),
        }
    }

    /// Canonical form used for match-key equality and reference lookups.
    ///
    /// `Integer(7)` and `Text("7")` share a key, the same way the store's
    /// column affinity treats them when comparing.
    pub fn lookup_key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer(i) => write!(f, "{i}"),
            Self::Real(r) => write!(f, "{r}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<i32> for FieldValue {
    fn from(value: i32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        Self::Real(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl ToSql for FieldValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Self::Integer(i) => ToSqlOutput::from(*i),
            Self::Real(r) => ToSqlOutput::from(*r),
            Self::Text(s) => ToSqlOutput::from(s.as_str()),
        })
    }
}

impl FromSql for FieldValue {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value {
            ValueRef::Integer(i) => Ok(Self::Integer(i)),
            ValueRef::Real(r) => Ok(Self::Real(r)),
            ValueRef::Text(bytes) => std::str::from_utf8(bytes)
                .map(|s| Self::Text(s.to_string()))
                .map_err(|e| FromSqlError::Other(Box::new(e))),
            ValueRef::Null | ValueRef::Blob(_) => Err(FromSqlError::InvalidType),
        }
    }
}

/// One row ready for a bulk statement, ordered like the write shape.
pub type Row = Vec<FieldValue>;

/// A raw record as harvested by a crawler: field name to value.
///
/// Absent fields and JSON `null`s are the same thing here: "not provided".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    values: HashMap<String, FieldValue>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style setter, mostly handy in tests and fixtures.
    pub fn with(mut self, field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.values.insert(field.into(), value.into());
        self
    }

    pub fn set(&mut self, field: impl Into<String>, value: impl Into<FieldValue>) {
        self.values.insert(field.into(), value.into());
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.values.get(field)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn from_json_object(object: &serde_json::Map<String, Value>) -> Self {
        let values = object
            .iter()
            .filter_map(|(field, value)| {
                FieldValue::from_json(value).map(|v| (field.clone(), v))
            })
            .collect();
        Self { values }
    }
}

impl TryFrom<Value> for Record {
    type Error = crate::error::UpsertError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(object) => Ok(Self::from_json_object(&object)),
            other => Err(crate::error::UpsertError::Config(format!(
                "expected a JSON object per record, got {other}"
            ))),
        }
    }
}

/// The match-key tuple of one record in canonical form.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MatchKey(Vec<String>);

impl MatchKey {
    pub fn from_values<'a>(values: impl IntoIterator<Item = &'a FieldValue>) -> Self {
        Self(values.into_iter().map(FieldValue::lookup_key).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_null_fields_are_not_provided() {
        let record = Record::try_from(json!({
            "id": 7,
            "name": "Shirt",
            "description": null,
            "price": 12.5,
            "active": true
        }))
        .unwrap();

        assert_eq!(record.len(), 4);
        assert_eq!(record.get("id"), Some(&FieldValue::Integer(7)));
        assert_eq!(record.get("price"), Some(&FieldValue::Real(12.5)));
        assert_eq!(record.get("active"), Some(&FieldValue::Integer(1)));
        assert!(record.get("description").is_none());
    }

    #[test]
    fn test_non_object_record_is_rejected() {
        assert!(Record::try_from(json!([1, 2])).is_err());
    }

    #[test]
    fn test_match_key_uses_canonical_form() {
        let a = MatchKey::from_values([&FieldValue::Integer(42), &FieldValue::from("x")]);
        let b = MatchKey::from_values([&FieldValue::from("42"), &FieldValue::from("x")]);
        let c = MatchKey::from_values([&FieldValue::Integer(43), &FieldValue::from("x")]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
