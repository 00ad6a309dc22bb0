use crate::error::{Result, UpsertError};
use crate::store::sql;
use std::collections::{BTreeMap, HashSet};

/// Primary key column assumed for referenced tables unless a rule says otherwise.
pub const DEFAULT_PRIMARY_KEY: &str = "id";

/// How a field's supplied value is translated into another table's primary key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Substitution {
    /// Natural-key column the supplied values are matched against.
    pub referenced_field: String,
    /// Table holding the referenced rows; `None` means the descriptor's own table.
    pub referenced_table: Option<String>,
    /// Column whose value replaces the supplied one.
    pub primary_key: String,
}

impl Substitution {
    pub fn new(referenced_field: impl Into<String>) -> Self {
        Self {
            referenced_field: referenced_field.into(),
            referenced_table: None,
            primary_key: DEFAULT_PRIMARY_KEY.to_string(),
        }
    }

    pub fn in_table(mut self, table: impl Into<String>) -> Self {
        self.referenced_table = Some(table.into());
        self
    }

    pub fn with_primary_key(mut self, primary_key: impl Into<String>) -> Self {
        self.primary_key = primary_key.into();
        self
    }
}

/// Static metadata for one record shape.
///
/// Construct through [`RecordDescriptor::builder`]; a built descriptor is
/// always valid and never changes afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordDescriptor {
    table: String,
    fields: Vec<String>,
    match_fields: Vec<String>,
    substitutions: BTreeMap<String, Substitution>,
    update_allowed: bool,
}

impl RecordDescriptor {
    pub fn builder(table: impl Into<String>) -> DescriptorBuilder {
        DescriptorBuilder {
            table: table.into(),
            fields: Vec::new(),
            match_fields: Vec::new(),
            substitutions: BTreeMap::new(),
            update_allowed: true,
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn match_fields(&self) -> &[String] {
        &self.match_fields
    }

    pub fn is_match_field(&self, field: &str) -> bool {
        self.match_fields.iter().any(|f| f == field)
    }

    pub fn substitution(&self, field: &str) -> Option<&Substitution> {
        self.substitutions.get(field)
    }

    /// Table a substitution rule looks its references up in.
    pub fn referenced_table<'a>(&'a self, rule: &'a Substitution) -> &'a str {
        rule.referenced_table.as_deref().unwrap_or(&self.table)
    }

    pub fn update_allowed(&self) -> bool {
        self.update_allowed
    }
}

pub struct DescriptorBuilder {
    table: String,
    fields: Vec<String>,
    match_fields: Vec<String>,
    substitutions: BTreeMap<String, Substitution>,
    update_allowed: bool,
}

impl DescriptorBuilder {
    pub fn fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn match_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.match_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn substitute(mut self, field: impl Into<String>, rule: Substitution) -> Self {
        self.substitutions.insert(field.into(), rule);
        self
    }

    pub fn update_allowed(mut self, allowed: bool) -> Self {
        self.update_allowed = allowed;
        self
    }

    pub fn build(self) -> Result<RecordDescriptor> {
        let invalid = |reason: String| {
            UpsertError::Config(format!("descriptor for table `{}`: {reason}", self.table))
        };

        if self.table.is_empty() {
            return Err(UpsertError::Config("descriptor table name is empty".into()));
        }
        if self.fields.is_empty() {
            return Err(invalid("field list is empty".into()));
        }

        let mut names = vec![self.table.as_str()];
        for rule in self.substitutions.values() {
            names.push(&rule.referenced_field);
            names.push(&rule.primary_key);
            if let Some(table) = &rule.referenced_table {
                names.push(table);
            }
        }
        names.extend(self.fields.iter().map(String::as_str));
        if let Some(bad) = names.iter().find(|n| !sql::is_identifier(n)) {
            return Err(invalid(format!("`{bad}` is not a plain SQL identifier")));
        }

        let mut seen = HashSet::new();
        if let Some(dup) = self.fields.iter().find(|f| !seen.insert(f.as_str())) {
            return Err(invalid(format!("field `{dup}` is listed twice")));
        }
        let mut seen_match = HashSet::new();
        for field in &self.match_fields {
            if !seen.contains(field.as_str()) {
                return Err(invalid(format!("match field `{field}` is not in the field list")));
            }
            if !seen_match.insert(field.as_str()) {
                return Err(invalid(format!("match field `{field}` is listed twice")));
            }
        }
        if let Some(field) = self.substitutions.keys().find(|f| !seen.contains(f.as_str())) {
            return Err(invalid(format!("substituted field `{field}` is not in the field list")));
        }

        Ok(RecordDescriptor {
            table: self.table,
            fields: self.fields,
            match_fields: self.match_fields,
            substitutions: self.substitutions,
            update_allowed: self.update_allowed,
        })
    }
}
