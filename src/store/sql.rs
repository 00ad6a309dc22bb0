//! Statement builders for the bulk operations.
//!
//! Identifiers cannot be bound as parameters, so every table and column name
//! must pass [`is_identifier`] before it gets here (descriptors enforce this)
//! and is double-quoted in the generated text. Values are always `?` placeholders.

use once_cell::sync::Lazy;
use regex::Regex;

/// Alias of the incoming row-set in bulk updates.
pub const UPDATE_ALIAS: &str = "tmp";

static IDENTIFIER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier pattern is valid")
});

/// Characters of a statement kept in error messages and logs.
pub const STATEMENT_PREVIEW_CHARS: usize = 240;

/// Shortens long generated statements for error messages: placeholder lists
/// can run to tens of thousands of `?`.
pub fn abbreviate(statement: &str) -> String {
    match statement.char_indices().nth(STATEMENT_PREVIEW_CHARS) {
        Some((cut, _)) => format!(
            "{}... [{} chars total]",
            &statement[..cut],
            statement.chars().count()
        ),
        None => statement.to_string(),
    }
}

pub fn is_identifier(name: &str) -> bool {
    IDENTIFIER.is_match(name)
}

pub fn quote(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn column_list<S: AsRef<str>>(fields: &[S]) -> String {
    fields
        .iter()
        .map(|f| quote(f.as_ref()))
        .collect::<Vec<_>>()
        .join(", ")
}

fn tuple(width: usize) -> String {
    format!("({})", vec!["?"; width].join(", "))
}

/// `(?, ?), (?, ?), ...` for `rows` tuples of `width` placeholders.
pub fn values_list(width: usize, rows: usize) -> String {
    vec![tuple(width); rows].join(", ")
}

pub fn select_references(table: &str, primary_key: &str, field: &str, values: usize) -> String {
    format!(
        "SELECT {}, {} FROM {} WHERE {} IN {}",
        quote(primary_key),
        quote(field),
        quote(table),
        quote(field),
        tuple(values)
    )
}

pub fn exists<S: AsRef<str>>(table: &str, match_fields: &[S]) -> String {
    let condition = match_fields
        .iter()
        .map(|f| format!("{} = ?", quote(f.as_ref())))
        .collect::<Vec<_>>()
        .join(" AND ");
    format!("SELECT EXISTS (SELECT 1 FROM {} WHERE {})", quote(table), condition)
}

pub fn insert<S: AsRef<str>>(table: &str, fields: &[S], rows: usize) -> String {
    format!(
        "INSERT INTO {} ({}) VALUES {}",
        quote(table),
        column_list(fields),
        values_list(fields.len(), rows)
    )
}

/// Join-based multi-row update.
///
/// The VALUES list is exposed as `tmp(fields...)` through a CTE, which is how
/// SQLite spells `UPDATE ... FROM (VALUES ...) AS tmp(...)`.
pub fn update<S: AsRef<str>>(table: &str, fields: &[S], match_fields: &[S], rows: usize) -> String {
    let target = quote(table);
    let assignments = fields
        .iter()
        .map(|f| {
            let column = quote(f.as_ref());
            format!("{column} = {UPDATE_ALIAS}.{column}")
        })
        .collect::<Vec<_>>()
        .join(", ");
    let condition = match_fields
        .iter()
        .map(|f| {
            let column = quote(f.as_ref());
            format!("{target}.{column} = {UPDATE_ALIAS}.{column}")
        })
        .collect::<Vec<_>>()
        .join(" AND ");
    format!(
        "WITH {UPDATE_ALIAS} ({}) AS (VALUES {}) UPDATE {target} SET {assignments} FROM {UPDATE_ALIAS} WHERE {condition}",
        column_list(fields),
        values_list(fields.len(), rows)
    )
}
