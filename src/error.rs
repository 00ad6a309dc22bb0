use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum UpsertError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown record shape: {0}")]
    UnknownShape(String),

    #[error("Substitution for {table}.{field} left {} of {expected} values unmatched: {}", .unmatched.len(), .unmatched.join(", "))]
    Resolution {
        table: String,
        field: String,
        expected: usize,
        unmatched: Vec<String>,
    },

    #[error("Reference lookup on {table} failed ({statement}): {source}")]
    Lookup {
        table: String,
        statement: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("Existence check on {table} failed ({statement}): {source}")]
    ExistenceCheck {
        table: String,
        statement: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("Match field {table}.{field} is missing from the write shape of this batch")]
    IncompleteMatchKey { table: String, field: String },

    #[error("Write of {rows} rows to {table} failed ({statement}): {source}")]
    Write {
        table: String,
        statement: String,
        rows: usize,
        #[source]
        source: rusqlite::Error,
    },

    #[error("Batch {batch_id} of shape `{shape}` ({records} records) failed: {source}")]
    Batch {
        shape: String,
        batch_id: Uuid,
        records: usize,
        #[source]
        source: Box<UpsertError>,
    },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("JSON deserialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl UpsertError {
    /// The statement that failed, when the error came from the store.
    pub fn statement(&self) -> Option<&str> {
        match self {
            Self::Lookup { statement, .. }
            | Self::ExistenceCheck { statement, .. }
            | Self::Write { statement, .. } => Some(statement),
            Self::Batch { source, .. } => source.statement(),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, UpsertError>;
