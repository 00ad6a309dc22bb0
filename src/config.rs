use crate::descriptor::{RecordDescriptor, Substitution, DEFAULT_PRIMARY_KEY};
use crate::error::{Result, UpsertError};
use crate::store::sqlite::DEFAULT_PAGE_SIZE;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "RECORD_UPSERT_CONFIG";
/// Environment variable overriding `database.path`.
pub const DATABASE_ENV: &str = "RECORD_UPSERT_DATABASE";
pub const DEFAULT_CONFIG_PATH: &str = "upsert.toml";

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub writer: WriterConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub shapes: BTreeMap<String, ShapeConfig>,
}

#[derive(Debug, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_path")]
    pub path: PathBuf,
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

impl DatabaseConfig {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct WriterConfig {
    /// Rows bound into one INSERT/UPDATE statement.
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_log_file")]
    pub file_name: String,
    /// Filter used when `RUST_LOG` is not set.
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: default_log_dir(),
            file_name: default_log_file(),
            filter: default_log_filter(),
        }
    }
}

/// One record shape as written in the config file.
#[derive(Debug, Deserialize)]
pub struct ShapeConfig {
    pub table: String,
    pub fields: Vec<String>,
    #[serde(default)]
    pub match_fields: Vec<String>,
    #[serde(default)]
    pub substitutions: BTreeMap<String, SubstitutionConfig>,
    #[serde(default = "default_true")]
    pub update: bool,
}

#[derive(Debug, Deserialize)]
pub struct SubstitutionConfig {
    pub field: String,
    pub table: Option<String>,
    #[serde(default = "default_primary_key")]
    pub primary_key: String,
}

impl ShapeConfig {
    pub fn to_descriptor(&self) -> Result<RecordDescriptor> {
        let mut builder = RecordDescriptor::builder(self.table.clone())
            .fields(self.fields.iter().cloned())
            .match_fields(self.match_fields.iter().cloned())
            .update_allowed(self.update);
        for (field, rule) in &self.substitutions {
            let mut substitution =
                Substitution::new(rule.field.clone()).with_primary_key(rule.primary_key.clone());
            if let Some(table) = &rule.table {
                substitution = substitution.in_table(table.clone());
            }
            builder = builder.substitute(field.clone(), substitution);
        }
        builder.build()
    }
}

fn default_database_path() -> PathBuf {
    PathBuf::from("data/upsert.db")
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_log_file() -> String {
    "upsert.log".to_string()
}

fn default_log_filter() -> String {
    "record_upsert=info".to_string()
}

fn default_primary_key() -> String {
    DEFAULT_PRIMARY_KEY.to_string()
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Loads `path`, or `$RECORD_UPSERT_CONFIG`, or `upsert.toml`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => std::env::var(CONFIG_ENV)
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH)),
        };
        let config_content = fs::read_to_string(&config_path).map_err(|e| {
            UpsertError::Config(format!(
                "Failed to read config file '{}': {}",
                config_path.display(),
                e
            ))
        })?;

        let mut config = Self::from_toml_str(&config_content)?;
        if let Ok(db) = std::env::var(DATABASE_ENV) {
            if !db.trim().is_empty() {
                config.database.path = PathBuf::from(db);
            }
        }
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.writer.page_size == 0 {
            return Err(UpsertError::Config("writer.page_size must be at least 1".into()));
        }
        for (name, shape) in &self.shapes {
            shape
                .to_descriptor()
                .map_err(|e| UpsertError::Config(format!("shape `{name}`: {e}")))?;
        }
        Ok(())
    }
}
