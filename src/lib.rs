pub mod config;
pub mod descriptor;
pub mod error;
pub mod input;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod registry;
pub mod store;
pub mod types;

pub use config::Config;
pub use descriptor::{RecordDescriptor, Substitution};
pub use error::{Result, UpsertError};
pub use pipeline::{BatchOutcome, Reconciler, Reconciliation, UpsertPipeline};
pub use registry::ShapeRegistry;
pub use store::SqliteStore;
pub use types::{FieldValue, Record, Row};
