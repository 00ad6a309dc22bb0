// Reconcile-and-write path: resolve references, classify, flush.

pub mod existence;
pub mod reconciler;
pub mod resolver;
pub mod runner;
pub mod writer;

pub use reconciler::{ReconcileStats, Reconciler, Reconciliation};
pub use resolver::{Resolution, SubstitutionResolver};
pub use runner::{BatchOutcome, UpsertPipeline};
pub use writer::{BatchWriter, FlushSummary};
