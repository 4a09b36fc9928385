//! `rollbook-recon`: name-based entity reconciliation engine.
//!
//! Pure engine crate: receives raw tables, returns matches, a resolution
//! session, and the merged set. File formats live in `rollbook-io`.

pub mod config;
pub mod engine;
pub mod error;
pub mod finalize;
pub mod funding;
pub mod matcher;
pub mod model;
pub mod normalize;
pub mod session;

pub use config::RollbookConfig;
pub use engine::{finalize, prepare, upload, Export, Ingest, Inputs, PendingResolution, Prepared, UploadOutcome};
pub use error::{ExportError, FinalizeError, IngestionError, ReconError, SessionError};
pub use finalize::Finalizer;
pub use matcher::{match_by_name, NamePolicy};
pub use model::{Dataset, Match, MergedSet, PendingPayload, RawTable, Record, Role, Selection};
pub use session::{ReconciliationSession, SharedSession};
