//! Meta database for dimload.
//!
//! A DuckDB store at `target/meta.duckdb` holding pipeline runs,
//! extraction checkpoints, quality check results and the rejected-record
//! log. The schema lives under `dl_meta` and is migrated on open.

pub mod checkpoint;
pub mod connection;
pub mod ddl;
pub mod error;
pub mod migration;
pub mod quality;
pub mod rejected;
pub(crate) mod row_helpers;
pub mod runs;

pub use checkpoint::{Advance, Checkpoint, CheckpointStore};
pub use connection::MetaDb;
pub use error::{MetaError, MetaResult};
pub use quality::StoredQualityCheck;
pub use rejected::{RejectPhase, Rejection, StoredRejection};
pub use runs::{NewRun, RunCounts, RunRecord, RunStatus};
