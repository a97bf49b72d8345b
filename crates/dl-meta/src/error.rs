//! Error types for the meta database.

use dl_core::Watermark;
use thiserror::Error;

/// Meta database errors.
#[derive(Error, Debug)]
pub enum MetaError {
    /// Failed to open or create the meta database (M001).
    #[error("[M001] Meta database connection failed: {0}")]
    ConnectionError(String),

    /// Schema migration failed (M002).
    #[error("[M002] Meta database migration failed: {0}")]
    MigrationError(String),

    /// SQL execution error inside the meta database (M003).
    #[error("[M003] Meta database query failed: {0}")]
    QueryError(String),

    /// Transaction management error (M004).
    #[error("[M004] Meta database transaction failed: {0}")]
    TransactionError(String),

    /// Proposed watermark is not after the committed one (M005).
    #[error("[M005] Checkpoint for '{entity}' would regress from {current} to {proposed}")]
    CheckpointRegression {
        entity: String,
        current: Watermark,
        proposed: Watermark,
    },

    /// Another advance for the entity is in flight or already landed (M006).
    #[error("[M006] Checkpoint conflict for '{entity}': {message}")]
    CheckpointConflict { entity: String, message: String },

    /// A run for the entity is still marked running (M007).
    #[error("[M007] Run {run_id} for '{entity}' is already in progress")]
    RunAlreadyInProgress { entity: String, run_id: String },

    /// Terminal runs are immutable (M008).
    #[error("[M008] Run {run_id} is already {status}")]
    TerminalRunState { run_id: String, status: String },

    /// No run with this id (M009).
    #[error("[M009] Run not found: {0}")]
    RunNotFound(String),

    /// Connection mutex poisoned by a panicking holder (M010).
    #[error("[M010] Meta database lock poisoned")]
    LockPoisoned,

    /// DuckDB driver error with preserved source chain (M011).
    #[error("[M011] DuckDB error: {0}")]
    DuckDb(#[from] duckdb::Error),
}

/// Result type alias for [`MetaError`].
pub type MetaResult<T> = Result<T, MetaError>;
