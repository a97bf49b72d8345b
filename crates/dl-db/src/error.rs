//! Error types for dl-db

use thiserror::Error;

/// Warehouse and extraction errors
#[derive(Error, Debug)]
pub enum DbError {
    /// Connection error (D001)
    #[error("[D001] Database connection failed: {0}")]
    ConnectionError(String),

    /// Query execution error (D002)
    #[error("[D002] SQL execution failed: {0}")]
    ExecutionError(String),

    /// Table not found (D003)
    #[error("[D003] Table or view not found: {0}")]
    TableNotFound(String),

    /// Source extraction error (D004)
    #[error("[D004] Extraction failed for '{entity}': {message}")]
    ExtractError { entity: String, message: String },

    /// Transactional write rolled back (D005)
    #[error("[D005] Load into '{table}' rolled back: {message}")]
    LoadWrite { table: String, message: String },

    /// Mutex poisoned (D006)
    #[error("[D006] Database mutex poisoned: {0}")]
    MutexPoisoned(String),

    /// Stored value could not be read back (D007)
    #[error("[D007] Cannot decode column '{column}': {message}")]
    Decode { column: String, message: String },
}

/// Result type alias for DbError
pub type DbResult<T> = Result<T, DbError>;

impl From<duckdb::Error> for DbError {
    fn from(err: duckdb::Error) -> Self {
        // duckdb::Error carries no structured catalog variants, so classify
        // on the message with narrow patterns.
        let msg = err.to_string();
        if msg.contains("Table with name")
            || msg.contains("Table or view with name")
            || (msg.contains("Catalog Error") && msg.contains("Table") && msg.contains("not found"))
        {
            DbError::TableNotFound(msg)
        } else {
            DbError::ExecutionError(msg)
        }
    }
}
