//! Meta database connection wrapper.
//!
//! [`MetaDb`] owns the DuckDB [`Connection`] behind a mutex so the run
//! tracker, checkpoint store and quality log can share it across
//! concurrently running entities.

use crate::error::{MetaError, MetaResult};
use crate::migration::run_migrations;
use duckdb::Connection;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Connection to `target/meta.duckdb` (or an in-memory database).
pub struct MetaDb {
    conn: Mutex<Connection>,
}

impl MetaDb {
    /// Open (or create) the meta database at `path` and run pending migrations.
    pub fn open(path: &Path) -> MetaResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| MetaError::ConnectionError(format!("{e}: {}", parent.display())))?;
        }
        let conn = Connection::open(path)
            .map_err(|e| MetaError::ConnectionError(format!("{e}: {}", path.display())))?;
        run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory meta database with all migrations applied.
    pub fn open_memory() -> MetaResult<Self> {
        let conn =
            Connection::open_in_memory().map_err(|e| MetaError::ConnectionError(e.to_string()))?;
        run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open by path string, `:memory:` selecting an in-memory database
    pub fn new(path: &str) -> MetaResult<Self> {
        if path == ":memory:" {
            Self::open_memory()
        } else {
            Self::open(Path::new(path))
        }
    }

    /// Lock the connection for a sequence of statements.
    pub fn conn(&self) -> MetaResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| MetaError::LockPoisoned)
    }

    /// Execute `body` within a `BEGIN` / `COMMIT` transaction, rolling back on
    /// error. The connection stays locked for the whole body.
    pub fn transaction<F, T>(&self, body: F) -> MetaResult<T>
    where
        F: FnOnce(&Connection) -> MetaResult<T>,
    {
        let conn = self.conn()?;
        conn.execute_batch("BEGIN TRANSACTION")
            .map_err(|e| MetaError::TransactionError(format!("BEGIN failed: {e}")))?;

        let result = body(&conn);

        match &result {
            Ok(_) => {
                if let Err(commit_err) = conn.execute_batch("COMMIT") {
                    let _ = conn.execute_batch("ROLLBACK");
                    return Err(MetaError::TransactionError(format!(
                        "COMMIT failed: {commit_err}"
                    )));
                }
            }
            Err(_) => {
                let _ = conn.execute_batch("ROLLBACK");
            }
        }
        result
    }
}

#[cfg(test)]
#[path = "connection_test.rs"]
mod tests;
