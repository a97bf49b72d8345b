//! Applies pending meta schema versions on open.

use crate::ddl::MIGRATIONS;
use crate::error::{MetaError, MetaResult};
use duckdb::Connection;

fn ensure_version_table(conn: &Connection) -> MetaResult<()> {
    conn.execute_batch(
        "CREATE SCHEMA IF NOT EXISTS dl_meta;
         CREATE TABLE IF NOT EXISTS dl_meta.schema_version (
             version    INTEGER NOT NULL,
             applied_at TIMESTAMP NOT NULL DEFAULT now()
         );",
    )
    .map_err(|e| MetaError::MigrationError(format!("cannot create schema_version: {e}")))
}

/// Highest applied version, 0 for a fresh database
pub fn current_version(conn: &Connection) -> MetaResult<i32> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM dl_meta.schema_version",
        [],
        |row| row.get(0),
    )
    .map_err(|e| MetaError::MigrationError(format!("cannot read schema version: {e}")))
}

/// Apply every migration newer than the recorded version.
///
/// Each step and its version row commit together.
pub fn run_migrations(conn: &Connection) -> MetaResult<()> {
    ensure_version_table(conn)?;
    let current = current_version(conn)?;

    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        log::debug!("Applying meta migration v{:03}", migration.version);
        let sql = format!(
            "BEGIN TRANSACTION;\n{}\nINSERT INTO dl_meta.schema_version (version) VALUES ({});\nCOMMIT;",
            migration.sql, migration.version
        );
        if let Err(e) = conn.execute_batch(&sql) {
            let _ = conn.execute_batch("ROLLBACK");
            return Err(MetaError::MigrationError(format!(
                "v{:03} failed: {e}",
                migration.version
            )));
        }
    }
    Ok(())
}
