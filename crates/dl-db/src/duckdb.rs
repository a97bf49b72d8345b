//! DuckDB warehouse implementation

use crate::error::{DbError, DbResult};
use crate::row::{
    date_param, placeholder, quote_ident, read_timestamp, read_value, select_expr,
    timestamp_param, to_sql,
};
use crate::traits::{FactWriteSummary, Warehouse};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dl_core::{
    DimensionRow, DimensionSnapshot, EntityDescriptor, FactRow, MergeOp, MergePlan, NaturalKey,
};
use duckdb::types::Value as SqlValue;
use duckdb::{params_from_iter, Connection};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Columns selected ahead of the entity fields when reading dimension rows
const DIMENSION_PREFIX: &str = "surrogate_key, natural_key, CAST(effective_from AS VARCHAR), \
                                CAST(effective_to AS VARCHAR), is_current";
const PREFIX_LEN: usize = 5;

/// DuckDB-backed warehouse
pub struct DuckDbWarehouse {
    conn: Mutex<Connection>,
}

impl DuckDbWarehouse {
    /// Create a new in-memory DuckDB warehouse
    pub fn in_memory() -> DbResult<Self> {
        let conn =
            Connection::open_in_memory().map_err(|e| DbError::ConnectionError(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open a warehouse file, creating it if needed
    pub fn from_path(path: &Path) -> DbResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                DbError::ConnectionError(format!("{}: {e}", parent.display()))
            })?;
        }
        let conn = Connection::open(path)
            .map_err(|e| DbError::ConnectionError(format!("{e}: {}", path.display())))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create from path string (handles :memory: special case)
    pub fn new(path: &str) -> DbResult<Self> {
        if path == ":memory:" {
            Self::in_memory()
        } else {
            Self::from_path(Path::new(path))
        }
    }

    fn lock(&self) -> DbResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| DbError::MutexPoisoned(e.to_string()))
    }

    /// Run `body` inside `BEGIN` / `COMMIT`, rolling back on error.
    ///
    /// Any failure surfaces as [`DbError::LoadWrite`] for `table`.
    fn with_transaction<F, T>(&self, table: &str, body: F) -> DbResult<T>
    where
        F: FnOnce(&Connection) -> DbResult<T>,
    {
        let conn = self.lock()?;
        let load_write = |message: String| DbError::LoadWrite {
            table: table.to_string(),
            message,
        };

        conn.execute_batch("BEGIN TRANSACTION")
            .map_err(|e| load_write(format!("BEGIN failed: {e}")))?;

        match body(&conn) {
            Ok(value) => {
                if let Err(commit_err) = conn.execute_batch("COMMIT") {
                    let _ = conn.execute_batch("ROLLBACK");
                    return Err(load_write(format!("COMMIT failed: {commit_err}")));
                }
                Ok(value)
            }
            Err(err) => {
                let _ = conn.execute_batch("ROLLBACK");
                Err(match err {
                    DbError::LoadWrite { .. } => err,
                    other => load_write(other.to_string()),
                })
            }
        }
    }

    fn create_schema_for(conn: &Connection, table: &str) -> DbResult<()> {
        if let Some((schema, _)) = table.rsplit_once('.') {
            conn.execute_batch(&format!("CREATE SCHEMA IF NOT EXISTS {schema}"))?;
        }
        Ok(())
    }

    fn dimension_ddl(entity: &EntityDescriptor) -> String {
        let columns: Vec<String> = entity
            .fields
            .iter()
            .map(|f| format!("    {} {}", quote_ident(&f.name), f.field_type.sql_type()))
            .collect();
        format!(
            "CREATE TABLE IF NOT EXISTS {} (
    surrogate_key BIGINT PRIMARY KEY,
    natural_key VARCHAR NOT NULL,
{},
    effective_from TIMESTAMP NOT NULL,
    effective_to TIMESTAMP NOT NULL,
    is_current BOOLEAN NOT NULL,
    dw_created_at TIMESTAMP NOT NULL,
    dw_updated_at TIMESTAMP NOT NULL,
    dw_load_date DATE NOT NULL
)",
            entity.table,
            columns.join(",\n")
        )
    }

    fn fact_ddl(entity: &EntityDescriptor) -> String {
        let mut columns: Vec<String> = entity
            .fields
            .iter()
            .map(|f| {
                let not_null = if entity.dedup_key.contains(&f.name) {
                    " NOT NULL"
                } else {
                    ""
                };
                format!(
                    "    {} {}{}",
                    quote_ident(&f.name),
                    f.field_type.sql_type(),
                    not_null
                )
            })
            .collect();
        for reference in &entity.references {
            columns.push(format!("    {} BIGINT NOT NULL", quote_ident(&reference.column)));
        }
        if let Some(measures) = &entity.measures {
            columns.push(format!("    {} DOUBLE", quote_ident(&measures.total)));
        }
        columns.push("    dw_loaded_at TIMESTAMP NOT NULL".to_string());
        columns.push("    dw_load_date DATE NOT NULL".to_string());
        let key: Vec<String> = entity.dedup_key.iter().map(|k| quote_ident(k)).collect();
        columns.push(format!("    PRIMARY KEY ({})", key.join(", ")));
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n{}\n)",
            entity.table,
            columns.join(",\n")
        )
    }

    fn dimension_select(entity: &EntityDescriptor) -> String {
        let fields: Vec<String> = entity.fields.iter().map(select_expr).collect();
        format!(
            "SELECT {DIMENSION_PREFIX}, {} FROM {}",
            fields.join(", "),
            entity.table
        )
    }

    fn query_rows(
        conn: &Connection,
        entity: &EntityDescriptor,
        sql: &str,
        params: Vec<SqlValue>,
    ) -> DbResult<Vec<DimensionRow>> {
        let mut stmt = conn.prepare(sql)?;
        let mut rows = stmt.query(params_from_iter(params))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(Self::decode_row(entity, row)?);
        }
        Ok(out)
    }

    fn decode_row(entity: &EntityDescriptor, row: &duckdb::Row<'_>) -> DbResult<DimensionRow> {
        let surrogate_key: i64 = row.get(0)?;
        let natural_key: String = row.get(1)?;
        let natural_key = NaturalKey::try_new(natural_key).ok_or_else(|| DbError::Decode {
            column: "natural_key".to_string(),
            message: "empty natural key".to_string(),
        })?;
        let mut attributes = BTreeMap::new();
        for (offset, spec) in entity.fields.iter().enumerate() {
            attributes.insert(spec.name.clone(), read_value(row, PREFIX_LEN + offset, spec)?);
        }
        Ok(DimensionRow {
            surrogate_key,
            natural_key,
            attributes,
            effective_from: read_timestamp(row, 2, "effective_from")?,
            effective_to: read_timestamp(row, 3, "effective_to")?,
            is_current: row.get(4)?,
        })
    }

    fn insert_version(
        conn: &Connection,
        entity: &EntityDescriptor,
        row: &DimensionRow,
        loaded_at: DateTime<Utc>,
    ) -> DbResult<()> {
        let names: Vec<String> = entity.fields.iter().map(|f| quote_ident(&f.name)).collect();
        let holders: Vec<String> = entity
            .fields
            .iter()
            .map(|f| placeholder(f.field_type))
            .collect();
        let sql = format!(
            "INSERT INTO {} (surrogate_key, natural_key, {}, effective_from, effective_to, \
             is_current, dw_created_at, dw_updated_at, dw_load_date)
             VALUES (?, ?, {}, CAST(? AS TIMESTAMP), CAST(? AS TIMESTAMP), ?, \
             CAST(? AS TIMESTAMP), CAST(? AS TIMESTAMP), CAST(? AS DATE))",
            entity.table,
            names.join(", "),
            holders.join(", ")
        );

        let mut params = vec![
            SqlValue::BigInt(row.surrogate_key),
            SqlValue::Text(row.natural_key.to_string()),
        ];
        params.extend(entity.fields.iter().map(|f| to_sql(row.get(&f.name))));
        params.extend([
            timestamp_param(row.effective_from),
            timestamp_param(row.effective_to),
            SqlValue::Boolean(row.is_current),
            timestamp_param(loaded_at),
            timestamp_param(loaded_at),
            date_param(loaded_at),
        ]);
        conn.execute(&sql, params_from_iter(params))?;
        Ok(())
    }

    fn update_attributes(
        conn: &Connection,
        entity: &EntityDescriptor,
        surrogate_key: i64,
        attributes: &BTreeMap<String, dl_core::Value>,
        loaded_at: DateTime<Utc>,
    ) -> DbResult<()> {
        let assignments: Vec<String> = entity
            .fields
            .iter()
            .map(|f| format!("{} = {}", quote_ident(&f.name), placeholder(f.field_type)))
            .collect();
        let sql = format!(
            "UPDATE {} SET {}, dw_updated_at = CAST(? AS TIMESTAMP) \
             WHERE surrogate_key = ? AND is_current",
            entity.table,
            assignments.join(", ")
        );
        let mut params: Vec<SqlValue> = entity
            .fields
            .iter()
            .map(|f| to_sql(attributes.get(&f.name).unwrap_or(&dl_core::Value::Null)))
            .collect();
        params.push(timestamp_param(loaded_at));
        params.push(SqlValue::BigInt(surrogate_key));

        let changed = conn.execute(&sql, params_from_iter(params))?;
        Self::expect_one_current(entity, surrogate_key, changed)
    }

    fn expire_version(
        conn: &Connection,
        entity: &EntityDescriptor,
        surrogate_key: i64,
        effective_to: DateTime<Utc>,
        loaded_at: DateTime<Utc>,
    ) -> DbResult<()> {
        let sql = format!(
            "UPDATE {} SET effective_to = CAST(? AS TIMESTAMP), is_current = false, \
             dw_updated_at = CAST(? AS TIMESTAMP) WHERE surrogate_key = ? AND is_current",
            entity.table
        );
        let changed = conn.execute(
            &sql,
            params_from_iter([
                timestamp_param(effective_to),
                timestamp_param(loaded_at),
                SqlValue::BigInt(surrogate_key),
            ]),
        )?;
        Self::expect_one_current(entity, surrogate_key, changed)
    }

    /// A plan built from a stale snapshot touches a row that is no longer current
    fn expect_one_current(entity: &EntityDescriptor, surrogate_key: i64, changed: usize) -> DbResult<()> {
        if changed == 1 {
            Ok(())
        } else {
            Err(DbError::LoadWrite {
                table: entity.table.clone(),
                message: format!("surrogate key {surrogate_key} is not a current row"),
            })
        }
    }

    fn insert_fact(
        conn: &Connection,
        entity: &EntityDescriptor,
        row: &FactRow,
        loaded_at: DateTime<Utc>,
    ) -> DbResult<usize> {
        let mut names: Vec<String> = entity.fields.iter().map(|f| quote_ident(&f.name)).collect();
        let mut holders: Vec<String> = entity
            .fields
            .iter()
            .map(|f| placeholder(f.field_type))
            .collect();
        let mut params: Vec<SqlValue> = entity
            .fields
            .iter()
            .map(|f| to_sql(row.attributes.get(&f.name).unwrap_or(&dl_core::Value::Null)))
            .collect();

        for reference in &entity.references {
            let key = row.keys.get(&reference.column).ok_or_else(|| DbError::LoadWrite {
                table: entity.table.clone(),
                message: format!(
                    "fact '{}' has no key for column '{}'",
                    row.source_key, reference.column
                ),
            })?;
            names.push(quote_ident(&reference.column));
            holders.push("?".to_string());
            params.push(SqlValue::BigInt(*key));
        }
        if let Some(measures) = &entity.measures {
            names.push(quote_ident(&measures.total));
            holders.push("?".to_string());
            params.push(row.total.map_or(SqlValue::Null, SqlValue::Double));
        }
        names.push("dw_loaded_at".to_string());
        holders.push("CAST(? AS TIMESTAMP)".to_string());
        params.push(timestamp_param(loaded_at));
        names.push("dw_load_date".to_string());
        holders.push("CAST(? AS DATE)".to_string());
        params.push(date_param(loaded_at));

        let sql = format!(
            "INSERT OR IGNORE INTO {} ({}) VALUES ({})",
            entity.table,
            names.join(", "),
            holders.join(", ")
        );
        Ok(conn.execute(&sql, params_from_iter(params))?)
    }

    /// Every referenced surrogate key must exist in its dimension table
    fn check_references(
        conn: &Connection,
        entity: &EntityDescriptor,
        dimensions: &[&EntityDescriptor],
        rows: &[FactRow],
    ) -> DbResult<()> {
        for reference in &entity.references {
            let dimension = dimensions
                .iter()
                .find(|d| d.name == reference.dimension)
                .ok_or_else(|| DbError::LoadWrite {
                    table: entity.table.clone(),
                    message: format!("dimension '{}' not provided", reference.dimension),
                })?;
            let keys: BTreeSet<i64> = rows
                .iter()
                .filter_map(|r| r.keys.get(&reference.column).copied())
                .collect();
            let sql = format!(
                "SELECT COUNT(*) FROM {} WHERE surrogate_key = ?",
                dimension.table
            );
            let mut stmt = conn.prepare(&sql)?;
            for key in keys {
                let found: i64 = stmt.query_row([key], |row| row.get(0))?;
                if found == 0 {
                    return Err(DbError::LoadWrite {
                        table: entity.table.clone(),
                        message: format!(
                            "surrogate key {key} does not exist in '{}'",
                            dimension.table
                        ),
                    });
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Warehouse for DuckDbWarehouse {
    async fn ensure_table(&self, entity: &EntityDescriptor) -> DbResult<()> {
        let ddl = if entity.is_dimension() {
            Self::dimension_ddl(entity)
        } else {
            Self::fact_ddl(entity)
        };
        let conn = self.lock()?;
        Self::create_schema_for(&conn, &entity.table)?;
        conn.execute_batch(&ddl)
            .map_err(|e| DbError::ExecutionError(format!("{e}: {ddl}")))?;
        Ok(())
    }

    async fn dimension_snapshot(&self, entity: &EntityDescriptor) -> DbResult<DimensionSnapshot> {
        let conn = self.lock()?;
        let sql = format!("{} WHERE is_current", Self::dimension_select(entity));
        let rows = Self::query_rows(&conn, entity, &sql, Vec::new())?;
        let next: i64 = conn.query_row(
            &format!("SELECT COALESCE(MAX(surrogate_key), 0) + 1 FROM {}", entity.table),
            [],
            |row| row.get(0),
        )?;
        Ok(DimensionSnapshot::from_rows(entity.name.clone(), rows, next))
    }

    async fn apply_merge(
        &self,
        entity: &EntityDescriptor,
        plan: &MergePlan,
        loaded_at: DateTime<Utc>,
    ) -> DbResult<()> {
        if plan.is_empty() {
            return Ok(());
        }
        self.with_transaction(&entity.table, |conn| {
            for op in &plan.ops {
                match op {
                    MergeOp::Insert(row) => Self::insert_version(conn, entity, row, loaded_at)?,
                    MergeOp::Update {
                        surrogate_key,
                        attributes,
                        ..
                    } => Self::update_attributes(conn, entity, *surrogate_key, attributes, loaded_at)?,
                    MergeOp::Supersede {
                        expired_key,
                        effective_to,
                        replacement,
                    } => {
                        Self::expire_version(conn, entity, *expired_key, *effective_to, loaded_at)?;
                        Self::insert_version(conn, entity, replacement, loaded_at)?;
                    }
                }
            }
            Ok(())
        })?;
        log::debug!(
            "Applied {} ops to {} ({} inserts, {} updates, {} expirations)",
            plan.ops.len(),
            entity.table,
            plan.inserted(),
            plan.updated(),
            plan.expired()
        );
        Ok(())
    }

    async fn current_keys(
        &self,
        entity: &EntityDescriptor,
    ) -> DbResult<HashMap<NaturalKey, i64>> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT natural_key, surrogate_key FROM {} WHERE is_current",
            entity.table
        );
        let mut stmt = conn.prepare(&sql)?;
        let pairs = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(pairs
            .into_iter()
            .filter_map(|(nk, sk)| NaturalKey::try_new(nk).map(|nk| (nk, sk)))
            .collect())
    }

    async fn current_row(
        &self,
        entity: &EntityDescriptor,
        natural_key: &str,
    ) -> DbResult<Option<DimensionRow>> {
        let conn = self.lock()?;
        let sql = format!(
            "{} WHERE natural_key = ? AND is_current",
            Self::dimension_select(entity)
        );
        let rows = Self::query_rows(&conn, entity, &sql, vec![SqlValue::Text(natural_key.into())])?;
        Ok(rows.into_iter().next())
    }

    async fn row_as_of(
        &self,
        entity: &EntityDescriptor,
        natural_key: &str,
        instant: DateTime<Utc>,
    ) -> DbResult<Option<DimensionRow>> {
        let conn = self.lock()?;
        let sql = format!(
            "{} WHERE natural_key = ? AND effective_from <= CAST(? AS TIMESTAMP) \
             AND effective_to > CAST(? AS TIMESTAMP)",
            Self::dimension_select(entity)
        );
        let params = vec![
            SqlValue::Text(natural_key.into()),
            timestamp_param(instant),
            timestamp_param(instant),
        ];
        let rows = Self::query_rows(&conn, entity, &sql, params)?;
        Ok(rows.into_iter().next())
    }

    async fn history(
        &self,
        entity: &EntityDescriptor,
        natural_key: &str,
    ) -> DbResult<Vec<DimensionRow>> {
        let conn = self.lock()?;
        let sql = format!(
            "{} WHERE natural_key = ? ORDER BY effective_from, surrogate_key",
            Self::dimension_select(entity)
        );
        Self::query_rows(&conn, entity, &sql, vec![SqlValue::Text(natural_key.into())])
    }

    async fn write_facts(
        &self,
        entity: &EntityDescriptor,
        dimensions: &[&EntityDescriptor],
        rows: &[FactRow],
        loaded_at: DateTime<Utc>,
    ) -> DbResult<FactWriteSummary> {
        if rows.is_empty() {
            return Ok(FactWriteSummary::default());
        }
        let inserted = self.with_transaction(&entity.table, |conn| {
            Self::check_references(conn, entity, dimensions, rows)?;
            let mut inserted = 0;
            for row in rows {
                inserted += Self::insert_fact(conn, entity, row, loaded_at)?;
            }
            Ok(inserted)
        })?;
        let summary = FactWriteSummary {
            inserted,
            duplicates: rows.len().saturating_sub(inserted),
        };
        log::debug!(
            "Wrote {} rows to {} ({} duplicates skipped)",
            summary.inserted,
            entity.table,
            summary.duplicates
        );
        Ok(summary)
    }

    async fn fact_count(&self, entity: &EntityDescriptor) -> DbResult<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", entity.table),
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    async fn table_exists(&self, name: &str) -> DbResult<bool> {
        let conn = self.lock()?;

        // Handle schema-qualified names
        let (schema, table) = name.rsplit_once('.').unwrap_or(("main", name));
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM information_schema.tables WHERE table_schema = ? AND table_name = ?",
            [schema, table],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn db_type(&self) -> &'static str {
        "duckdb"
    }
}

#[cfg(test)]
#[path = "duckdb_test.rs"]
mod tests;
