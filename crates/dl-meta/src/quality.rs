//! Append-only log of quality check results.

use crate::connection::MetaDb;
use crate::error::MetaResult;
use crate::row_helpers::{bigint, row_ts, ts_text};
use chrono::{DateTime, Utc};
use dl_quality::QualityCheckResult;
use duckdb::params;
use serde::Serialize;

/// A quality result as read back from the log
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredQualityCheck {
    pub run_id: String,
    pub entity: String,
    pub table: String,
    pub rule: String,
    pub field: String,
    pub check: String,
    pub severity: String,
    pub weight: f64,
    pub records_checked: i64,
    pub records_failed: i64,
    pub score: f64,
    pub passed: bool,
    pub details: serde_json::Value,
    pub checked_at: DateTime<Utc>,
}

impl MetaDb {
    /// Append one run's results; returns the number of rows written
    pub fn record_quality_results(
        &self,
        run_id: &str,
        results: &[QualityCheckResult],
        checked_at: DateTime<Utc>,
    ) -> MetaResult<usize> {
        if results.is_empty() {
            return Ok(0);
        }
        self.transaction(|conn| {
            let mut stmt = conn.prepare(
                "INSERT INTO dl_meta.quality_checks
                 (run_id, entity, table_name, rule_name, field, check_type, severity, weight,
                  records_checked, records_failed, score, passed, details, checked_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, CAST(? AS TIMESTAMP))",
            )?;
            let checked_at = ts_text(checked_at);
            for result in results {
                stmt.execute(params![
                    run_id,
                    result.entity.as_str(),
                    result.table,
                    result.rule.as_str(),
                    result.field,
                    result.check,
                    result.severity.as_str(),
                    result.weight,
                    bigint(result.records_checked as u64),
                    bigint(result.records_failed as u64),
                    result.score,
                    result.passed,
                    result.details.to_string(),
                    checked_at,
                ])?;
            }
            Ok(results.len())
        })
    }

    /// Results of one run in insertion order
    pub fn quality_results(&self, run_id: &str) -> MetaResult<Vec<StoredQualityCheck>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT run_id, entity, table_name, rule_name, field, check_type, severity, weight,
                    records_checked, records_failed, score, passed, details,
                    CAST(checked_at AS VARCHAR)
             FROM dl_meta.quality_checks WHERE run_id = ? ORDER BY check_id",
        )?;
        let checks = stmt
            .query_map([run_id], |row| {
                let details: String = row.get(12)?;
                Ok(StoredQualityCheck {
                    run_id: row.get(0)?,
                    entity: row.get(1)?,
                    table: row.get(2)?,
                    rule: row.get(3)?,
                    field: row.get(4)?,
                    check: row.get(5)?,
                    severity: row.get(6)?,
                    weight: row.get(7)?,
                    records_checked: row.get(8)?,
                    records_failed: row.get(9)?,
                    score: row.get(10)?,
                    passed: row.get(11)?,
                    details: serde_json::from_str(&details).map_err(|e| {
                        duckdb::Error::FromSqlConversionFailure(
                            12,
                            duckdb::types::Type::Text,
                            Box::new(e),
                        )
                    })?,
                    checked_at: row_ts(row, 13)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(checks)
    }
}

#[cfg(test)]
#[path = "quality_test.rs"]
mod tests;
