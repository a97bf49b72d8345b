//! Dead-letter log of records excluded from a batch.

use crate::connection::MetaDb;
use crate::error::MetaResult;
use crate::row_helpers::{row_ts, ts_text};
use chrono::{DateTime, Utc};
use duckdb::params;
use serde::Serialize;
use std::fmt;

/// Phase that excluded the record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RejectPhase {
    /// Failed normalization
    Normalize,
    /// A fact reference did not resolve
    Resolve,
}

impl RejectPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            RejectPhase::Normalize => "normalize",
            RejectPhase::Resolve => "resolve",
        }
    }
}

impl fmt::Display for RejectPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rejection {
    pub entity: String,
    pub phase: RejectPhase,
    pub source_key: Option<String>,
    pub error_message: String,
    pub record_json: String,
}

/// A rejection as read back from the log
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredRejection {
    pub run_id: String,
    pub rejection: Rejection,
    pub rejected_at: DateTime<Utc>,
}

impl MetaDb {
    /// Append rejected records in one transaction
    pub fn record_rejections(
        &self,
        run_id: &str,
        rejections: &[Rejection],
        rejected_at: DateTime<Utc>,
    ) -> MetaResult<usize> {
        if rejections.is_empty() {
            return Ok(0);
        }
        self.transaction(|conn| {
            let mut stmt = conn.prepare(
                "INSERT INTO dl_meta.rejected_records
                 (run_id, entity, phase, source_key, error_message, record_json, rejected_at)
                 VALUES (?, ?, ?, ?, ?, ?, CAST(? AS TIMESTAMP))",
            )?;
            let rejected_at = ts_text(rejected_at);
            for rejection in rejections {
                stmt.execute(params![
                    run_id,
                    rejection.entity,
                    rejection.phase.as_str(),
                    rejection.source_key,
                    rejection.error_message,
                    rejection.record_json,
                    rejected_at,
                ])?;
            }
            Ok(rejections.len())
        })
    }

    pub fn rejections(&self, run_id: &str) -> MetaResult<Vec<StoredRejection>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT entity, phase, source_key, error_message, record_json,
                    CAST(rejected_at AS VARCHAR)
             FROM dl_meta.rejected_records WHERE run_id = ? ORDER BY rejected_id",
        )?;
        let rejections = stmt
            .query_map([run_id], |row| {
                let phase: String = row.get(1)?;
                Ok(StoredRejection {
                    run_id: run_id.to_string(),
                    rejection: Rejection {
                        entity: row.get(0)?,
                        phase: if phase == "resolve" {
                            RejectPhase::Resolve
                        } else {
                            RejectPhase::Normalize
                        },
                        source_key: row.get(2)?,
                        error_message: row.get(3)?,
                        record_json: row.get(4)?,
                    },
                    rejected_at: row_ts(row, 5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rejections)
    }
}

#[cfg(test)]
#[path = "rejected_test.rs"]
mod tests;
