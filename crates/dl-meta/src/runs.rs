//! Pipeline run rows.
//!
//! A run is inserted `running` and moves once to `succeeded` or `failed`.
//! Every update is guarded on `status = 'running'`, so terminal rows are
//! never rewritten.

use crate::connection::MetaDb;
use crate::error::{MetaError, MetaResult};
use crate::row_helpers::{bigint, count, parse_opt_ts, parse_ts, ts_text};
use chrono::{DateTime, Utc};
use dl_core::{EntityName, LoadMode};
use duckdb::{params, Connection, OptionalExt};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Succeeded,
    Failed,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        self != RunStatus::Running
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = MetaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(RunStatus::Running),
            "succeeded" => Ok(RunStatus::Succeeded),
            "failed" => Ok(RunStatus::Failed),
            other => Err(MetaError::QueryError(format!("unknown run status '{other}'"))),
        }
    }
}

/// Phase-level record counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunCounts {
    pub extracted: u64,
    pub normalized: u64,
    pub rejected: u64,
    pub inserted: u64,
    pub updated: u64,
    pub expired: u64,
    pub unchanged: u64,
    pub facts_written: u64,
    pub duplicates: u64,
    pub unresolved: u64,
}

/// Identity of a run about to start
#[derive(Debug, Clone)]
pub struct NewRun {
    pub run_id: String,
    pub pipeline_name: String,
    pub entity: EntityName,
    pub load_mode: LoadMode,
    pub config_checksum: String,
    pub started_at: DateTime<Utc>,
}

/// One persisted run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunRecord {
    pub run_id: String,
    pub pipeline_name: String,
    pub entity: EntityName,
    pub load_mode: LoadMode,
    pub status: RunStatus,
    pub config_checksum: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub counts: RunCounts,
    pub quality_score: Option<f64>,
    pub error_message: Option<String>,
}

impl RunRecord {
    pub fn duration(&self) -> Option<chrono::Duration> {
        self.finished_at.map(|end| end - self.started_at)
    }
}

const SELECT_RUN: &str = "SELECT run_id, pipeline_name, entity, load_mode, status, config_checksum, \
     CAST(started_at AS VARCHAR), CAST(finished_at AS VARCHAR), \
     records_extracted, records_normalized, records_rejected, rows_inserted, rows_updated, \
     rows_expired, rows_unchanged, facts_written, fact_duplicates, facts_unresolved, \
     quality_score, error_message \
     FROM dl_meta.pipeline_runs";

/// Column values as read, before timestamp and enum parsing
struct RawRun {
    run_id: String,
    pipeline_name: String,
    entity: String,
    load_mode: String,
    status: String,
    config_checksum: String,
    started_at: String,
    finished_at: Option<String>,
    counts: [i64; 10],
    quality_score: Option<f64>,
    error_message: Option<String>,
}

fn raw_run(row: &duckdb::Row<'_>) -> duckdb::Result<RawRun> {
    let mut counts = [0i64; 10];
    for (i, slot) in counts.iter_mut().enumerate() {
        *slot = row.get(8 + i)?;
    }
    Ok(RawRun {
        run_id: row.get(0)?,
        pipeline_name: row.get(1)?,
        entity: row.get(2)?,
        load_mode: row.get(3)?,
        status: row.get(4)?,
        config_checksum: row.get(5)?,
        started_at: row.get(6)?,
        finished_at: row.get(7)?,
        counts,
        quality_score: row.get(18)?,
        error_message: row.get(19)?,
    })
}

impl TryFrom<RawRun> for RunRecord {
    type Error = MetaError;

    fn try_from(raw: RawRun) -> MetaResult<Self> {
        let [
            extracted,
            normalized,
            rejected,
            inserted,
            updated,
            expired,
            unchanged,
            facts_written,
            duplicates,
            unresolved,
        ] = raw.counts.map(count);
        Ok(RunRecord {
            entity: EntityName::try_new(raw.entity)
                .ok_or_else(|| MetaError::QueryError(format!("run {} has no entity", raw.run_id)))?,
            load_mode: LoadMode::from_str(&raw.load_mode)
                .map_err(|e| MetaError::QueryError(e.to_string()))?,
            status: raw.status.parse()?,
            started_at: parse_ts("started_at", &raw.started_at)?,
            finished_at: parse_opt_ts("finished_at", raw.finished_at.as_deref())?,
            counts: RunCounts {
                extracted,
                normalized,
                rejected,
                inserted,
                updated,
                expired,
                unchanged,
                facts_written,
                duplicates,
                unresolved,
            },
            run_id: raw.run_id,
            pipeline_name: raw.pipeline_name,
            config_checksum: raw.config_checksum,
            quality_score: raw.quality_score,
            error_message: raw.error_message,
        })
    }
}

fn read_run(conn: &Connection, run_id: &str) -> MetaResult<Option<RunRecord>> {
    conn.query_row(&format!("{SELECT_RUN} WHERE run_id = ?"), [run_id], raw_run)
        .optional()?
        .map(RunRecord::try_from)
        .transpose()
}

/// Explain why a guarded update touched no row
fn not_running(conn: &Connection, run_id: &str) -> MetaError {
    match read_run(conn, run_id) {
        Ok(Some(run)) => MetaError::TerminalRunState {
            run_id: run_id.to_string(),
            status: run.status.to_string(),
        },
        Ok(None) => MetaError::RunNotFound(run_id.to_string()),
        Err(e) => e,
    }
}

fn count_params(counts: &RunCounts) -> [i64; 10] {
    [
        counts.extracted,
        counts.normalized,
        counts.rejected,
        counts.inserted,
        counts.updated,
        counts.expired,
        counts.unchanged,
        counts.facts_written,
        counts.duplicates,
        counts.unresolved,
    ]
    .map(bigint)
}

const SET_COUNTS: &str = "records_extracted = ?, records_normalized = ?, records_rejected = ?, \
     rows_inserted = ?, rows_updated = ?, rows_expired = ?, rows_unchanged = ?, \
     facts_written = ?, fact_duplicates = ?, facts_unresolved = ?, quality_score = ?";

impl MetaDb {
    /// Insert a `running` row unless the entity already has one
    pub fn begin_run(&self, run: &NewRun) -> MetaResult<RunRecord> {
        self.transaction(|conn| {
            let active: Option<String> = conn
                .query_row(
                    "SELECT run_id FROM dl_meta.pipeline_runs \
                     WHERE entity = ? AND status = 'running' LIMIT 1",
                    [run.entity.as_str()],
                    |row| row.get(0),
                )
                .optional()?;
            if let Some(run_id) = active {
                return Err(MetaError::RunAlreadyInProgress {
                    entity: run.entity.to_string(),
                    run_id,
                });
            }

            conn.execute(
                "INSERT INTO dl_meta.pipeline_runs
                 (run_id, pipeline_name, entity, load_mode, status, config_checksum, started_at)
                 VALUES (?, ?, ?, ?, 'running', ?, CAST(? AS TIMESTAMP))",
                params![
                    run.run_id,
                    run.pipeline_name,
                    run.entity.as_str(),
                    run.load_mode.as_str(),
                    run.config_checksum,
                    ts_text(run.started_at),
                ],
            )?;
            read_run(conn, &run.run_id)?.ok_or_else(|| MetaError::RunNotFound(run.run_id.clone()))
        })
    }

    /// Record counts at a phase boundary
    pub fn update_run_counts(
        &self,
        run_id: &str,
        counts: &RunCounts,
        quality_score: Option<f64>,
    ) -> MetaResult<()> {
        let conn = self.conn()?;
        let c = count_params(counts);
        let changed = conn.execute(
            &format!(
                "UPDATE dl_meta.pipeline_runs SET {SET_COUNTS} \
                 WHERE run_id = ? AND status = 'running'"
            ),
            params![c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7], c[8], c[9], quality_score, run_id],
        )?;
        if changed == 0 {
            return Err(not_running(&conn, run_id));
        }
        Ok(())
    }

    /// Move a running run to a terminal status
    pub fn finish_run(
        &self,
        run_id: &str,
        status: RunStatus,
        counts: &RunCounts,
        quality_score: Option<f64>,
        error_message: Option<&str>,
        finished_at: DateTime<Utc>,
    ) -> MetaResult<RunRecord> {
        if !status.is_terminal() {
            return Err(MetaError::QueryError(format!(
                "cannot finish run {run_id} as {status}"
            )));
        }
        self.transaction(|conn| {
            let c = count_params(counts);
            let changed = conn.execute(
                &format!(
                    "UPDATE dl_meta.pipeline_runs SET {SET_COUNTS}, status = ?, \
                     error_message = ?, finished_at = CAST(? AS TIMESTAMP) \
                     WHERE run_id = ? AND status = 'running'"
                ),
                params![
                    c[0],
                    c[1],
                    c[2],
                    c[3],
                    c[4],
                    c[5],
                    c[6],
                    c[7],
                    c[8],
                    c[9],
                    quality_score,
                    status.as_str(),
                    error_message,
                    ts_text(finished_at),
                    run_id
                ],
            )?;
            if changed == 0 {
                return Err(not_running(conn, run_id));
            }
            read_run(conn, run_id)?.ok_or_else(|| MetaError::RunNotFound(run_id.to_string()))
        })
    }

    pub fn get_run(&self, run_id: &str) -> MetaResult<Option<RunRecord>> {
        let conn = self.conn()?;
        read_run(&conn, run_id)
    }

    /// Newest first
    pub fn recent_runs(&self, limit: usize) -> MetaResult<Vec<RunRecord>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare(&format!("{SELECT_RUN} ORDER BY started_at DESC, run_id LIMIT ?"))?;
        let raws = stmt
            .query_map([bigint(limit as u64)], raw_run)?
            .collect::<Result<Vec<_>, _>>()?;
        raws.into_iter().map(RunRecord::try_from).collect()
    }

    /// Runs currently marked `running`
    pub fn active_runs(&self) -> MetaResult<Vec<RunRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "{SELECT_RUN} WHERE status = 'running' ORDER BY started_at"
        ))?;
        let raws = stmt
            .query_map([], raw_run)?
            .collect::<Result<Vec<_>, _>>()?;
        raws.into_iter().map(RunRecord::try_from).collect()
    }
}

#[cfg(test)]
#[path = "runs_test.rs"]
mod tests;
