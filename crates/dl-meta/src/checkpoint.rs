//! Durable per-entity extraction cursors.
//!
//! A checkpoint records the `(timestamp, identifier)` watermark of the last
//! record a successful run committed. Incremental advances must move it
//! strictly forward and are compare-and-set against the watermark the run
//! started from, so two runs racing on one entity cannot both win.

use crate::connection::MetaDb;
use crate::error::{MetaError, MetaResult};
use crate::row_helpers::{bigint, count, parse_ts, ts_text};
use chrono::{DateTime, Utc};
use dl_core::{EntityName, ExtractionBounds, LoadMode, Watermark};
use duckdb::{params, Connection, OptionalExt};
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

/// A committed cursor
#[derive(Debug, Clone, PartialEq)]
pub struct Checkpoint {
    pub entity: EntityName,
    /// Mode of the run that last moved the cursor
    pub load_mode: LoadMode,
    pub watermark: Watermark,
    /// Records loaded since the last full load
    pub records_loaded: u64,
    pub run_id: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// A proposed move of one entity's cursor
#[derive(Debug, Clone)]
pub struct Advance<'a> {
    pub entity: &'a EntityName,
    pub mode: LoadMode,
    /// Cursor the run extracted from; `None` when no checkpoint existed
    pub expected: Option<&'a Watermark>,
    pub watermark: Watermark,
    pub records_loaded: u64,
    pub run_id: &'a str,
}

/// Reads and advances checkpoints in the meta database
pub struct CheckpointStore {
    db: Arc<MetaDb>,
    default_timestamp: DateTime<Utc>,
    in_flight: Mutex<HashSet<EntityName>>,
}

/// Clears the in-flight mark on every exit path
struct InFlight<'a> {
    set: &'a Mutex<HashSet<EntityName>>,
    entity: EntityName,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if let Ok(mut set) = self.set.lock() {
            set.remove(&self.entity);
        }
    }
}

const SELECT_CHECKPOINT: &str = "SELECT entity, load_mode, CAST(last_loaded_timestamp AS VARCHAR), \
     last_loaded_identifier, records_loaded, run_id, CAST(updated_at AS VARCHAR) \
     FROM dl_meta.checkpoints";

type RawCheckpoint = (String, String, String, String, i64, Option<String>, String);

fn decode(raw: RawCheckpoint) -> MetaResult<Checkpoint> {
    let (entity, mode, ts, identifier, loaded, run_id, updated_at) = raw;
    Ok(Checkpoint {
        entity: EntityName::try_new(entity)
            .ok_or_else(|| MetaError::QueryError("checkpoint with empty entity".to_string()))?,
        load_mode: LoadMode::from_str(&mode).map_err(|e| MetaError::QueryError(e.to_string()))?,
        watermark: Watermark::new(parse_ts("last_loaded_timestamp", &ts)?, identifier),
        records_loaded: count(loaded),
        run_id,
        updated_at: parse_ts("updated_at", &updated_at)?,
    })
}

fn read_checkpoint(conn: &Connection, entity: &str) -> MetaResult<Option<Checkpoint>> {
    let raw: Option<RawCheckpoint> = conn
        .query_row(
            &format!("{SELECT_CHECKPOINT} WHERE entity = ?"),
            [entity],
            |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                ))
            },
        )
        .optional()?;
    raw.map(decode).transpose()
}

impl CheckpointStore {
    /// `default_timestamp` bounds incremental runs of entities never loaded
    pub fn new(db: Arc<MetaDb>, default_timestamp: DateTime<Utc>) -> Self {
        Self {
            db,
            default_timestamp,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn get(&self, entity: &str) -> MetaResult<Option<Checkpoint>> {
        let conn = self.db.conn()?;
        read_checkpoint(&conn, entity)
    }

    /// Window the extractor should fetch for `entity`
    pub fn get_bounds(&self, entity: &str, mode: LoadMode) -> MetaResult<ExtractionBounds> {
        if mode == LoadMode::Full {
            return Ok(ExtractionBounds::Unbounded);
        }
        let lower = match self.get(entity)? {
            Some(checkpoint) => checkpoint.watermark,
            None => Watermark::floor(self.default_timestamp),
        };
        Ok(ExtractionBounds::After(lower))
    }

    /// Commit a new cursor.
    ///
    /// Incremental advances fail with `CheckpointConflict` when another
    /// advance for the entity is running or the stored cursor no longer
    /// equals `expected`, and with `CheckpointRegression` unless the new
    /// watermark is strictly greater. Full-mode advances reset the cursor
    /// to the batch maximum unconditionally.
    pub fn advance(&self, advance: Advance<'_>, now: DateTime<Utc>) -> MetaResult<Checkpoint> {
        let _guard = self.mark_in_flight(advance.entity)?;
        let entity = advance.entity.as_str();

        let checkpoint = self.db.transaction(|conn| {
            let current = read_checkpoint(conn, entity)?;

            let records_loaded = match (advance.mode, &current) {
                (LoadMode::Full, _) => advance.records_loaded,
                (LoadMode::Incremental, current) => {
                    let stored = current.as_ref().map(|c| &c.watermark);
                    if stored != advance.expected {
                        return Err(MetaError::CheckpointConflict {
                            entity: entity.to_string(),
                            message: format!(
                                "expected {}, found {}",
                                describe(advance.expected),
                                describe(stored)
                            ),
                        });
                    }
                    if let Some(current) = current {
                        if advance.watermark <= current.watermark {
                            return Err(MetaError::CheckpointRegression {
                                entity: entity.to_string(),
                                current: current.watermark.clone(),
                                proposed: advance.watermark.clone(),
                            });
                        }
                    }
                    current.as_ref().map_or(0, |c| c.records_loaded) + advance.records_loaded
                }
            };

            conn.execute(
                "INSERT OR REPLACE INTO dl_meta.checkpoints
                 (entity, load_mode, last_loaded_timestamp, last_loaded_identifier,
                  records_loaded, run_id, updated_at)
                 VALUES (?, ?, CAST(? AS TIMESTAMP), ?, ?, ?, CAST(? AS TIMESTAMP))",
                params![
                    entity,
                    advance.mode.as_str(),
                    ts_text(advance.watermark.timestamp),
                    advance.watermark.identifier,
                    bigint(records_loaded),
                    advance.run_id,
                    ts_text(now),
                ],
            )?;

            Ok(Checkpoint {
                entity: advance.entity.clone(),
                load_mode: advance.mode,
                watermark: advance.watermark.clone(),
                records_loaded,
                run_id: Some(advance.run_id.to_string()),
                updated_at: now,
            })
        })?;

        log::info!(
            "Checkpoint for {} advanced to {} ({} mode)",
            entity,
            checkpoint.watermark,
            checkpoint.load_mode
        );
        Ok(checkpoint)
    }

    /// Delete an entity's checkpoint; returns whether one existed
    pub fn reset(&self, entity: &str) -> MetaResult<bool> {
        let deleted = self
            .db
            .conn()?
            .execute("DELETE FROM dl_meta.checkpoints WHERE entity = ?", [entity])?;
        if deleted > 0 {
            log::warn!("Checkpoint for {entity} reset");
        }
        Ok(deleted > 0)
    }

    pub fn list(&self) -> MetaResult<Vec<Checkpoint>> {
        let conn = self.db.conn()?;
        let mut stmt = conn.prepare(&format!("{SELECT_CHECKPOINT} ORDER BY entity"))?;
        let raws = stmt
            .query_map([], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                ))
            })?
            .collect::<Result<Vec<RawCheckpoint>, _>>()?;
        raws.into_iter().map(decode).collect()
    }

    fn mark_in_flight(&self, entity: &EntityName) -> MetaResult<InFlight<'_>> {
        let mut set = self.in_flight.lock().map_err(|_| MetaError::LockPoisoned)?;
        if !set.insert(entity.clone()) {
            return Err(MetaError::CheckpointConflict {
                entity: entity.to_string(),
                message: "another advance is in flight".to_string(),
            });
        }
        Ok(InFlight {
            set: &self.in_flight,
            entity: entity.clone(),
        })
    }
}

fn describe(watermark: Option<&Watermark>) -> String {
    watermark.map_or_else(|| "no checkpoint".to_string(), Watermark::to_string)
}

#[cfg(test)]
#[path = "checkpoint_test.rs"]
mod tests;
