//! Source extractors
//!
//! Both extractors return records in `(watermark, natural key)` order and
//! drop everything the bounds do not admit. A record whose watermark is
//! missing or unparseable is kept and sorted last so the normalizer can
//! reject it with a proper error instead of it vanishing silently.

use crate::error::{DbError, DbResult};
use crate::row::quote_literal;
use crate::traits::Extractor;
use async_trait::async_trait;
use dl_core::{source_watermark, EntityDescriptor, ExtractionBounds, RawRecord, Watermark};
use duckdb::Connection;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Apply `bounds` and order the survivors
pub(crate) fn window(
    entity: &EntityDescriptor,
    records: Vec<RawRecord>,
    bounds: &ExtractionBounds,
) -> Vec<RawRecord> {
    let mut keyed: Vec<(Option<Watermark>, RawRecord)> = records
        .into_iter()
        .map(|r| (source_watermark(&r, entity), r))
        .filter(|(wm, _)| wm.as_ref().map_or(true, |wm| bounds.admits(wm)))
        .collect();

    // None sorts first by default; unparseable rows go last instead
    keyed.sort_by(|(a, _), (b, _)| match (a, b) {
        (Some(a), Some(b)) => a.cmp(b),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    });
    keyed.into_iter().map(|(_, r)| r).collect()
}

/// In-memory record source, replaceable between runs
#[derive(Debug, Default)]
pub struct MemoryExtractor {
    records: Mutex<HashMap<String, Vec<RawRecord>>>,
}

impl MemoryExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the records served for `entity`
    pub fn set(&self, entity: &str, records: Vec<RawRecord>) -> DbResult<()> {
        self.records
            .lock()
            .map_err(|e| DbError::MutexPoisoned(e.to_string()))?
            .insert(entity.to_string(), records);
        Ok(())
    }
}

#[async_trait]
impl Extractor for MemoryExtractor {
    async fn extract(
        &self,
        entity: &EntityDescriptor,
        bounds: &ExtractionBounds,
    ) -> DbResult<Vec<RawRecord>> {
        let records = self
            .records
            .lock()
            .map_err(|e| DbError::MutexPoisoned(e.to_string()))?
            .get(entity.name.as_str())
            .cloned()
            .ok_or_else(|| DbError::ExtractError {
                entity: entity.name.to_string(),
                message: "no records registered".to_string(),
            })?;
        Ok(window(entity, records, bounds))
    }
}

/// Reads each entity's `source` CSV file through DuckDB
pub struct CsvExtractor {
    conn: Mutex<Connection>,
    base_dir: PathBuf,
}

impl CsvExtractor {
    /// Relative `source` paths resolve against `base_dir`
    pub fn new(base_dir: &Path) -> DbResult<Self> {
        let conn =
            Connection::open_in_memory().map_err(|e| DbError::ConnectionError(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
            base_dir: base_dir.to_path_buf(),
        })
    }

    fn read_csv(&self, entity: &EntityDescriptor, path: &Path) -> DbResult<Vec<RawRecord>> {
        let extract_err = |message: String| DbError::ExtractError {
            entity: entity.name.to_string(),
            message,
        };
        if !path.exists() {
            return Err(extract_err(format!("source file not found: {}", path.display())));
        }

        let conn = self
            .conn
            .lock()
            .map_err(|e| DbError::MutexPoisoned(e.to_string()))?;
        let source = format!(
            "read_csv_auto({}, header = true, all_varchar = true)",
            quote_literal(&path.to_string_lossy())
        );

        let mut describe = conn
            .prepare(&format!("DESCRIBE SELECT * FROM {source}"))
            .map_err(|e| extract_err(e.to_string()))?;
        let columns: Vec<String> = describe
            .query_map([], |row| row.get::<_, String>(0))
            .and_then(|rows| rows.collect())
            .map_err(|e| extract_err(e.to_string()))?;

        let mut stmt = conn
            .prepare(&format!("SELECT * FROM {source}"))
            .map_err(|e| extract_err(e.to_string()))?;
        let mut rows = stmt.query([]).map_err(|e| extract_err(e.to_string()))?;
        let mut records = Vec::new();
        while let Some(row) = rows.next().map_err(|e| extract_err(e.to_string()))? {
            let mut record = RawRecord::new();
            for (idx, column) in columns.iter().enumerate() {
                let cell: Option<String> = row.get(idx).map_err(|e| extract_err(e.to_string()))?;
                record.insert(
                    column.clone(),
                    cell.map_or(serde_json::Value::Null, serde_json::Value::String),
                );
            }
            records.push(record);
        }
        log::debug!("Read {} rows from {}", records.len(), path.display());
        Ok(records)
    }
}

#[async_trait]
impl Extractor for CsvExtractor {
    async fn extract(
        &self,
        entity: &EntityDescriptor,
        bounds: &ExtractionBounds,
    ) -> DbResult<Vec<RawRecord>> {
        let source = entity.source.as_deref().ok_or_else(|| DbError::ExtractError {
            entity: entity.name.to_string(),
            message: "no source configured".to_string(),
        })?;
        let path = self.base_dir.join(source);
        let records = self.read_csv(entity, &path)?;
        Ok(window(entity, records, bounds))
    }
}

#[cfg(test)]
#[path = "extract_test.rs"]
mod tests;
