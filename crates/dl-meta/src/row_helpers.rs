//! Timestamp and count conversions for meta rows.
//!
//! Timestamps are bound as text and selected as `CAST(.. AS VARCHAR)`.

use crate::error::{MetaError, MetaResult};
use chrono::{DateTime, Utc};
use dl_core::parse_timestamp;

pub(crate) fn ts_text(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S%.f").to_string()
}

pub(crate) fn parse_ts(column: &str, text: &str) -> MetaResult<DateTime<Utc>> {
    parse_timestamp(text)
        .ok_or_else(|| MetaError::QueryError(format!("unreadable {column} '{text}'")))
}

pub(crate) fn parse_opt_ts(column: &str, text: Option<&str>) -> MetaResult<Option<DateTime<Utc>>> {
    text.map(|t| parse_ts(column, t)).transpose()
}

/// Stored counts are BIGINT; negative values never occur
pub(crate) fn count(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

pub(crate) fn bigint(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Read a `CAST(.. AS VARCHAR)` timestamp inside a row closure
pub(crate) fn row_ts(row: &duckdb::Row<'_>, idx: usize) -> duckdb::Result<DateTime<Utc>> {
    let text: String = row.get(idx)?;
    parse_timestamp(&text).ok_or_else(|| {
        duckdb::Error::FromSqlConversionFailure(
            idx,
            duckdb::types::Type::Text,
            format!("unreadable timestamp '{text}'").into(),
        )
    })
}
