//! Conversions between dimload values and DuckDB parameters and rows.
//!
//! Temporal values travel as text in both directions: parameters are bound
//! as strings and cast in SQL, and columns are selected through
//! `CAST(.. AS VARCHAR)` and parsed back. This keeps the binding
//! independent of the driver's optional chrono support.

use crate::error::{DbError, DbResult};
use chrono::{DateTime, Utc};
use dl_core::{parse_date, parse_timestamp, FieldSpec, FieldType, Value};
use duckdb::types::Value as SqlValue;

/// Double-quote an identifier
pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Single-quote a string literal
pub(crate) fn quote_literal(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

/// `CAST(? AS <type>)` placeholder for a typed column
pub(crate) fn placeholder(field_type: FieldType) -> String {
    format!("CAST(? AS {})", field_type.sql_type())
}

/// Select expression that [`read_value`] can decode
pub(crate) fn select_expr(spec: &FieldSpec) -> String {
    let col = quote_ident(&spec.name);
    if spec.field_type.is_temporal() {
        format!("CAST({col} AS VARCHAR)")
    } else {
        col
    }
}

pub(crate) fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Boolean(*b),
        Value::Int(i) => SqlValue::BigInt(*i),
        Value::Float(f) => SqlValue::Double(*f),
        Value::Text(s) => SqlValue::Text(s.clone()),
        Value::Date(_) | Value::Timestamp(_) => match value.render() {
            Some(s) => SqlValue::Text(s),
            None => SqlValue::Null,
        },
    }
}

pub(crate) fn timestamp_param(ts: DateTime<Utc>) -> SqlValue {
    SqlValue::Text(Value::Timestamp(ts).to_string())
}

pub(crate) fn date_param(ts: DateTime<Utc>) -> SqlValue {
    SqlValue::Text(ts.format("%Y-%m-%d").to_string())
}

/// Decode the column at `idx` according to the field's declared type
pub(crate) fn read_value(row: &duckdb::Row<'_>, idx: usize, spec: &FieldSpec) -> DbResult<Value> {
    let decode = |e: duckdb::Error| DbError::Decode {
        column: spec.name.clone(),
        message: e.to_string(),
    };
    let value = match spec.field_type {
        FieldType::String => row
            .get::<_, Option<String>>(idx)
            .map_err(decode)?
            .map(Value::Text),
        FieldType::Integer => row
            .get::<_, Option<i64>>(idx)
            .map_err(decode)?
            .map(Value::Int),
        FieldType::Float => row
            .get::<_, Option<f64>>(idx)
            .map_err(decode)?
            .map(Value::Float),
        FieldType::Boolean => row
            .get::<_, Option<bool>>(idx)
            .map_err(decode)?
            .map(Value::Bool),
        FieldType::Date => match row.get::<_, Option<String>>(idx).map_err(decode)? {
            Some(s) => Some(Value::Date(
                parse_date(&s).ok_or_else(|| bad_text(&spec.name, &s))?,
            )),
            None => None,
        },
        FieldType::Timestamp => match row.get::<_, Option<String>>(idx).map_err(decode)? {
            Some(s) => Some(Value::Timestamp(
                parse_timestamp(&s).ok_or_else(|| bad_text(&spec.name, &s))?,
            )),
            None => None,
        },
    };
    Ok(value.unwrap_or(Value::Null))
}

/// Decode a `CAST(.. AS VARCHAR)` timestamp column
pub(crate) fn read_timestamp(row: &duckdb::Row<'_>, idx: usize, column: &str) -> DbResult<DateTime<Utc>> {
    let text: String = row.get(idx).map_err(|e| DbError::Decode {
        column: column.to_string(),
        message: e.to_string(),
    })?;
    parse_timestamp(&text).ok_or_else(|| bad_text(column, &text))
}

fn bad_text(column: &str, text: &str) -> DbError {
    DbError::Decode {
        column: column.to_string(),
        message: format!("unexpected value '{text}'"),
    }
}
