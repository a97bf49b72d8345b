//! Record normalizer
//!
//! Maps one untyped [`RawRecord`] onto its entity's canonical attribute set.
//! Fact records with measures also carry the computed total, so quality
//! rules can check it before anything is loaded.
//! The mapping is a pure function of the record, the descriptor and the
//! extraction time the caller supplies, so re-normalizing the same input
//! always yields the same output.

use crate::entity::{EntityDescriptor, FieldSpec, FieldTransform};
use crate::error::NormalizationError;
use crate::fact::compute_total;
use crate::names::NaturalKey;
use crate::record::{NormalizedRecord, RawRecord};
use crate::value::{FieldType, Value};
use crate::watermark::Watermark;
use chrono::{DateTime, NaiveDate, NaiveDateTime, SubsecRound, Utc};
use std::collections::BTreeMap;

/// Cell contents treated as missing after trimming
pub const NULL_TOKENS: &[&str] = &["", "NULL", "null", "N/A", "NA"];

/// A raw record the normalizer refused, kept for the rejected-record log
#[derive(Debug, Clone, PartialEq)]
pub struct RejectedRecord {
    /// Position of the record in the extracted batch
    pub index: usize,
    /// Natural key as it appeared in the raw record, if readable
    pub source_key: Option<String>,
    pub raw: RawRecord,
    pub error: NormalizationError,
}

/// Outcome of normalizing a whole batch
#[derive(Debug, Clone, Default)]
pub struct NormalizedBatch {
    pub records: Vec<NormalizedRecord>,
    pub rejected: Vec<RejectedRecord>,
}

impl NormalizedBatch {
    pub fn total(&self) -> usize {
        self.records.len() + self.rejected.len()
    }
}

/// Normalize one raw record.
///
/// `extracted_at` becomes `observed_at` when the entity has no watermark field.
pub fn normalize(
    raw: &RawRecord,
    entity: &EntityDescriptor,
    extracted_at: DateTime<Utc>,
) -> Result<NormalizedRecord, NormalizationError> {
    let mut attributes = BTreeMap::new();
    for spec in &entity.fields {
        let value = coerce_field(spec, raw.get(&spec.name))?;
        if value.is_null() && spec.required {
            return Err(NormalizationError::MissingField {
                field: spec.name.clone(),
            });
        }
        attributes.insert(spec.name.clone(), value);
    }

    let source_key = attributes
        .get(&entity.natural_key)
        .and_then(Value::render)
        .and_then(NaturalKey::try_new)
        .ok_or_else(|| NormalizationError::MissingField {
            field: entity.natural_key.clone(),
        })?;

    let observed_at = match &entity.watermark_field {
        Some(field) => attributes
            .get(field)
            .and_then(Value::as_timestamp)
            .ok_or_else(|| NormalizationError::MissingField {
                field: field.clone(),
            })?,
        None => extracted_at.trunc_subsecs(6),
    };

    let mut record = NormalizedRecord {
        entity: entity.name.clone(),
        source_key,
        observed_at,
        attributes,
    };
    if let Some(measures) = &entity.measures {
        // null when a measure is unusable; fact resolution rejects the record
        let total = compute_total(measures, &record).map_or(Value::Null, Value::Float);
        record.attributes.insert(measures.total.clone(), total);
    }
    Ok(record)
}

/// Watermark `raw` will carry once normalized.
///
/// Extractors window on this so a raw record compares against the stored
/// cursor with its key already coerced and transformed. `None` when either
/// the watermark or the natural key does not normalize; such records are
/// left for the normalizer to reject.
pub fn source_watermark(raw: &RawRecord, entity: &EntityDescriptor) -> Option<Watermark> {
    let coerced = |field: &str| {
        entity
            .field(field)
            .and_then(|spec| coerce_field(spec, raw.get(field)).ok())
    };
    let timestamp = coerced(entity.watermark_field.as_deref()?)?.as_timestamp()?;
    let identifier = coerced(&entity.natural_key)?.render()?;
    Some(Watermark::new(timestamp, identifier))
}

/// Normalize a batch, splitting it into accepted records and rejections.
///
/// Input order is preserved in both halves.
pub fn normalize_batch(
    raws: &[RawRecord],
    entity: &EntityDescriptor,
    extracted_at: DateTime<Utc>,
) -> NormalizedBatch {
    let mut batch = NormalizedBatch::default();
    for (index, raw) in raws.iter().enumerate() {
        match normalize(raw, entity, extracted_at) {
            Ok(record) => batch.records.push(record),
            Err(error) => {
                log::debug!("Rejected {} record #{}: {}", entity.name, index, error);
                batch.rejected.push(RejectedRecord {
                    index,
                    source_key: raw.get(&entity.natural_key).and_then(raw_text),
                    raw: raw.clone(),
                    error,
                });
            }
        }
    }
    batch
}

fn raw_text(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) => Some(s.trim().to_string()),
        other => Some(other.to_string()),
    }
}

fn is_null_cell(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Null => true,
        serde_json::Value::String(s) => NULL_TOKENS.contains(&s.trim()),
        _ => false,
    }
}

fn coerce_field(
    spec: &FieldSpec,
    cell: Option<&serde_json::Value>,
) -> Result<Value, NormalizationError> {
    let Some(cell) = cell.filter(|c| !is_null_cell(c)) else {
        return Ok(Value::Null);
    };

    let invalid = || NormalizationError::InvalidType {
        field: spec.name.clone(),
        value: raw_text(cell).unwrap_or_default(),
        expected: spec.field_type,
    };

    use serde_json::Value as J;
    let value = match (spec.field_type, cell) {
        (FieldType::String, J::String(s)) => Value::Text(apply_transform(s, spec.transform)),
        (FieldType::String, J::Number(n)) => Value::Text(n.to_string()),
        (FieldType::String, J::Bool(b)) => Value::Text(b.to_string()),

        (FieldType::Integer, J::Number(n)) => match n.as_i64() {
            Some(i) => Value::Int(i),
            None => integral(n.as_f64()).map(Value::Int).ok_or_else(invalid)?,
        },
        (FieldType::Integer, J::String(s)) => parse_integer(s.trim())
            .map(Value::Int)
            .ok_or_else(invalid)?,

        (FieldType::Float, J::Number(n)) => n.as_f64().map(Value::Float).ok_or_else(invalid)?,
        (FieldType::Float, J::String(s)) => s
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|f| f.is_finite())
            .map(Value::Float)
            .ok_or_else(invalid)?,

        (FieldType::Boolean, J::Bool(b)) => Value::Bool(*b),
        (FieldType::Boolean, J::Number(n)) => match n.as_i64() {
            Some(1) => Value::Bool(true),
            Some(0) => Value::Bool(false),
            _ => return Err(invalid()),
        },
        (FieldType::Boolean, J::String(s)) => parse_bool(s.trim())
            .map(Value::Bool)
            .ok_or_else(invalid)?,

        (FieldType::Date, J::String(s)) => {
            parse_date(s.trim()).map(Value::Date).ok_or_else(invalid)?
        }
        (FieldType::Timestamp, J::String(s)) => parse_timestamp(s.trim())
            .map(Value::Timestamp)
            .ok_or_else(invalid)?,

        _ => return Err(invalid()),
    };
    Ok(value)
}

fn apply_transform(s: &str, transform: Option<FieldTransform>) -> String {
    let trimmed = s.trim();
    match transform {
        None | Some(FieldTransform::Trim) => trimmed.to_string(),
        Some(FieldTransform::Lowercase) => trimmed.to_lowercase(),
        Some(FieldTransform::Uppercase) => trimmed.to_uppercase(),
    }
}

fn integral(f: Option<f64>) -> Option<i64> {
    let f = f?;
    // i64::MAX as f64 rounds up, so compare strictly below it
    if f.is_finite() && f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 {
        Some(f as i64)
    } else {
        None
    }
}

fn parse_integer(s: &str) -> Option<i64> {
    s.parse::<i64>()
        .ok()
        .or_else(|| integral(s.parse::<f64>().ok()))
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.to_ascii_lowercase().as_str() {
        "true" | "t" | "yes" | "y" | "1" => Some(true),
        "false" | "f" | "no" | "n" | "0" => Some(false),
        _ => None,
    }
}

/// Parse a `YYYY-MM-DD` date
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()
}

/// Parse a timestamp in RFC 3339, `YYYY-MM-DD HH:MM:SS[.f]` (UTC) or bare
/// date form, truncated to microseconds
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let parsed = DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
                .map(|ndt| ndt.and_utc())
        })
        .or_else(|| {
            parse_date(s)
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|ndt| ndt.and_utc())
        })?;
    Some(parsed.trunc_subsecs(6))
}

#[cfg(test)]
#[path = "normalize_test.rs"]
mod tests;
