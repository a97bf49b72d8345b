//! Fact reference resolution and measure computation
//!
//! Each fact record is resolved on its own: a record whose dimension
//! reference has no current surrogate key is set aside with a
//! [`FactError`] and the rest of the batch carries on.

use crate::entity::{EntityDescriptor, Measures};
use crate::error::FactError;
use crate::names::{EntityName, NaturalKey};
use crate::record::NormalizedRecord;
use crate::scd::MergePlan;
use crate::value::Value;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};

/// Natural key to current surrogate key lookup across dimensions
pub trait KeyLookup {
    fn current_key(&self, dimension: &str, natural_key: &str) -> Option<i64>;
}

/// Surrogate keys known to one run.
///
/// Keys produced by merges in this run shadow the persisted current keys
/// loaded from the warehouse.
#[derive(Debug, Clone, Default)]
pub struct DimensionKeys {
    persisted: HashMap<EntityName, HashMap<NaturalKey, i64>>,
    merged: HashMap<EntityName, HashMap<NaturalKey, i64>>,
}

impl DimensionKeys {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the persisted current keys of one dimension
    pub fn set_persisted(&mut self, dimension: EntityName, keys: HashMap<NaturalKey, i64>) {
        self.persisted.insert(dimension, keys);
    }

    /// Overlay the keys produced by a merge in this run
    pub fn record_merge(&mut self, plan: &MergePlan) {
        self.merged
            .entry(plan.entity.clone())
            .or_default()
            .extend(plan.current_keys());
    }

    pub fn has_dimension(&self, dimension: &str) -> bool {
        self.persisted.contains_key(dimension) || self.merged.contains_key(dimension)
    }
}

impl KeyLookup for DimensionKeys {
    fn current_key(&self, dimension: &str, natural_key: &str) -> Option<i64> {
        self.merged
            .get(dimension)
            .and_then(|keys| keys.get(natural_key))
            .or_else(|| {
                self.persisted
                    .get(dimension)
                    .and_then(|keys| keys.get(natural_key))
            })
            .copied()
    }
}

/// A fact record ready to be written
#[derive(Debug, Clone, PartialEq)]
pub struct FactRow {
    pub source_key: NaturalKey,
    pub observed_at: DateTime<Utc>,
    pub attributes: BTreeMap<String, Value>,
    /// Reference column to resolved surrogate key
    pub keys: BTreeMap<String, i64>,
    /// Computed total, when the entity declares measures
    pub total: Option<f64>,
}

/// A fact record excluded from the write set
#[derive(Debug, Clone, PartialEq)]
pub struct RejectedFact {
    pub record: NormalizedRecord,
    pub error: FactError,
}

#[derive(Debug, Clone, Default)]
pub struct FactResolution {
    pub rows: Vec<FactRow>,
    pub failures: Vec<RejectedFact>,
}

impl FactResolution {
    pub fn resolved(&self) -> usize {
        self.rows.len()
    }

    /// Records rejected for an unresolved dimension reference
    pub fn unresolved(&self) -> usize {
        self.failures
            .iter()
            .filter(|f| matches!(f.error, FactError::UnresolvedReference { .. }))
            .count()
    }
}

/// Resolve every record of a fact batch, keeping failures alongside
pub fn resolve_facts<L: KeyLookup + ?Sized>(
    entity: &EntityDescriptor,
    batch: &[NormalizedRecord],
    lookup: &L,
) -> FactResolution {
    let mut resolution = FactResolution::default();
    for record in batch {
        match resolve_fact(entity, record, lookup) {
            Ok(row) => resolution.rows.push(row),
            Err(error) => {
                log::debug!("Fact {} {} rejected: {}", entity.name, record.source_key, error);
                resolution.failures.push(RejectedFact {
                    record: record.clone(),
                    error,
                });
            }
        }
    }
    resolution
}

/// Resolve a single fact record
pub fn resolve_fact<L: KeyLookup + ?Sized>(
    entity: &EntityDescriptor,
    record: &NormalizedRecord,
    lookup: &L,
) -> Result<FactRow, FactError> {
    for field in &entity.dedup_key {
        if record.get(field).is_null() {
            return Err(FactError::MissingDedupKey {
                field: field.clone(),
            });
        }
    }

    let mut keys = BTreeMap::new();
    for reference in &entity.references {
        let natural_key = record.get(&reference.field).render();
        let surrogate = natural_key
            .as_deref()
            .and_then(|nk| lookup.current_key(&reference.dimension, nk))
            .ok_or_else(|| FactError::UnresolvedReference {
                dimension: reference.dimension.to_string(),
                field: reference.field.clone(),
                natural_key: natural_key.clone().unwrap_or_else(|| "null".to_string()),
            })?;
        keys.insert(reference.column.clone(), surrogate);
    }

    let total = entity
        .measures
        .as_ref()
        .map(|m| compute_total(m, record))
        .transpose()?;

    Ok(FactRow {
        source_key: record.source_key.clone(),
        observed_at: record.observed_at,
        attributes: record.attributes.clone(),
        keys,
        total,
    })
}

/// `quantity * unit_price - discount + tax`, rounded to cents.
///
/// Discount and tax count as zero when absent or null.
pub fn compute_total(measures: &Measures, record: &NormalizedRecord) -> Result<f64, FactError> {
    let required = |field: &str| {
        record
            .get(field)
            .as_f64()
            .ok_or_else(|| FactError::InvalidMeasure {
                field: field.to_string(),
            })
    };
    let optional = |field: Option<&String>| match field {
        None => Ok(0.0),
        Some(name) if record.get(name).is_null() => Ok(0.0),
        Some(name) => required(name),
    };

    let quantity = required(&measures.quantity)?;
    let unit_price = required(&measures.unit_price)?;
    let discount = optional(measures.discount.as_ref())?;
    let tax = optional(measures.tax.as_ref())?;

    Ok(round_cents(quantity * unit_price - discount + tax))
}

fn round_cents(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}

#[cfg(test)]
#[path = "fact_test.rs"]
mod tests;
