//! Slowly-changing-dimension merge planning
//!
//! [`merge_dimension`] compares an incoming batch with an explicit snapshot
//! of the dimension's current rows and returns a [`MergePlan`]. It never
//! touches storage; the warehouse applies the plan in one transaction.
//!
//! Type-1 and Type-2 go through the same algorithm. The policy decides
//! which attributes are compared and what a changed natural key turns into:
//!
//! | change                   | type1    | type2       |
//! |--------------------------|----------|-------------|
//! | new natural key          | insert   | insert      |
//! | nothing changed          | no-op    | no-op       |
//! | tracked attribute change | update   | supersede   |
//! | other attribute change   | update   | no-op       |

use crate::entity::{EntityDescriptor, ScdPolicy};
use crate::error::MergeError;
use crate::names::{EntityName, NaturalKey};
use crate::record::{NormalizedRecord, NULL_VALUE};
use crate::value::Value;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};

/// `effective_to` of every current row: 9999-12-31 23:59:59 UTC
pub fn open_ended() -> DateTime<Utc> {
    DateTime::from_timestamp(253_402_300_799, 0).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// One persisted version of a dimension member
#[derive(Debug, Clone, PartialEq)]
pub struct DimensionRow {
    pub surrogate_key: i64,
    pub natural_key: NaturalKey,
    pub attributes: BTreeMap<String, Value>,
    pub effective_from: DateTime<Utc>,
    pub effective_to: DateTime<Utc>,
    pub is_current: bool,
}

impl DimensionRow {
    pub fn get(&self, field: &str) -> &Value {
        self.attributes.get(field).unwrap_or(&NULL_VALUE)
    }

    /// Whether this version was valid at `instant`
    pub fn covers(&self, instant: DateTime<Utc>) -> bool {
        self.effective_from <= instant && instant < self.effective_to
    }
}

/// Current rows of one dimension, keyed by natural key
#[derive(Debug, Clone, PartialEq)]
pub struct DimensionSnapshot {
    pub entity: EntityName,
    pub current: HashMap<NaturalKey, DimensionRow>,
    /// Next unused surrogate key; keys are never reused
    pub next_surrogate_key: i64,
}

impl DimensionSnapshot {
    pub fn empty(entity: EntityName) -> Self {
        Self {
            entity,
            current: HashMap::new(),
            next_surrogate_key: 1,
        }
    }

    pub fn from_rows(
        entity: EntityName,
        rows: impl IntoIterator<Item = DimensionRow>,
        next_surrogate_key: i64,
    ) -> Self {
        let current = rows
            .into_iter()
            .filter(|r| r.is_current)
            .map(|r| (r.natural_key.clone(), r))
            .collect();
        Self {
            entity,
            current,
            next_surrogate_key,
        }
    }

    pub fn len(&self) -> usize {
        self.current.len()
    }

    pub fn is_empty(&self) -> bool {
        self.current.is_empty()
    }
}

/// A single write produced by the merge planner
#[derive(Debug, Clone, PartialEq)]
pub enum MergeOp {
    /// First version of a new natural key
    Insert(DimensionRow),

    /// Overwrite attributes of an existing row in place
    Update {
        surrogate_key: i64,
        natural_key: NaturalKey,
        attributes: BTreeMap<String, Value>,
    },

    /// Close the current version and open a new one.
    ///
    /// Both halves must be applied together or not at all.
    Supersede {
        expired_key: i64,
        effective_to: DateTime<Utc>,
        replacement: DimensionRow,
    },
}

impl MergeOp {
    pub fn natural_key(&self) -> &NaturalKey {
        match self {
            MergeOp::Insert(row) => &row.natural_key,
            MergeOp::Update { natural_key, .. } => natural_key,
            MergeOp::Supersede { replacement, .. } => &replacement.natural_key,
        }
    }

    /// Surrogate key that is current once this op is applied
    pub fn current_key(&self) -> i64 {
        match self {
            MergeOp::Insert(row) => row.surrogate_key,
            MergeOp::Update { surrogate_key, .. } => *surrogate_key,
            MergeOp::Supersede { replacement, .. } => replacement.surrogate_key,
        }
    }
}

/// Writes needed to bring a dimension in line with one batch
#[derive(Debug, Clone, PartialEq)]
pub struct MergePlan {
    pub entity: EntityName,
    pub policy: ScdPolicy,
    pub as_of: DateTime<Utc>,
    pub ops: Vec<MergeOp>,
    /// Natural keys present with identical compared attributes
    pub unchanged: usize,
}

impl MergePlan {
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn inserted(&self) -> usize {
        self.ops
            .iter()
            .filter(|op| matches!(op, MergeOp::Insert(_)))
            .count()
    }

    pub fn updated(&self) -> usize {
        self.ops
            .iter()
            .filter(|op| matches!(op, MergeOp::Update { .. }))
            .count()
    }

    /// Expired versions, one per superseded natural key
    pub fn expired(&self) -> usize {
        self.ops
            .iter()
            .filter(|op| matches!(op, MergeOp::Supersede { .. }))
            .count()
    }

    /// Natural key to current surrogate key for every key this plan touched
    pub fn current_keys(&self) -> HashMap<NaturalKey, i64> {
        self.ops
            .iter()
            .map(|op| (op.natural_key().clone(), op.current_key()))
            .collect()
    }
}

/// Plan the merge of `batch` into `snapshot`.
///
/// `as_of` is the merge instant: new versions start there and superseded
/// versions end there. Each natural key may appear at most once per batch;
/// exact duplicates are collapsed, conflicting ones fail the whole merge.
pub fn merge_dimension(
    entity: &EntityDescriptor,
    snapshot: &DimensionSnapshot,
    batch: &[NormalizedRecord],
    as_of: DateTime<Utc>,
) -> Result<MergePlan, MergeError> {
    if !entity.is_dimension() {
        return Err(MergeError::NotADimension {
            entity: entity.name.to_string(),
        });
    }

    let incoming = partition_by_key(entity, batch)?;
    let compared: Vec<&str> = match entity.scd {
        ScdPolicy::Type1 => entity
            .fields
            .iter()
            .map(|f| f.name.as_str())
            .filter(|name| *name != entity.natural_key)
            .collect(),
        ScdPolicy::Type2 => entity.tracked_attributes(),
    };

    let mut next_key = snapshot.next_surrogate_key;
    let mut plan = MergePlan {
        entity: entity.name.clone(),
        policy: entity.scd,
        as_of,
        ops: Vec::new(),
        unchanged: 0,
    };

    for record in incoming {
        let Some(current) = snapshot.current.get(&record.source_key) else {
            plan.ops.push(MergeOp::Insert(new_version(record, next_key, as_of)));
            next_key += 1;
            continue;
        };

        if compared.iter().all(|n| current.get(n) == record.get(n)) {
            plan.unchanged += 1;
            continue;
        }

        if entity.scd == ScdPolicy::Type2 {
            if as_of <= current.effective_from {
                return Err(MergeError::EffectiveDateRegression {
                    entity: entity.name.to_string(),
                    natural_key: record.source_key.to_string(),
                    as_of: as_of.to_rfc3339(),
                    effective_from: current.effective_from.to_rfc3339(),
                });
            }
            plan.ops.push(MergeOp::Supersede {
                expired_key: current.surrogate_key,
                effective_to: as_of,
                replacement: new_version(record, next_key, as_of),
            });
            next_key += 1;
        } else {
            plan.ops.push(MergeOp::Update {
                surrogate_key: current.surrogate_key,
                natural_key: record.source_key.clone(),
                attributes: record.attributes.clone(),
            });
        }
    }

    log::debug!(
        "Planned merge for {}: {} inserts, {} updates, {} expirations, {} unchanged",
        plan.entity,
        plan.inserted(),
        plan.updated(),
        plan.expired(),
        plan.unchanged
    );
    Ok(plan)
}

/// Group the batch by natural key, keeping first-seen order
fn partition_by_key<'a>(
    entity: &EntityDescriptor,
    batch: &'a [NormalizedRecord],
) -> Result<Vec<&'a NormalizedRecord>, MergeError> {
    let mut seen: HashMap<&NaturalKey, &NormalizedRecord> = HashMap::new();
    let mut ordered = Vec::with_capacity(batch.len());
    for record in batch {
        match seen.get(&record.source_key) {
            Some(first) if first.attributes == record.attributes => {}
            Some(_) => {
                return Err(MergeError::Ambiguous {
                    entity: entity.name.to_string(),
                    natural_key: record.source_key.to_string(),
                })
            }
            None => {
                seen.insert(&record.source_key, record);
                ordered.push(record);
            }
        }
    }
    Ok(ordered)
}

fn new_version(record: &NormalizedRecord, surrogate_key: i64, as_of: DateTime<Utc>) -> DimensionRow {
    DimensionRow {
        surrogate_key,
        natural_key: record.source_key.clone(),
        attributes: record.attributes.clone(),
        effective_from: as_of,
        effective_to: open_ended(),
        is_current: true,
    }
}

#[cfg(test)]
#[path = "scd_test.rs"]
mod tests;
