//! Warehouse and extractor trait definitions

use crate::error::DbResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dl_core::{
    DimensionRow, DimensionSnapshot, EntityDescriptor, ExtractionBounds, FactRow, MergePlan,
    NaturalKey, RawRecord,
};
use std::collections::HashMap;

/// Outcome of one fact batch write
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FactWriteSummary {
    /// Rows that landed in the fact table
    pub inserted: usize,
    /// Rows skipped because their deduplication key already existed
    pub duplicates: usize,
}

/// Persistence for dimension and fact tables
///
/// Implementations must be Send + Sync for async operation.
#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Create the entity's table if it does not exist
    async fn ensure_table(&self, entity: &EntityDescriptor) -> DbResult<()>;

    /// Current rows of a dimension plus the next free surrogate key
    async fn dimension_snapshot(&self, entity: &EntityDescriptor) -> DbResult<DimensionSnapshot>;

    /// Apply every op of a merge plan in one transaction
    async fn apply_merge(
        &self,
        entity: &EntityDescriptor,
        plan: &MergePlan,
        loaded_at: DateTime<Utc>,
    ) -> DbResult<()>;

    /// Natural key to current surrogate key for a dimension
    async fn current_keys(&self, entity: &EntityDescriptor)
        -> DbResult<HashMap<NaturalKey, i64>>;

    /// The current version of one dimension member
    async fn current_row(
        &self,
        entity: &EntityDescriptor,
        natural_key: &str,
    ) -> DbResult<Option<DimensionRow>>;

    /// The version of one dimension member valid at `instant`
    async fn row_as_of(
        &self,
        entity: &EntityDescriptor,
        natural_key: &str,
        instant: DateTime<Utc>,
    ) -> DbResult<Option<DimensionRow>>;

    /// Every version of one dimension member, oldest first
    async fn history(
        &self,
        entity: &EntityDescriptor,
        natural_key: &str,
    ) -> DbResult<Vec<DimensionRow>>;

    /// Write resolved fact rows in one transaction.
    ///
    /// Rows whose deduplication key already exists are skipped. Every
    /// surrogate key must exist in its dimension table or nothing is written.
    async fn write_facts(
        &self,
        entity: &EntityDescriptor,
        dimensions: &[&EntityDescriptor],
        rows: &[FactRow],
        loaded_at: DateTime<Utc>,
    ) -> DbResult<FactWriteSummary>;

    /// Number of rows in a fact table
    async fn fact_count(&self, entity: &EntityDescriptor) -> DbResult<usize>;

    /// Check if a table exists
    async fn table_exists(&self, name: &str) -> DbResult<bool>;

    /// Database type identifier for logging
    fn db_type(&self) -> &'static str;
}

/// Source of raw records for one entity
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Records inside `bounds`, ordered by `(watermark, natural key)`
    async fn extract(
        &self,
        entity: &EntityDescriptor,
        bounds: &ExtractionBounds,
    ) -> DbResult<Vec<RawRecord>>;
}
