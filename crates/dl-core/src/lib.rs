//! dl-core - Core library for dimload
//!
//! This crate provides the types shared by every dimload component: typed
//! values and records, entity descriptors, configuration parsing, the record
//! normalizer, the slowly-changing-dimension merge planner and fact reference
//! resolution. Everything here is pure; persistence lives in `dl-db` and
//! `dl-meta`.

pub mod checksum;
pub mod config;
pub mod entity;
pub mod error;
pub mod fact;
pub mod names;
mod newtype_string;
pub mod normalize;
pub mod record;
pub mod scd;
pub mod value;
pub mod watermark;

pub use checksum::compute_checksum;
pub use config::{
    Aggregation, Config, LoadMode, QualityConfig, QualityRuleConfig, RuleCheck, Severity,
};
pub use entity::{
    EntityDescriptor, EntityKind, FieldSpec, FieldTransform, Measures, Reference, ScdPolicy,
    RESERVED_COLUMNS,
};
pub use error::{CoreError, CoreResult, FactError, MergeError, NormalizationError};
pub use fact::{
    compute_total, resolve_fact, resolve_facts, DimensionKeys, FactResolution, FactRow, KeyLookup,
    RejectedFact,
};
pub use names::{EntityName, NaturalKey, RuleName};
pub use normalize::{
    normalize, normalize_batch, parse_date, parse_timestamp, source_watermark, NormalizedBatch,
    RejectedRecord,
};
pub use record::{NormalizedRecord, RawRecord};
pub use scd::{merge_dimension, open_ended, DimensionRow, DimensionSnapshot, MergeOp, MergePlan};
pub use value::{FieldType, Value};
pub use watermark::{ExtractionBounds, Watermark};
