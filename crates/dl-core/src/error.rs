//! Error types for dl-core

use crate::value::FieldType;
use thiserror::Error;

/// Core error type for dimload configuration and I/O
#[derive(Error, Debug)]
pub enum CoreError {
    /// E001: Configuration file not found
    #[error("[E001] Config file not found: {path}")]
    ConfigNotFound { path: String },

    /// E002: Failed to parse configuration file
    #[error("[E002] Failed to parse config: {message}")]
    ConfigParseError { message: String },

    /// E003: Invalid configuration value
    #[error("[E003] Invalid config: {message}")]
    ConfigInvalid { message: String },

    /// E004: Entity not declared in the configuration
    #[error("[E004] Entity not found: {name}")]
    EntityNotFound { name: String },

    /// E005: IO error
    #[error("[E005] IO error: {0}")]
    Io(#[from] std::io::Error),

    /// E006: IO error with file path context
    #[error("[E006] Failed to read '{path}': {source}")]
    IoWithPath {
        path: String,
        source: std::io::Error,
    },

    /// E007: YAML parse error
    #[error("[E007] YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for CoreError
pub type CoreResult<T> = Result<T, CoreError>;

/// A single raw record could not be mapped onto its entity descriptor.
///
/// Record-scoped: the record is excluded from the batch and counted.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NormalizationError {
    /// N001: A required field is absent or null
    #[error("[N001] Missing required field '{field}'")]
    MissingField { field: String },

    /// N002: A field value cannot be coerced to its declared type
    #[error("[N002] Field '{field}' value '{value}' cannot be coerced to {expected}")]
    InvalidType {
        field: String,
        value: String,
        expected: FieldType,
    },
}

/// Batch-scoped dimension merge failures
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MergeError {
    /// S001: The same natural key appears twice in one batch with different attributes
    #[error("[S001] Ambiguous merge in '{entity}': natural key '{natural_key}' appears with conflicting attributes in one batch")]
    Ambiguous { entity: String, natural_key: String },

    /// S002: Merge requested for an entity that is not a dimension
    #[error("[S002] Entity '{entity}' is not a dimension")]
    NotADimension { entity: String },

    /// S003: The merge instant does not come after the current version's start
    #[error("[S003] Cannot version '{natural_key}' in '{entity}': merge time {as_of} is not after current version start {effective_from}")]
    EffectiveDateRegression {
        entity: String,
        natural_key: String,
        as_of: String,
        effective_from: String,
    },
}

/// Record-scoped fact resolution failures
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FactError {
    /// R001: A dimension reference has no current surrogate key
    #[error("[R001] Unresolved reference: dimension '{dimension}' has no current row for '{natural_key}' (field '{field}')")]
    UnresolvedReference {
        dimension: String,
        field: String,
        natural_key: String,
    },

    /// R002: A measure needed for the total is missing or not numeric
    #[error("[R002] Measure '{field}' is missing or not numeric")]
    InvalidMeasure { field: String },

    /// R003: A field of the deduplication key is null
    #[error("[R003] Deduplication key field '{field}' is null")]
    MissingDedupKey { field: String },
}
