//! Error types for dl-pipeline

use dl_core::{CoreError, MergeError};
use dl_db::DbError;
use dl_meta::MetaError;
use dl_quality::QualityError;
use thiserror::Error;

/// Anything that aborts a run
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Merge(#[from] MergeError),

    #[error(transparent)]
    Quality(#[from] QualityError),

    #[error(transparent)]
    Db(#[from] DbError),

    #[error(transparent)]
    Meta(#[from] MetaError),

    /// Aggregate quality score below the configured minimum (P001)
    #[error("[P001] Quality gate failed for '{entity}': score {score:.2} < {min_score:.2} (failing rules: {})", failed_rules.join(", "))]
    QualityGateFailure {
        entity: String,
        score: f64,
        min_score: f64,
        failed_rules: Vec<String>,
    },

    /// Cancellation observed at a phase boundary (P002)
    #[error("[P002] run cancelled")]
    Cancelled,

    /// Shared run state mutex poisoned (P003)
    #[error("[P003] Pipeline state lock poisoned")]
    LockPoisoned,
}

/// Result type alias for PipelineError
pub type PipelineResult<T> = Result<T, PipelineError>;
