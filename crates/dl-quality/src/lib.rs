//! dl-quality - Quality scoring for dimload
//!
//! Evaluates the configured rules against a normalized batch, scores each
//! rule and combines the scores into the verdict of the quality gate.

pub mod error;
pub mod rules;
pub mod scorer;

pub use error::{QualityError, QualityResult};
pub use rules::{CompiledRule, RuleOutcome, SAMPLE_LIMIT};
pub use scorer::{aggregate_score, QualityCheckResult, QualityReport, QualityScorer};
