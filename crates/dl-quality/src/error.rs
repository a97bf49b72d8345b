//! Error types for dl-quality

use thiserror::Error;

/// Quality rule errors
#[derive(Error, Debug)]
pub enum QualityError {
    /// Q001: A regex rule carries an invalid pattern
    #[error("[Q001] Rule '{rule}' has an invalid pattern: {message}")]
    InvalidPattern { rule: String, message: String },
}

/// Result type alias for QualityError
pub type QualityResult<T> = Result<T, QualityError>;
