//! Loader error types

use crate::validation::ValidationResult;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("workflow definition is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("workflow definition failed validation: {0}")]
    Invalid(ValidationResult),
}

impl LoaderError {
    /// The validation findings, when this error carries them
    pub fn validation(&self) -> Option<&ValidationResult> {
        match self {
            Self::Invalid(result) => Some(result),
            Self::Parse(_) => None,
        }
    }
}

pub type LoaderResult<T> = Result<T, LoaderError>;
