//! Engine error types

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("workflow definition rejected: {0}")]
    Definition(#[from] docloom_loader::LoaderError),

    /// The generation service call itself failed. Transport failures
    /// fail the step immediately and are never retried by remediation.
    #[error("generation service error: {0}")]
    Generation(String),

    #[error("prompt not found: {0}")]
    PromptNotFound(String),

    #[error("step not found: {0}")]
    StepNotFound(String),

    /// A call that needs a pause marker found none, or found one for a
    /// different step
    #[error("invalid engine state: {0}")]
    InvalidState(String),

    #[error("invalid QA schema for '{0}': {1}")]
    InvalidSchema(String, String),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Workflow(#[from] docloom_types::WorkflowError),
}

pub type EngineResult<T> = Result<T, EngineError>;
