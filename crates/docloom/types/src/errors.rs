//! Shared error types for the docloom core

use thiserror::Error;

/// Errors raised by the domain model and runtime.
///
/// Expected outcomes — validation findings, QA failures, clarification
/// requests — are modeled as returned result records, not as errors.
/// These variants cover programmer errors and genuinely broken input.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("Invalid scope hierarchy: {0}")]
    InvalidScopeHierarchy(String),

    #[error("Unknown scope: '{0}'")]
    UnknownScope(String),

    #[error("Unknown document type: '{0}'")]
    UnknownDocumentType(String),

    #[error("Unknown entity type: '{0}'")]
    UnknownEntityType(String),

    #[error("Step not found: '{0}'")]
    StepNotFound(String),

    #[error("Step '{0}' is not an iteration step")]
    NotAnIterationStep(String),

    #[error("Step '{0}' is not a production step")]
    NotAProductionStep(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for workflow operations
pub type WorkflowResult<T> = Result<T, WorkflowError>;
