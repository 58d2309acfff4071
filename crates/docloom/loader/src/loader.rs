//! Loading: parse, validate, and hand back a typed workflow
//!
//! The loader is the only sanctioned way to obtain a [`Workflow`] from
//! an untrusted definition. A workflow that comes out of here has
//! passed every validator pass; downstream code treats it as sound.

use crate::errors::{LoaderError, LoaderResult};
use crate::validation::ValidationError;
use crate::validator::WorkflowValidator;
use docloom_types::Workflow;
use serde_json::Value;

/// Loads workflow definitions through the validator
#[derive(Default)]
pub struct WorkflowLoader {
    validator: WorkflowValidator,
}

/// A validated workflow plus any non-blocking findings
#[derive(Debug)]
pub struct LoadedWorkflow {
    pub workflow: Workflow,
    pub warnings: Vec<ValidationError>,
}

impl WorkflowLoader {
    pub fn new() -> Self {
        Self {
            validator: WorkflowValidator::new(),
        }
    }

    pub fn with_validator(validator: WorkflowValidator) -> Self {
        Self { validator }
    }

    /// Load from an already-parsed JSON value
    pub fn load_value(&self, raw: &Value) -> LoaderResult<LoadedWorkflow> {
        let (workflow, result) = self.validator.validate_parsed(raw);
        if !result.is_valid() {
            return Err(LoaderError::Invalid(result));
        }
        // A valid result always carries the parsed workflow.
        match workflow {
            Some(workflow) => Ok(LoadedWorkflow {
                workflow,
                warnings: result.warnings,
            }),
            None => Err(LoaderError::Invalid(result)),
        }
    }

    /// Load from definition text
    pub fn load_str(&self, raw: &str) -> LoaderResult<LoadedWorkflow> {
        let value: Value = serde_json::from_str(raw)?;
        self.load_value(&value)
    }
}
