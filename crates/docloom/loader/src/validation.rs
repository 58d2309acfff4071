//! Validation findings: machine-checkable codes, messages, and paths
//!
//! Definition errors are returned as accumulated findings, never
//! raised. Each finding carries a stable code a client can branch on,
//! a human message, and a path locating the offending element.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable machine-checkable codes for definition findings
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ValidationCode {
    SchemaInvalid,
    MissingRequiredField,
    UnknownDocumentType,
    UnknownEntityType,
    UnknownScope,
    OwnershipCycle,
    ScopeMismatch,
    InvalidScopeHierarchy,
    InvalidReference,
    MissingIterationSource,
    ForbiddenSiblingReference,
    ForbiddenDescendantReference,
    ForbiddenCrossBranchReference,
    InvalidPromptFormat,
    PromptNotInManifest,
}

impl fmt::Display for ValidationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = match self {
            Self::SchemaInvalid => "schema-invalid",
            Self::MissingRequiredField => "missing-required-field",
            Self::UnknownDocumentType => "unknown-document-type",
            Self::UnknownEntityType => "unknown-entity-type",
            Self::UnknownScope => "unknown-scope",
            Self::OwnershipCycle => "ownership-cycle",
            Self::ScopeMismatch => "scope-mismatch",
            Self::InvalidScopeHierarchy => "invalid-scope-hierarchy",
            Self::InvalidReference => "invalid-reference",
            Self::MissingIterationSource => "missing-iteration-source",
            Self::ForbiddenSiblingReference => "forbidden-sibling-reference",
            Self::ForbiddenDescendantReference => "forbidden-descendant-reference",
            Self::ForbiddenCrossBranchReference => "forbidden-cross-branch-reference",
            Self::InvalidPromptFormat => "invalid-prompt-format",
            Self::PromptNotInManifest => "prompt-not-in-manifest",
        };
        write!(f, "{}", code)
    }
}

/// One validation finding
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationError {
    pub code: ValidationCode,
    pub message: String,
    /// Path locating the offending element, e.g. `steps[1].inputs[0].scope`
    pub path: String,
}

impl ValidationError {
    pub fn new(
        code: ValidationCode,
        path: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            code,
            message: message.into(),
            path: path.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.code, self.path, self.message)
    }
}

/// The accumulated outcome of validating one definition.
///
/// Warnings flag findings that do not block registration (the prompt
/// manifest check by default); `is_valid` considers errors only.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub errors: Vec<ValidationError>,
    #[serde(default)]
    pub warnings: Vec<ValidationError>,
}

impl ValidationResult {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn from_errors(errors: Vec<ValidationError>) -> Self {
        Self {
            errors,
            warnings: Vec::new(),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn push_error(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    pub fn push_warning(&mut self, warning: ValidationError) {
        self.warnings.push(warning);
    }

    /// All error codes present, for targeted assertions
    pub fn codes(&self) -> Vec<ValidationCode> {
        self.errors.iter().map(|e| e.code).collect()
    }

    pub fn has_code(&self, code: ValidationCode) -> bool {
        self.errors.iter().any(|e| e.code == code)
    }
}

impl fmt::Display for ValidationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "valid")
        } else {
            write!(f, "{} validation error(s)", self.errors.len())?;
            for error in &self.errors {
                write!(f, "\n  {}", error)?;
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_serialize_kebab_case() {
        let json = serde_json::to_string(&ValidationCode::ForbiddenSiblingReference).unwrap();
        assert_eq!(json, "\"forbidden-sibling-reference\"");
        assert_eq!(
            ValidationCode::UnknownScope.to_string(),
            "unknown-scope"
        );
    }

    #[test]
    fn test_valid_iff_no_errors() {
        let mut result = ValidationResult::ok();
        assert!(result.is_valid());

        result.push_warning(ValidationError::new(
            ValidationCode::PromptNotInManifest,
            "steps[0].task_prompt",
            "prompt not found in manifest",
        ));
        assert!(result.is_valid());

        result.push_error(ValidationError::new(
            ValidationCode::UnknownScope,
            "document_types.brief.scope",
            "scope 'sprint' is not declared",
        ));
        assert!(!result.is_valid());
        assert!(result.has_code(ValidationCode::UnknownScope));
    }

    #[test]
    fn test_display() {
        let error = ValidationError::new(
            ValidationCode::ScopeMismatch,
            "steps[2].scope",
            "step scope 'epic' does not match produced document scope 'story'",
        );
        let rendered = error.to_string();
        assert!(rendered.contains("scope-mismatch"));
        assert!(rendered.contains("steps[2].scope"));
    }
}
