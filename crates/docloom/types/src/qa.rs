//! QA records: mechanical findings from structural/schema checks
//!
//! A `QaResult` is returned, never raised. Warnings are flagged but
//! never fail a check; only error-severity findings do.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Severity of a QA finding
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FindingSeverity {
    Error,
    Warning,
}

/// One mechanical finding against a produced document
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QaFinding {
    pub severity: FindingSeverity,
    /// JSON path locating the offending element
    pub path: String,
    pub message: String,
    /// The rule that produced this finding (e.g. `schema_validation`)
    pub rule: String,
}

impl QaFinding {
    pub fn error(rule: impl Into<String>, path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: FindingSeverity::Error,
            path: path.into(),
            message: message.into(),
            rule: rule.into(),
        }
    }

    pub fn warning(
        rule: impl Into<String>,
        path: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity: FindingSeverity::Warning,
            path: path.into(),
            message: message.into(),
            rule: rule.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity == FindingSeverity::Error
    }
}

/// The outcome of one QA check
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QaResult {
    pub passed: bool,
    pub findings: Vec<QaFinding>,
    pub checked_at: DateTime<Utc>,
}

impl QaResult {
    /// A passing result with no findings
    pub fn pass() -> Self {
        Self {
            passed: true,
            findings: Vec::new(),
            checked_at: Utc::now(),
        }
    }

    /// Build from findings; passes iff none has error severity
    pub fn from_findings(findings: Vec<QaFinding>) -> Self {
        let passed = !findings.iter().any(QaFinding::is_error);
        Self {
            passed,
            findings,
            checked_at: Utc::now(),
        }
    }

    /// A failing result with a single error finding
    pub fn single_error(
        rule: impl Into<String>,
        path: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::from_findings(vec![QaFinding::error(rule, path, message)])
    }

    pub fn error_count(&self) -> usize {
        self.findings.iter().filter(|f| f.is_error()).count()
    }

    pub fn has_errors(&self) -> bool {
        self.findings.iter().any(QaFinding::is_error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &QaFinding> {
        self.findings.iter().filter(|f| !f.is_error())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pass() {
        let result = QaResult::pass();
        assert!(result.passed);
        assert_eq!(result.error_count(), 0);
    }

    #[test]
    fn test_warnings_never_fail() {
        let result = QaResult::from_findings(vec![QaFinding::warning(
            "empty_document",
            "$",
            "document is an empty object",
        )]);
        assert!(result.passed);
        assert!(!result.has_errors());
        assert_eq!(result.warnings().count(), 1);
    }

    #[test]
    fn test_any_error_fails() {
        let result = QaResult::from_findings(vec![
            QaFinding::warning("w", "$", "warning"),
            QaFinding::error("schema_validation", "$.title", "missing"),
        ]);
        assert!(!result.passed);
        assert_eq!(result.error_count(), 1);
    }

    #[test]
    fn test_single_error() {
        let result = QaResult::single_error("json_parse", "$", "not valid JSON");
        assert!(!result.passed);
        assert_eq!(result.findings.len(), 1);
        assert_eq!(result.findings[0].rule, "json_parse");
    }
}
