//! QA gate: mechanical structural and schema checks
//!
//! Never domain judgment. Schemas are registered per document type and
//! compiled once at registration; `check` collects every violation,
//! not just the first.

use crate::errors::{EngineError, EngineResult};
use docloom_types::{QaFinding, QaResult};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

pub struct QaGate {
    validators: HashMap<String, Arc<jsonschema::Validator>>,
    /// Document types expected to carry a schema; a strict check on
    /// one of these without a registered schema flags `schema_missing`
    expected: HashSet<String>,
}

impl Default for QaGate {
    fn default() -> Self {
        Self::new()
    }
}

impl QaGate {
    pub fn new() -> Self {
        Self {
            validators: HashMap::new(),
            expected: HashSet::new(),
        }
    }

    /// Register and compile a schema for a document type
    pub fn register_schema(&mut self, doc_type: impl Into<String>, schema: &Value) -> EngineResult<()> {
        let doc_type = doc_type.into();
        let validator = jsonschema::validator_for(schema)
            .map_err(|err| EngineError::InvalidSchema(doc_type.clone(), err.to_string()))?;
        self.expected.insert(doc_type.clone());
        self.validators.insert(doc_type, Arc::new(validator));
        Ok(())
    }

    /// Mark a document type as expected to have a schema without
    /// registering one
    pub fn expect_schema(&mut self, doc_type: impl Into<String>) {
        self.expected.insert(doc_type.into());
    }

    pub fn has_schema(&self, doc_type: &str) -> bool {
        self.validators.contains_key(doc_type)
    }

    /// Check a raw string output: parse, then structural/schema checks
    pub fn check_str(&self, output: &str, doc_type: &str, strict: bool) -> QaResult {
        match serde_json::from_str::<Value>(output) {
            Ok(value) => self.check(&value, doc_type, strict),
            Err(err) => QaResult::single_error(
                "json_parse",
                "$",
                format!("output is not valid JSON: {}", err),
            ),
        }
    }

    /// Check a parsed output document
    pub fn check(&self, output: &Value, doc_type: &str, strict: bool) -> QaResult {
        let mut findings = Vec::new();

        match output {
            Value::Null => {
                findings.push(QaFinding::error("structure", "$", "document is null"));
            }
            Value::Object(map) if map.is_empty() => {
                findings.push(QaFinding::warning(
                    "empty_document",
                    "$",
                    "document is an empty object",
                ));
            }
            Value::Array(items) if items.is_empty() => {
                findings.push(QaFinding::warning(
                    "empty_document",
                    "$",
                    "document is an empty array",
                ));
            }
            Value::Object(_) | Value::Array(_) => {}
            other => {
                findings.push(QaFinding::error(
                    "structure",
                    "$",
                    format!("document must be an object or array, got {}", kind(other)),
                ));
            }
        }

        match self.validators.get(doc_type) {
            Some(validator) => {
                for error in validator.iter_errors(output) {
                    findings.push(QaFinding::error(
                        "schema_validation",
                        error.instance_path.to_string(),
                        error.to_string(),
                    ));
                }
            }
            None if strict && self.expected.contains(doc_type) => {
                findings.push(QaFinding::warning(
                    "schema_missing",
                    "$",
                    format!("no schema registered for document type '{}'", doc_type),
                ));
            }
            None => {}
        }

        let result = QaResult::from_findings(findings);
        tracing::debug!(doc_type = %doc_type, passed = result.passed,
            errors = result.error_count(), "qa check");
        result
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
