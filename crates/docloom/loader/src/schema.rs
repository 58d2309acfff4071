//! Structural checks of the raw workflow definition (validator pass 1)
//!
//! Operates on the raw JSON value before any typed parsing, so a
//! malformed definition reports the precise missing key or wrong type
//! rather than a serde error. This pass is fail-fast: when it finds
//! anything, later passes do not run.

use crate::validation::{ValidationCode, ValidationError};
use serde_json::Value;
use std::collections::HashSet;

const REQUIRED_TOP_LEVEL: &[&str] = &[
    "schema_version",
    "workflow_id",
    "revision",
    "effective_date",
    "name",
    "scopes",
    "document_types",
    "entity_types",
    "steps",
];

/// Validate the raw definition's structure. Returns every structural
/// finding; empty means the definition is shape-correct.
pub fn validate_structure(raw: &Value) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    let Some(root) = raw.as_object() else {
        errors.push(ValidationError::new(
            ValidationCode::SchemaInvalid,
            "$",
            "workflow definition must be a JSON object",
        ));
        return errors;
    };

    for key in REQUIRED_TOP_LEVEL {
        if !root.contains_key(*key) {
            errors.push(ValidationError::new(
                ValidationCode::MissingRequiredField,
                *key,
                format!("missing required top-level field '{}'", key),
            ));
        }
    }

    check_string(root, "workflow_id", &mut errors);
    check_string(root, "name", &mut errors);
    check_string(root, "effective_date", &mut errors);
    if let Some(revision) = root.get("revision") {
        if !revision.is_u64() {
            errors.push(ValidationError::new(
                ValidationCode::SchemaInvalid,
                "revision",
                "'revision' must be a non-negative integer",
            ));
        }
    }

    if let Some(scopes) = root.get("scopes") {
        validate_scopes(scopes, &mut errors);
    }
    if let Some(document_types) = root.get("document_types") {
        validate_document_types(document_types, &mut errors);
    }
    if let Some(entity_types) = root.get("entity_types") {
        validate_entity_types(entity_types, &mut errors);
    }
    if let Some(steps) = root.get("steps") {
        match steps.as_array() {
            Some(steps) => {
                let mut seen_ids = HashSet::new();
                for (index, step) in steps.iter().enumerate() {
                    validate_step(step, &format!("steps[{}]", index), &mut seen_ids, &mut errors);
                }
            }
            None => errors.push(ValidationError::new(
                ValidationCode::SchemaInvalid,
                "steps",
                "'steps' must be an array",
            )),
        }
    }

    errors
}

fn check_string(
    object: &serde_json::Map<String, Value>,
    key: &str,
    errors: &mut Vec<ValidationError>,
) {
    if let Some(value) = object.get(key) {
        if !value.is_string() {
            errors.push(ValidationError::new(
                ValidationCode::SchemaInvalid,
                key,
                format!("'{}' must be a string", key),
            ));
        }
    }
}

fn validate_scopes(scopes: &Value, errors: &mut Vec<ValidationError>) {
    let Some(scopes) = scopes.as_object() else {
        errors.push(ValidationError::new(
            ValidationCode::SchemaInvalid,
            "scopes",
            "'scopes' must be an object mapping scope name to config",
        ));
        return;
    };
    for (name, config) in scopes {
        let path = format!("scopes.{}", name);
        let Some(config) = config.as_object() else {
            errors.push(ValidationError::new(
                ValidationCode::SchemaInvalid,
                path,
                "scope config must be an object",
            ));
            continue;
        };
        if let Some(parent) = config.get("parent") {
            if !parent.is_null() && !parent.is_string() {
                errors.push(ValidationError::new(
                    ValidationCode::SchemaInvalid,
                    format!("{}.parent", path),
                    "'parent' must be a scope name or null",
                ));
            }
        }
    }
}

fn validate_document_types(document_types: &Value, errors: &mut Vec<ValidationError>) {
    let Some(document_types) = document_types.as_object() else {
        errors.push(ValidationError::new(
            ValidationCode::SchemaInvalid,
            "document_types",
            "'document_types' must be an object mapping type name to config",
        ));
        return;
    };
    for (name, config) in document_types {
        let path = format!("document_types.{}", name);
        let Some(config) = config.as_object() else {
            errors.push(ValidationError::new(
                ValidationCode::SchemaInvalid,
                path,
                "document type config must be an object",
            ));
            continue;
        };
        for field in ["name", "scope"] {
            match config.get(field) {
                Some(value) if value.is_string() => {}
                Some(_) => errors.push(ValidationError::new(
                    ValidationCode::SchemaInvalid,
                    format!("{}.{}", path, field),
                    format!("'{}' must be a string", field),
                )),
                None => errors.push(ValidationError::new(
                    ValidationCode::MissingRequiredField,
                    format!("{}.{}", path, field),
                    format!("document type '{}' is missing '{}'", name, field),
                )),
            }
        }
        if let Some(may_own) = config.get("may_own") {
            if !is_string_array(may_own) {
                errors.push(ValidationError::new(
                    ValidationCode::SchemaInvalid,
                    format!("{}.may_own", path),
                    "'may_own' must be an array of entity type names",
                ));
            }
        }
        if let Some(accepted_by) = config.get("accepted_by") {
            if !is_string_array(accepted_by) {
                errors.push(ValidationError::new(
                    ValidationCode::SchemaInvalid,
                    format!("{}.accepted_by", path),
                    "'accepted_by' must be an array of role names",
                ));
            }
        }

        // accepted_by non-empty implies acceptance_required
        let has_acceptors = config
            .get("accepted_by")
            .and_then(Value::as_array)
            .is_some_and(|roles| !roles.is_empty());
        let acceptance_required = config
            .get("acceptance_required")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if has_acceptors && !acceptance_required {
            errors.push(ValidationError::new(
                ValidationCode::SchemaInvalid,
                format!("{}.accepted_by", path),
                "'accepted_by' is set but 'acceptance_required' is false",
            ));
        }
    }
}

fn validate_entity_types(entity_types: &Value, errors: &mut Vec<ValidationError>) {
    let Some(entity_types) = entity_types.as_object() else {
        errors.push(ValidationError::new(
            ValidationCode::SchemaInvalid,
            "entity_types",
            "'entity_types' must be an object mapping type name to config",
        ));
        return;
    };
    for (name, config) in entity_types {
        let path = format!("entity_types.{}", name);
        let Some(config) = config.as_object() else {
            errors.push(ValidationError::new(
                ValidationCode::SchemaInvalid,
                path,
                "entity type config must be an object",
            ));
            continue;
        };
        for field in ["name", "parent_doc_type", "creates_scope"] {
            match config.get(field) {
                Some(value) if value.is_string() => {}
                Some(_) => errors.push(ValidationError::new(
                    ValidationCode::SchemaInvalid,
                    format!("{}.{}", path, field),
                    format!("'{}' must be a string", field),
                )),
                None => errors.push(ValidationError::new(
                    ValidationCode::MissingRequiredField,
                    format!("{}.{}", path, field),
                    format!("entity type '{}' is missing '{}'", name, field),
                )),
            }
        }
    }
}

fn validate_step(
    step: &Value,
    path: &str,
    seen_ids: &mut HashSet<String>,
    errors: &mut Vec<ValidationError>,
) {
    let Some(step) = step.as_object() else {
        errors.push(ValidationError::new(
            ValidationCode::SchemaInvalid,
            path,
            "step must be an object",
        ));
        return;
    };

    match step.get("step_id").and_then(Value::as_str) {
        Some(step_id) => {
            if !seen_ids.insert(step_id.to_string()) {
                errors.push(ValidationError::new(
                    ValidationCode::SchemaInvalid,
                    format!("{}.step_id", path),
                    format!("duplicate step id '{}'", step_id),
                ));
            }
        }
        None => errors.push(ValidationError::new(
            ValidationCode::MissingRequiredField,
            format!("{}.step_id", path),
            "step is missing 'step_id'",
        )),
    }

    if step.get("scope").and_then(Value::as_str).is_none() {
        errors.push(ValidationError::new(
            ValidationCode::MissingRequiredField,
            format!("{}.scope", path),
            "step is missing 'scope'",
        ));
    }

    let is_iteration = step.contains_key("iterate_over");
    let has_production_fields = step.contains_key("role")
        || step.contains_key("task_prompt")
        || step.contains_key("produces");

    if is_iteration && has_production_fields {
        errors.push(ValidationError::new(
            ValidationCode::SchemaInvalid,
            path,
            "step mixes iteration and production fields; it must be exactly one",
        ));
        return;
    }

    if is_iteration {
        validate_iteration_step(step, path, seen_ids, errors);
    } else if has_production_fields {
        validate_production_step(step, path, errors);
    } else {
        errors.push(ValidationError::new(
            ValidationCode::SchemaInvalid,
            path,
            "step is neither production-shaped nor iteration-shaped",
        ));
    }
}

fn validate_production_step(
    step: &serde_json::Map<String, Value>,
    path: &str,
    errors: &mut Vec<ValidationError>,
) {
    for field in ["role", "task_prompt", "produces"] {
        match step.get(field) {
            Some(value) if value.is_string() => {}
            Some(_) => errors.push(ValidationError::new(
                ValidationCode::SchemaInvalid,
                format!("{}.{}", path, field),
                format!("'{}' must be a string", field),
            )),
            None => errors.push(ValidationError::new(
                ValidationCode::MissingRequiredField,
                format!("{}.{}", path, field),
                format!("production step is missing '{}'", field),
            )),
        }
    }

    if let Some(inputs) = step.get("inputs") {
        let Some(inputs) = inputs.as_array() else {
            errors.push(ValidationError::new(
                ValidationCode::SchemaInvalid,
                format!("{}.inputs", path),
                "'inputs' must be an array",
            ));
            return;
        };
        for (index, input) in inputs.iter().enumerate() {
            let input_path = format!("{}.inputs[{}]", path, index);
            let Some(input) = input.as_object() else {
                errors.push(ValidationError::new(
                    ValidationCode::SchemaInvalid,
                    input_path,
                    "input reference must be an object",
                ));
                continue;
            };
            if input.get("scope").and_then(Value::as_str).is_none() {
                errors.push(ValidationError::new(
                    ValidationCode::MissingRequiredField,
                    format!("{}.scope", input_path),
                    "input reference is missing 'scope'",
                ));
            }
        }
    }
}

fn validate_iteration_step(
    step: &serde_json::Map<String, Value>,
    path: &str,
    seen_ids: &mut HashSet<String>,
    errors: &mut Vec<ValidationError>,
) {
    match step.get("iterate_over").and_then(Value::as_object) {
        Some(iterate_over) => {
            for field in ["doc_type", "collection_field", "entity_type"] {
                if iterate_over.get(field).and_then(Value::as_str).is_none() {
                    errors.push(ValidationError::new(
                        ValidationCode::MissingRequiredField,
                        format!("{}.iterate_over.{}", path, field),
                        format!("'iterate_over' is missing '{}'", field),
                    ));
                }
            }
        }
        None => errors.push(ValidationError::new(
            ValidationCode::SchemaInvalid,
            format!("{}.iterate_over", path),
            "'iterate_over' must be an object",
        )),
    }

    match step.get("steps").and_then(Value::as_array) {
        Some(nested) if !nested.is_empty() => {
            for (index, nested_step) in nested.iter().enumerate() {
                validate_step(
                    nested_step,
                    &format!("{}.steps[{}]", path, index),
                    seen_ids,
                    errors,
                );
            }
        }
        Some(_) => errors.push(ValidationError::new(
            ValidationCode::SchemaInvalid,
            format!("{}.steps", path),
            "iteration step must contain a non-empty nested step list",
        )),
        None => errors.push(ValidationError::new(
            ValidationCode::MissingRequiredField,
            format!("{}.steps", path),
            "iteration step is missing nested 'steps'",
        )),
    }
}

fn is_string_array(value: &Value) -> bool {
    value
        .as_array()
        .is_some_and(|items| items.iter().all(Value::is_string))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn minimal_definition() -> Value {
        json!({
            "schema_version": "1.0",
            "workflow_id": "planning-v1",
            "revision": 1,
            "effective_date": "2025-03-01",
            "name": "Planning",
            "description": "",
            "scopes": { "project": { "parent": null } },
            "document_types": {
                "project_brief": { "name": "project_brief", "scope": "project" }
            },
            "entity_types": {},
            "steps": [{
                "step_id": "write_brief",
                "scope": "project",
                "role": "planner",
                "task_prompt": "Project Brief v1.0",
                "produces": "project_brief",
                "inputs": []
            }]
        })
    }

    #[test]
    fn test_minimal_definition_passes() {
        assert!(validate_structure(&minimal_definition()).is_empty());
    }

    #[test]
    fn test_not_an_object() {
        let errors = validate_structure(&json!([]));
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].code, ValidationCode::SchemaInvalid);
    }

    #[test]
    fn test_missing_top_level_field() {
        let mut raw = minimal_definition();
        raw.as_object_mut().unwrap().remove("workflow_id");
        let errors = validate_structure(&raw);
        assert!(errors
            .iter()
            .any(|e| e.code == ValidationCode::MissingRequiredField && e.path == "workflow_id"));
    }

    #[test]
    fn test_wrong_revision_type() {
        let mut raw = minimal_definition();
        raw["revision"] = json!("one");
        let errors = validate_structure(&raw);
        assert!(errors.iter().any(|e| e.path == "revision"));
    }

    #[test]
    fn test_duplicate_step_ids_recursive() {
        let mut raw = minimal_definition();
        raw["document_types"]["project_brief"]["may_own"] = json!(["epic"]);
        raw["entity_types"] = json!({
            "epic": { "name": "epic", "parent_doc_type": "project_brief", "creates_scope": "epic" }
        });
        raw["steps"].as_array_mut().unwrap().push(json!({
            "step_id": "per_epic",
            "scope": "project",
            "iterate_over": {
                "doc_type": "project_brief",
                "collection_field": "epics",
                "entity_type": "epic"
            },
            "steps": [{
                "step_id": "write_brief",
                "scope": "epic",
                "role": "planner",
                "task_prompt": "Plan v1.0",
                "produces": "project_brief"
            }]
        }));
        let errors = validate_structure(&raw);
        assert!(errors
            .iter()
            .any(|e| e.message.contains("duplicate step id")));
    }

    #[test]
    fn test_step_mixing_shapes() {
        let mut raw = minimal_definition();
        raw["steps"][0]["iterate_over"] = json!({
            "doc_type": "project_brief",
            "collection_field": "epics",
            "entity_type": "epic"
        });
        let errors = validate_structure(&raw);
        assert!(errors
            .iter()
            .any(|e| e.message.contains("mixes iteration and production")));
    }

    #[test]
    fn test_iteration_requires_nonempty_nested_steps() {
        let mut raw = minimal_definition();
        raw["steps"] = json!([{
            "step_id": "per_epic",
            "scope": "project",
            "iterate_over": {
                "doc_type": "project_brief",
                "collection_field": "epics",
                "entity_type": "epic"
            },
            "steps": []
        }]);
        let errors = validate_structure(&raw);
        assert!(errors
            .iter()
            .any(|e| e.message.contains("non-empty nested step list")));
    }

    #[test]
    fn test_accepted_by_without_acceptance_required() {
        let mut raw = minimal_definition();
        raw["document_types"]["project_brief"]["accepted_by"] = json!(["product_lead"]);
        let errors = validate_structure(&raw);
        assert!(errors
            .iter()
            .any(|e| e.message.contains("acceptance_required")));
    }

    #[test]
    fn test_input_missing_scope() {
        let mut raw = minimal_definition();
        raw["steps"][0]["inputs"] = json!([{ "doc_type": "project_brief" }]);
        let errors = validate_structure(&raw);
        assert!(errors
            .iter()
            .any(|e| e.code == ValidationCode::MissingRequiredField
                && e.path.contains("inputs[0].scope")));
    }
}
