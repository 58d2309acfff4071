//! Multi-pass static validation of workflow definitions
//!
//! Passes run in a fixed order. Passes 1 (structure) and 2 (scope
//! hierarchy) are fail-fast because nothing downstream is meaningful
//! without them; passes 3 through 11 accumulate every finding so a
//! definition author sees the full picture in one round.

use crate::schema::validate_structure;
use crate::validation::{ValidationCode, ValidationError, ValidationResult};
use docloom_types::{
    classify_reference, ReferenceClass, ScopeHierarchy, Workflow, WorkflowStep,
};
use regex::Regex;
use serde_json::Value;
use std::collections::HashSet;

/// Task prompts are named `Label v<major>.<minor>`.
const PROMPT_NAME_PATTERN: &str = r"^.+ v\d+\.\d+$";

/// Static validator for workflow definitions.
///
/// Stateless between calls; the prompt-name regex is compiled once at
/// construction. An optional prompt manifest turns pass 11's manifest
/// check on: absent prompts are warnings by default and errors when
/// `require_manifest` is set.
pub struct WorkflowValidator {
    prompt_pattern: Regex,
    manifest: Option<HashSet<String>>,
    require_manifest: bool,
}

impl Default for WorkflowValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkflowValidator {
    pub fn new() -> Self {
        Self {
            // The pattern is a checked constant.
            prompt_pattern: Regex::new(PROMPT_NAME_PATTERN).expect("valid prompt name pattern"),
            manifest: None,
            require_manifest: false,
        }
    }

    /// Provide the set of known prompt names. Prompts may be authored
    /// after the workflow, so absence is a warning unless
    /// [`require_manifest`](Self::require_manifest) is also set.
    pub fn with_manifest(mut self, prompts: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.manifest = Some(prompts.into_iter().map(Into::into).collect());
        self
    }

    /// Promote manifest misses from warnings to errors
    pub fn require_manifest(mut self) -> Self {
        self.require_manifest = true;
        self
    }

    /// Validate a raw definition. Returns the findings only; use
    /// [`validate_parsed`](Self::validate_parsed) to also obtain the
    /// parsed workflow.
    pub fn validate(&self, raw: &Value) -> ValidationResult {
        self.validate_parsed(raw).1
    }

    /// Validate and, when the definition at least parses, return the
    /// typed workflow alongside the findings.
    pub fn validate_parsed(&self, raw: &Value) -> (Option<Workflow>, ValidationResult) {
        // Pass 1: structure, fail-fast
        let structural = validate_structure(raw);
        if !structural.is_empty() {
            return (None, ValidationResult::from_errors(structural));
        }

        let workflow: Workflow = match serde_json::from_value(raw.clone()) {
            Ok(workflow) => workflow,
            Err(err) => {
                return (
                    None,
                    ValidationResult::from_errors(vec![ValidationError::new(
                        ValidationCode::SchemaInvalid,
                        "$",
                        format!("definition does not parse: {}", err),
                    )]),
                );
            }
        };

        // Pass 2: scope hierarchy, fail-fast
        let hierarchy = match workflow.scope_hierarchy() {
            Ok(hierarchy) => hierarchy,
            Err(err) => {
                return (
                    Some(workflow),
                    ValidationResult::from_errors(vec![ValidationError::new(
                        ValidationCode::InvalidScopeHierarchy,
                        "scopes",
                        err.to_string(),
                    )]),
                );
            }
        };

        let mut result = ValidationResult::ok();
        self.check_scope_references(&workflow, &mut result);
        self.check_produces_references(&workflow, &mut result);
        self.check_may_own_references(&workflow, &mut result);
        self.check_ownership_dag(&workflow, &mut result);
        self.check_scope_consistency(&workflow, &hierarchy, &mut result);
        self.check_iteration_sources(&workflow, &mut result);
        self.check_input_references(&workflow, &mut result);
        self.check_reference_legality(&workflow, &hierarchy, &mut result);
        self.check_prompt_names(&workflow, &mut result);

        (Some(workflow), result)
    }

    // ── Pass 3: scope references ─────────────────────────────────────

    fn check_scope_references(&self, workflow: &Workflow, result: &mut ValidationResult) {
        for (name, config) in &workflow.document_types {
            if !workflow.scopes.contains_key(&config.scope) {
                result.push_error(ValidationError::new(
                    ValidationCode::UnknownScope,
                    format!("document_types.{}.scope", name),
                    format!(
                        "document type '{}' lives at undeclared scope '{}'",
                        name, config.scope
                    ),
                ));
            }
        }
        for (name, config) in &workflow.entity_types {
            if !workflow.scopes.contains_key(&config.creates_scope) {
                result.push_error(ValidationError::new(
                    ValidationCode::UnknownScope,
                    format!("entity_types.{}.creates_scope", name),
                    format!(
                        "entity type '{}' creates undeclared scope '{}'",
                        name, config.creates_scope
                    ),
                ));
            }
            if !workflow.document_types.contains_key(&config.parent_doc_type) {
                result.push_error(ValidationError::new(
                    ValidationCode::UnknownDocumentType,
                    format!("entity_types.{}.parent_doc_type", name),
                    format!(
                        "entity type '{}' belongs to undeclared document type '{}'",
                        name, config.parent_doc_type
                    ),
                ));
            }
        }
    }

    // ── Pass 4: produces references ──────────────────────────────────

    fn check_produces_references(&self, workflow: &Workflow, result: &mut ValidationResult) {
        visit_steps(&workflow.steps, "steps", &mut |step, path| {
            if let Some(produces) = step.produces() {
                if !workflow.document_types.contains_key(produces) {
                    result.push_error(ValidationError::new(
                        ValidationCode::UnknownDocumentType,
                        format!("{}.produces", path),
                        format!(
                            "step '{}' produces undeclared document type '{}'",
                            step.step_id, produces
                        ),
                    ));
                }
            }
        });
    }

    // ── Pass 5: may_own references ───────────────────────────────────

    fn check_may_own_references(&self, workflow: &Workflow, result: &mut ValidationResult) {
        for (name, config) in &workflow.document_types {
            for (index, entity_type) in config.may_own.iter().enumerate() {
                if !workflow.entity_types.contains_key(entity_type) {
                    result.push_error(ValidationError::new(
                        ValidationCode::UnknownEntityType,
                        format!("document_types.{}.may_own[{}]", name, index),
                        format!(
                            "document type '{}' may own undeclared entity type '{}'",
                            name, entity_type
                        ),
                    ));
                }
            }
        }
    }

    // ── Pass 6: ownership DAG ────────────────────────────────────────

    /// Reserved for cross-document ownership-cycle detection. Scope
    /// hierarchy acyclicity already rules out structural cycles in the
    /// current model, so this pass emits nothing.
    fn check_ownership_dag(&self, _workflow: &Workflow, _result: &mut ValidationResult) {}

    // ── Pass 7: scope consistency ────────────────────────────────────

    fn check_scope_consistency(
        &self,
        workflow: &Workflow,
        hierarchy: &ScopeHierarchy,
        result: &mut ValidationResult,
    ) {
        visit_steps(&workflow.steps, "steps", &mut |step, path| {
            if !hierarchy.contains(&step.scope) {
                result.push_error(ValidationError::new(
                    ValidationCode::UnknownScope,
                    format!("{}.scope", path),
                    format!(
                        "step '{}' runs at undeclared scope '{}'",
                        step.step_id, step.scope
                    ),
                ));
            }
            let Some(produces) = step.produces() else {
                return;
            };
            // Unknown produces is pass 4's finding; nothing to compare here.
            let Some(doc_type) = workflow.get_document_type(produces) else {
                return;
            };
            if doc_type.scope != step.scope {
                result.push_error(ValidationError::new(
                    ValidationCode::ScopeMismatch,
                    format!("{}.scope", path),
                    format!(
                        "step '{}' runs at scope '{}' but '{}' lives at scope '{}'",
                        step.step_id, step.scope, produces, doc_type.scope
                    ),
                ));
            }
        });
    }

    // ── Pass 8: iteration source integrity ───────────────────────────

    fn check_iteration_sources(&self, workflow: &Workflow, result: &mut ValidationResult) {
        visit_steps(&workflow.steps, "steps", &mut |step, path| {
            let docloom_types::StepKind::Iteration { iterate_over, .. } = &step.kind else {
                return;
            };
            let iter_path = format!("{}.iterate_over", path);

            if !workflow.entity_types.contains_key(&iterate_over.entity_type) {
                result.push_error(ValidationError::new(
                    ValidationCode::UnknownEntityType,
                    format!("{}.entity_type", iter_path),
                    format!(
                        "step '{}' iterates undeclared entity type '{}'",
                        step.step_id, iterate_over.entity_type
                    ),
                ));
            }

            let Some(source) = workflow.get_document_type(&iterate_over.doc_type) else {
                result.push_error(ValidationError::new(
                    ValidationCode::MissingIterationSource,
                    format!("{}.doc_type", iter_path),
                    format!(
                        "step '{}' iterates over undeclared document type '{}'",
                        step.step_id, iterate_over.doc_type
                    ),
                ));
                return;
            };

            if source.collection_field.as_deref() != Some(iterate_over.collection_field.as_str()) {
                result.push_error(ValidationError::new(
                    ValidationCode::MissingIterationSource,
                    format!("{}.collection_field", iter_path),
                    format!(
                        "document type '{}' does not declare collection field '{}'",
                        iterate_over.doc_type, iterate_over.collection_field
                    ),
                ));
            }
            if !source.may_own.contains(&iterate_over.entity_type) {
                result.push_error(ValidationError::new(
                    ValidationCode::MissingIterationSource,
                    format!("{}.entity_type", iter_path),
                    format!(
                        "document type '{}' does not own entity type '{}'",
                        iterate_over.doc_type, iterate_over.entity_type
                    ),
                ));
            }
        });
    }

    // ── Pass 9: input reference resolvability ────────────────────────

    fn check_input_references(&self, workflow: &Workflow, result: &mut ValidationResult) {
        visit_steps(&workflow.steps, "steps", &mut |step, path| {
            for (index, input) in step.inputs().iter().enumerate() {
                let input_path = format!("{}.inputs[{}]", path, index);

                match (&input.doc_type, &input.entity_type) {
                    (Some(_), Some(_)) => result.push_error(ValidationError::new(
                        ValidationCode::InvalidReference,
                        input_path.clone(),
                        "input declares both doc_type and entity_type; it must be exactly one",
                    )),
                    (None, None) => result.push_error(ValidationError::new(
                        ValidationCode::InvalidReference,
                        input_path.clone(),
                        "input declares neither doc_type nor entity_type",
                    )),
                    _ => {}
                }

                if !workflow.scopes.contains_key(&input.scope) {
                    result.push_error(ValidationError::new(
                        ValidationCode::UnknownScope,
                        format!("{}.scope", input_path),
                        format!("input references undeclared scope '{}'", input.scope),
                    ));
                }
                if let Some(doc_type) = &input.doc_type {
                    if !workflow.document_types.contains_key(doc_type) {
                        result.push_error(ValidationError::new(
                            ValidationCode::UnknownDocumentType,
                            format!("{}.doc_type", input_path),
                            format!("input references undeclared document type '{}'", doc_type),
                        ));
                    }
                }
                if let Some(entity_type) = &input.entity_type {
                    if !workflow.entity_types.contains_key(entity_type) {
                        result.push_error(ValidationError::new(
                            ValidationCode::UnknownEntityType,
                            format!("{}.entity_type", input_path),
                            format!("input references undeclared entity type '{}'", entity_type),
                        ));
                    }
                }
            }
        });
    }

    // ── Pass 10: cross-scope reference legality ──────────────────────

    fn check_reference_legality(
        &self,
        workflow: &Workflow,
        hierarchy: &ScopeHierarchy,
        result: &mut ValidationResult,
    ) {
        visit_steps(&workflow.steps, "steps", &mut |step, path| {
            // Undeclared scopes are pass 9's finding.
            if !hierarchy.contains(&step.scope) {
                return;
            }
            for (index, input) in step.inputs().iter().enumerate() {
                if !hierarchy.contains(&input.scope) {
                    continue;
                }
                let class =
                    classify_reference(hierarchy, &input.scope, &step.scope, input.context);
                let code = match class {
                    ReferenceClass::Sibling => ValidationCode::ForbiddenSiblingReference,
                    ReferenceClass::Descendant => ValidationCode::ForbiddenDescendantReference,
                    ReferenceClass::CrossBranch => ValidationCode::ForbiddenCrossBranchReference,
                    _ => continue,
                };
                result.push_error(ValidationError::new(
                    code,
                    format!("{}.inputs[{}].scope", path, index),
                    format!(
                        "step '{}' at scope '{}' references scope '{}': {}",
                        step.step_id,
                        step.scope,
                        input.scope,
                        class.describe()
                    ),
                ));
            }
        });
    }

    // ── Pass 11: prompt naming ───────────────────────────────────────

    fn check_prompt_names(&self, workflow: &Workflow, result: &mut ValidationResult) {
        visit_steps(&workflow.steps, "steps", &mut |step, path| {
            let docloom_types::StepKind::Production { task_prompt, .. } = &step.kind else {
                return;
            };
            let prompt_path = format!("{}.task_prompt", path);

            if !self.prompt_pattern.is_match(task_prompt) {
                result.push_error(ValidationError::new(
                    ValidationCode::InvalidPromptFormat,
                    prompt_path,
                    format!(
                        "task prompt '{}' does not match 'Name v<major>.<minor>'",
                        task_prompt
                    ),
                ));
                return;
            }

            if let Some(manifest) = &self.manifest {
                if !manifest.contains(task_prompt.as_str()) {
                    let finding = ValidationError::new(
                        ValidationCode::PromptNotInManifest,
                        prompt_path,
                        format!("task prompt '{}' is not in the prompt manifest", task_prompt),
                    );
                    if self.require_manifest {
                        result.push_error(finding);
                    } else {
                        result.push_warning(finding);
                    }
                }
            }
        });
    }
}

/// Depth-first walk over the step tree, handing each step its JSON path
fn visit_steps(
    steps: &[WorkflowStep],
    prefix: &str,
    visit: &mut impl FnMut(&WorkflowStep, &str),
) {
    fn walk(steps: &[WorkflowStep], prefix: &str, visit: &mut impl FnMut(&WorkflowStep, &str)) {
        for (index, step) in steps.iter().enumerate() {
            let path = format!("{}[{}]", prefix, index);
            visit(step, &path);
            walk(step.nested_steps(), &format!("{}.steps", path), visit);
        }
    }
    walk(steps, prefix, visit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn valid_definition() -> Value {
        json!({
            "schema_version": "1.0",
            "workflow_id": "planning-v1",
            "revision": 2,
            "effective_date": "2025-03-01",
            "name": "Planning Pipeline",
            "description": "Produces briefs and epic plans",
            "scopes": {
                "project": { "parent": null },
                "epic": { "parent": "project" }
            },
            "document_types": {
                "project_brief": {
                    "name": "project_brief",
                    "scope": "project",
                    "may_own": ["epic"],
                    "collection_field": "epics",
                    "acceptance_required": true,
                    "accepted_by": ["product_lead"]
                },
                "epic_plan": { "name": "epic_plan", "scope": "epic" }
            },
            "entity_types": {
                "epic": {
                    "name": "epic",
                    "parent_doc_type": "project_brief",
                    "creates_scope": "epic"
                }
            },
            "steps": [
                {
                    "step_id": "write_brief",
                    "scope": "project",
                    "role": "planner",
                    "task_prompt": "Project Brief v1.0",
                    "produces": "project_brief",
                    "inputs": []
                },
                {
                    "step_id": "per_epic",
                    "scope": "project",
                    "iterate_over": {
                        "doc_type": "project_brief",
                        "collection_field": "epics",
                        "entity_type": "epic"
                    },
                    "steps": [{
                        "step_id": "write_epic_plan",
                        "scope": "epic",
                        "role": "planner",
                        "task_prompt": "Epic Plan v2.1",
                        "produces": "epic_plan",
                        "inputs": [
                            { "scope": "project", "doc_type": "project_brief" },
                            { "scope": "epic", "entity_type": "epic", "context": true }
                        ]
                    }]
                }
            ]
        })
    }

    #[test]
    fn test_valid_definition_passes() {
        let (workflow, result) = WorkflowValidator::new().validate_parsed(&valid_definition());
        assert!(result.is_valid(), "unexpected findings: {}", result);
        let workflow = workflow.unwrap();
        assert_eq!(workflow.workflow_id, "planning-v1");
        assert_eq!(workflow.revision, 2);
    }

    #[test]
    fn test_structural_failure_is_fail_fast() {
        let mut raw = valid_definition();
        raw.as_object_mut().unwrap().remove("scopes");
        // also plant a downstream problem that must not be reported
        raw["steps"][0]["task_prompt"] = json!("no version here");

        let result = WorkflowValidator::new().validate(&raw);
        assert!(!result.is_valid());
        assert!(result.has_code(ValidationCode::MissingRequiredField));
        assert!(!result.has_code(ValidationCode::InvalidPromptFormat));
    }

    #[test]
    fn test_hierarchy_failure_is_fail_fast() {
        let mut raw = valid_definition();
        raw["scopes"]["epic"]["parent"] = json!("portfolio");
        raw["steps"][0]["task_prompt"] = json!("no version here");

        let result = WorkflowValidator::new().validate(&raw);
        assert_eq!(result.codes(), vec![ValidationCode::InvalidScopeHierarchy]);
    }

    #[test]
    fn test_later_passes_accumulate() {
        let mut raw = valid_definition();
        raw["document_types"]["epic_plan"]["scope"] = json!("sprint");
        raw["steps"][0]["task_prompt"] = json!("no version here");

        let result = WorkflowValidator::new().validate(&raw);
        assert!(result.has_code(ValidationCode::UnknownScope));
        assert!(result.has_code(ValidationCode::InvalidPromptFormat));
        // epic_plan now lives at 'sprint' while its step runs at 'epic'
        assert!(result.has_code(ValidationCode::ScopeMismatch));
    }

    #[test]
    fn test_unknown_produces() {
        let mut raw = valid_definition();
        raw["steps"][1]["steps"][0]["produces"] = json!("sprint_plan");
        let result = WorkflowValidator::new().validate(&raw);
        assert!(result.has_code(ValidationCode::UnknownDocumentType));
        assert!(result
            .errors
            .iter()
            .any(|e| e.path == "steps[1].steps[0].produces"));
        // unknown produces must not also report a scope mismatch
        assert!(!result.has_code(ValidationCode::ScopeMismatch));
    }

    #[test]
    fn test_unknown_may_own_entity() {
        let mut raw = valid_definition();
        raw["document_types"]["project_brief"]["may_own"] = json!(["epic", "story"]);
        let result = WorkflowValidator::new().validate(&raw);
        assert!(result.has_code(ValidationCode::UnknownEntityType));
        assert!(result
            .errors
            .iter()
            .any(|e| e.path == "document_types.project_brief.may_own[1]"));
    }

    #[test]
    fn test_iteration_source_collection_field_mismatch() {
        let mut raw = valid_definition();
        raw["steps"][1]["iterate_over"]["collection_field"] = json!("workstreams");
        let result = WorkflowValidator::new().validate(&raw);
        assert!(result.has_code(ValidationCode::MissingIterationSource));
    }

    #[test]
    fn test_iteration_entity_not_owned() {
        let mut raw = valid_definition();
        raw["document_types"]["project_brief"]["may_own"] = json!([]);
        let result = WorkflowValidator::new().validate(&raw);
        assert!(result.has_code(ValidationCode::MissingIterationSource));
    }

    #[test]
    fn test_input_declaring_both_kinds() {
        let mut raw = valid_definition();
        raw["steps"][1]["steps"][0]["inputs"][0] = json!({
            "scope": "project",
            "doc_type": "project_brief",
            "entity_type": "epic"
        });
        let result = WorkflowValidator::new().validate(&raw);
        assert!(result.has_code(ValidationCode::InvalidReference));
    }

    #[test]
    fn test_sibling_reference_forbidden() {
        let mut raw = valid_definition();
        // same-scope non-root reference without context
        raw["steps"][1]["steps"][0]["inputs"][1] = json!({
            "scope": "epic",
            "doc_type": "epic_plan"
        });
        let result = WorkflowValidator::new().validate(&raw);
        assert!(result.has_code(ValidationCode::ForbiddenSiblingReference));
    }

    #[test]
    fn test_descendant_reference_forbidden() {
        let mut raw = valid_definition();
        raw["steps"][0]["inputs"] = json!([{ "scope": "epic", "doc_type": "epic_plan" }]);
        let result = WorkflowValidator::new().validate(&raw);
        assert!(result.has_code(ValidationCode::ForbiddenDescendantReference));
    }

    #[test]
    fn test_cross_branch_reference_forbidden() {
        let mut raw = valid_definition();
        raw["scopes"]["chapter"] = json!({ "parent": "project" });
        raw["document_types"]["chapter_notes"] =
            json!({ "name": "chapter_notes", "scope": "chapter" });
        raw["steps"][1]["steps"][0]["inputs"][0] =
            json!({ "scope": "chapter", "doc_type": "chapter_notes" });
        let result = WorkflowValidator::new().validate(&raw);
        assert!(result.has_code(ValidationCode::ForbiddenCrossBranchReference));
    }

    #[test]
    fn test_same_root_scope_reference_permitted() {
        let mut raw = valid_definition();
        raw["steps"].as_array_mut().unwrap().push(json!({
            "step_id": "summarize_brief",
            "scope": "project",
            "role": "planner",
            "task_prompt": "Brief Summary v1.0",
            "produces": "project_brief",
            "inputs": [{ "scope": "project", "doc_type": "project_brief" }]
        }));
        let result = WorkflowValidator::new().validate(&raw);
        assert!(result.is_valid(), "unexpected findings: {}", result);
    }

    #[test]
    fn test_prompt_format() {
        let mut raw = valid_definition();
        raw["steps"][0]["task_prompt"] = json!("Project Brief");
        let result = WorkflowValidator::new().validate(&raw);
        assert!(result.has_code(ValidationCode::InvalidPromptFormat));
    }

    #[test]
    fn test_manifest_miss_is_warning_by_default() {
        let validator = WorkflowValidator::new().with_manifest(["Project Brief v1.0"]);
        let result = validator.validate(&valid_definition());
        assert!(result.is_valid());
        assert_eq!(result.warnings.len(), 1);
        assert_eq!(result.warnings[0].code, ValidationCode::PromptNotInManifest);
    }

    #[test]
    fn test_manifest_miss_promoted_to_error() {
        let validator = WorkflowValidator::new()
            .with_manifest(["Project Brief v1.0"])
            .require_manifest();
        let result = validator.validate(&valid_definition());
        assert!(result.has_code(ValidationCode::PromptNotInManifest));
    }

    #[test]
    fn test_full_manifest_passes_clean() {
        let validator =
            WorkflowValidator::new().with_manifest(["Project Brief v1.0", "Epic Plan v2.1"]);
        let result = validator.validate(&valid_definition());
        assert!(result.is_valid());
        assert!(result.warnings.is_empty());
    }
}
