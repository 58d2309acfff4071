//! Workflow model: the validated blueprint for a document pipeline
//!
//! A `Workflow` declares scopes, document types, entity types, and an
//! ordered tree of steps. It is immutable once loaded; lookups recurse
//! the step tree. Structural validity is the loader's job — this
//! module only models the shape.

use crate::{ScopeHierarchy, WorkflowResult};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

fn default_true() -> bool {
    true
}

// ── Configuration types ──────────────────────────────────────────────

/// A declared scope level and its optional parent
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
}

impl ScopeConfig {
    pub fn root() -> Self {
        Self { parent: None }
    }

    pub fn child_of(parent: impl Into<String>) -> Self {
        Self {
            parent: Some(parent.into()),
        }
    }
}

/// Configuration of a document type a workflow can produce
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentTypeConfig {
    pub name: String,
    /// The scope level at which instances of this type live
    pub scope: String,
    /// Entity types this document type may contain
    #[serde(default)]
    pub may_own: Vec<String>,
    /// The array field iterated when this type is an iteration source
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection_field: Option<String>,
    /// Whether a human must accept the document before the workflow proceeds
    #[serde(default)]
    pub acceptance_required: bool,
    /// Roles allowed to accept; empty means any role may accept
    #[serde(default)]
    pub accepted_by: Vec<String>,
}

impl DocumentTypeConfig {
    pub fn new(name: impl Into<String>, scope: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            scope: scope.into(),
            may_own: Vec::new(),
            collection_field: None,
            acceptance_required: false,
            accepted_by: Vec::new(),
        }
    }

    pub fn with_may_own(mut self, entity_types: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.may_own = entity_types.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_collection_field(mut self, field: impl Into<String>) -> Self {
        self.collection_field = Some(field.into());
        self
    }

    pub fn with_acceptance_required(mut self) -> Self {
        self.acceptance_required = true;
        self
    }

    pub fn with_accepted_by(mut self, roles: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.accepted_by = roles.into_iter().map(Into::into).collect();
        self.acceptance_required = true;
        self
    }
}

/// Configuration of an entity type materialized during iteration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityTypeConfig {
    pub name: String,
    /// The document type that defines/contains instances of this entity
    pub parent_doc_type: String,
    /// The scope level one instance of this entity establishes
    pub creates_scope: String,
}

impl EntityTypeConfig {
    pub fn new(
        name: impl Into<String>,
        parent_doc_type: impl Into<String>,
        creates_scope: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            parent_doc_type: parent_doc_type.into(),
            creates_scope: creates_scope.into(),
        }
    }
}

// ── Step inputs ──────────────────────────────────────────────────────

/// A declared input of a production step
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputReference {
    /// The scope to read from
    pub scope: String,
    /// Document type to fetch (exclusive with `entity_type`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc_type: Option<String>,
    /// Entity type to fetch (exclusive with `doc_type`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,
    /// Whether resolution failure fails the step
    #[serde(default = "default_true")]
    pub required: bool,
    /// Read the currently active iteration entity, not a lookup by name
    #[serde(default)]
    pub context: bool,
}

impl InputReference {
    pub fn document(scope: impl Into<String>, doc_type: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            doc_type: Some(doc_type.into()),
            entity_type: None,
            required: true,
            context: false,
        }
    }

    pub fn entity(scope: impl Into<String>, entity_type: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            doc_type: None,
            entity_type: Some(entity_type.into()),
            required: true,
            context: false,
        }
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn contextual(mut self) -> Self {
        self.context = true;
        self
    }

    /// The name this input resolves under: the doc type or entity type
    pub fn key(&self) -> Option<&str> {
        self.doc_type.as_deref().or(self.entity_type.as_deref())
    }
}

/// What an iteration step fans out over
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IterationConfig {
    /// The source document type
    pub doc_type: String,
    /// The array field on that document
    pub collection_field: String,
    /// The entity type instantiated per array item
    pub entity_type: String,
}

impl IterationConfig {
    pub fn new(
        doc_type: impl Into<String>,
        collection_field: impl Into<String>,
        entity_type: impl Into<String>,
    ) -> Self {
        Self {
            doc_type: doc_type.into(),
            collection_field: collection_field.into(),
            entity_type: entity_type.into(),
        }
    }
}

// ── Workflow steps ───────────────────────────────────────────────────

/// A step in the workflow tree — exactly one of production or iteration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStep {
    /// Unique within the workflow, recursively
    pub step_id: String,
    /// The scope this step executes at
    pub scope: String,
    #[serde(flatten)]
    pub kind: StepKind,
}

/// The two step shapes
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StepKind {
    /// Fan out nested steps once per item of a source collection
    Iteration {
        iterate_over: IterationConfig,
        steps: Vec<WorkflowStep>,
    },
    /// Invoke generation to produce one document
    Production {
        role: String,
        task_prompt: String,
        produces: String,
        #[serde(default)]
        inputs: Vec<InputReference>,
    },
}

impl WorkflowStep {
    pub fn production(
        step_id: impl Into<String>,
        scope: impl Into<String>,
        role: impl Into<String>,
        task_prompt: impl Into<String>,
        produces: impl Into<String>,
    ) -> Self {
        Self {
            step_id: step_id.into(),
            scope: scope.into(),
            kind: StepKind::Production {
                role: role.into(),
                task_prompt: task_prompt.into(),
                produces: produces.into(),
                inputs: Vec::new(),
            },
        }
    }

    pub fn iteration(
        step_id: impl Into<String>,
        scope: impl Into<String>,
        iterate_over: IterationConfig,
        steps: Vec<WorkflowStep>,
    ) -> Self {
        Self {
            step_id: step_id.into(),
            scope: scope.into(),
            kind: StepKind::Iteration {
                iterate_over,
                steps,
            },
        }
    }

    pub fn with_input(mut self, input: InputReference) -> Self {
        if let StepKind::Production { inputs, .. } = &mut self.kind {
            inputs.push(input);
        }
        self
    }

    pub fn is_production(&self) -> bool {
        matches!(self.kind, StepKind::Production { .. })
    }

    pub fn is_iteration(&self) -> bool {
        matches!(self.kind, StepKind::Iteration { .. })
    }

    /// The document type this step produces, if it is a production step
    pub fn produces(&self) -> Option<&str> {
        match &self.kind {
            StepKind::Production { produces, .. } => Some(produces),
            StepKind::Iteration { .. } => None,
        }
    }

    /// Declared inputs; empty for iteration steps
    pub fn inputs(&self) -> &[InputReference] {
        match &self.kind {
            StepKind::Production { inputs, .. } => inputs,
            StepKind::Iteration { .. } => &[],
        }
    }

    /// Nested steps; empty for production steps
    pub fn nested_steps(&self) -> &[WorkflowStep] {
        match &self.kind {
            StepKind::Iteration { steps, .. } => steps,
            StepKind::Production { .. } => &[],
        }
    }
}

// ── Workflow aggregate ───────────────────────────────────────────────

/// A validated workflow definition — the aggregate root
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub workflow_id: String,
    pub revision: u32,
    pub effective_date: NaiveDate,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub scopes: HashMap<String, ScopeConfig>,
    pub document_types: HashMap<String, DocumentTypeConfig>,
    pub entity_types: HashMap<String, EntityTypeConfig>,
    /// Ordered top-level steps
    pub steps: Vec<WorkflowStep>,
}

impl Workflow {
    pub fn new(workflow_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            revision: 1,
            effective_date: chrono::Utc::now().date_naive(),
            name: name.into(),
            description: String::new(),
            scopes: HashMap::new(),
            document_types: HashMap::new(),
            entity_types: HashMap::new(),
            steps: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_scope(mut self, name: impl Into<String>, config: ScopeConfig) -> Self {
        self.scopes.insert(name.into(), config);
        self
    }

    pub fn with_document_type(mut self, config: DocumentTypeConfig) -> Self {
        self.document_types.insert(config.name.clone(), config);
        self
    }

    pub fn with_entity_type(mut self, config: EntityTypeConfig) -> Self {
        self.entity_types.insert(config.name.clone(), config);
        self
    }

    pub fn with_step(mut self, step: WorkflowStep) -> Self {
        self.steps.push(step);
        self
    }

    /// Build the scope hierarchy from the declared scopes.
    ///
    /// On a workflow that passed validation this cannot fail; the
    /// `Result` covers hand-built workflows.
    pub fn scope_hierarchy(&self) -> WorkflowResult<ScopeHierarchy> {
        let parents = self
            .scopes
            .iter()
            .map(|(name, config)| (name.clone(), config.parent.clone()))
            .collect();
        ScopeHierarchy::build(parents)
    }

    pub fn get_document_type(&self, name: &str) -> Option<&DocumentTypeConfig> {
        self.document_types.get(name)
    }

    pub fn get_entity_type(&self, name: &str) -> Option<&EntityTypeConfig> {
        self.entity_types.get(name)
    }

    /// Find a step by id anywhere in the step tree
    pub fn get_step(&self, step_id: &str) -> Option<&WorkflowStep> {
        fn find<'a>(steps: &'a [WorkflowStep], step_id: &str) -> Option<&'a WorkflowStep> {
            for step in steps {
                if step.step_id == step_id {
                    return Some(step);
                }
                if let Some(found) = find(step.nested_steps(), step_id) {
                    return Some(found);
                }
            }
            None
        }
        find(&self.steps, step_id)
    }

    /// All production steps, in tree order
    pub fn get_production_steps(&self) -> Vec<&WorkflowStep> {
        fn collect<'a>(steps: &'a [WorkflowStep], out: &mut Vec<&'a WorkflowStep>) {
            for step in steps {
                if step.is_production() {
                    out.push(step);
                }
                collect(step.nested_steps(), out);
            }
        }
        let mut out = Vec::new();
        collect(&self.steps, &mut out);
        out
    }

    /// All step ids, in tree order
    pub fn step_ids(&self) -> Vec<&str> {
        fn collect<'a>(steps: &'a [WorkflowStep], out: &mut Vec<&'a str>) {
            for step in steps {
                out.push(step.step_id.as_str());
                collect(step.nested_steps(), out);
            }
        }
        let mut out = Vec::new();
        collect(&self.steps, &mut out);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_workflow() -> Workflow {
        Workflow::new("planning-v1", "Planning Pipeline")
            .with_scope("project", ScopeConfig::root())
            .with_scope("epic", ScopeConfig::child_of("project"))
            .with_document_type(
                DocumentTypeConfig::new("project_brief", "project").with_may_own(["epic"]),
            )
            .with_document_type(DocumentTypeConfig::new("epic_plan", "epic"))
            .with_entity_type(EntityTypeConfig::new("epic", "project_brief", "epic"))
            .with_step(WorkflowStep::production(
                "write_brief",
                "project",
                "planner",
                "Project Brief v1.0",
                "project_brief",
            ))
            .with_step(WorkflowStep::iteration(
                "per_epic",
                "project",
                IterationConfig::new("project_brief", "epics", "epic"),
                vec![WorkflowStep::production(
                    "write_epic_plan",
                    "epic",
                    "planner",
                    "Epic Plan v1.0",
                    "epic_plan",
                )
                .with_input(InputReference::document("project", "project_brief"))
                .with_input(InputReference::entity("epic", "epic").contextual())],
            ))
    }

    #[test]
    fn test_recursive_step_lookup() {
        let wf = make_workflow();
        assert!(wf.get_step("write_brief").is_some());
        assert!(wf.get_step("per_epic").is_some());
        assert!(wf.get_step("write_epic_plan").is_some());
        assert!(wf.get_step("missing").is_none());
    }

    #[test]
    fn test_production_steps_in_tree_order() {
        let wf = make_workflow();
        let ids: Vec<&str> = wf
            .get_production_steps()
            .iter()
            .map(|s| s.step_id.as_str())
            .collect();
        assert_eq!(ids, vec!["write_brief", "write_epic_plan"]);
    }

    #[test]
    fn test_step_ids_recursive() {
        let wf = make_workflow();
        assert_eq!(
            wf.step_ids(),
            vec!["write_brief", "per_epic", "write_epic_plan"]
        );
    }

    #[test]
    fn test_scope_hierarchy_from_workflow() {
        let wf = make_workflow();
        let h = wf.scope_hierarchy().unwrap();
        assert!(h.is_ancestor("project", "epic"));
        assert!(h.is_root("project"));
    }

    #[test]
    fn test_step_kind_accessors() {
        let wf = make_workflow();
        let brief = wf.get_step("write_brief").unwrap();
        assert!(brief.is_production());
        assert_eq!(brief.produces(), Some("project_brief"));
        assert!(brief.nested_steps().is_empty());

        let iter = wf.get_step("per_epic").unwrap();
        assert!(iter.is_iteration());
        assert_eq!(iter.produces(), None);
        assert_eq!(iter.nested_steps().len(), 1);
        assert!(iter.inputs().is_empty());
    }

    #[test]
    fn test_input_reference_defaults() {
        let json = serde_json::json!({ "scope": "project", "doc_type": "project_brief" });
        let input: InputReference = serde_json::from_value(json).unwrap();
        assert!(input.required);
        assert!(!input.context);
        assert_eq!(input.key(), Some("project_brief"));
    }

    #[test]
    fn test_step_deserializes_by_shape() {
        let production = serde_json::json!({
            "step_id": "s1",
            "scope": "project",
            "role": "planner",
            "task_prompt": "Brief v1.0",
            "produces": "project_brief",
            "inputs": []
        });
        let step: WorkflowStep = serde_json::from_value(production).unwrap();
        assert!(step.is_production());

        let iteration = serde_json::json!({
            "step_id": "s2",
            "scope": "project",
            "iterate_over": {
                "doc_type": "project_brief",
                "collection_field": "epics",
                "entity_type": "epic"
            },
            "steps": [{
                "step_id": "s3",
                "scope": "epic",
                "role": "planner",
                "task_prompt": "Plan v1.0",
                "produces": "epic_plan"
            }]
        });
        let step: WorkflowStep = serde_json::from_value(iteration).unwrap();
        assert!(step.is_iteration());
        assert_eq!(step.nested_steps().len(), 1);
    }

    #[test]
    fn test_accepted_by_implies_acceptance_required() {
        let config =
            DocumentTypeConfig::new("project_brief", "project").with_accepted_by(["product_lead"]);
        assert!(config.acceptance_required);
    }
}
