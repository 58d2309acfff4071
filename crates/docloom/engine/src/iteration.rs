//! Iteration expansion: fanning a step out over a source collection
//!
//! The source document is looked up at its own declared scope, not the
//! step's. An absent source, absent field, or non-array field expands
//! to zero instances, which is a valid outcome, not an error.

use crate::errors::{EngineError, EngineResult};
use docloom_types::{StepKind, Workflow, WorkflowContext, WorkflowStep};
use serde_json::Value;

/// One materialized iteration instance
#[derive(Clone, Debug, PartialEq)]
pub struct IterationInstance {
    pub entity_type: String,
    pub instance_id: String,
    /// The raw collection item
    pub data: Value,
    /// The scope this instance establishes
    pub scope: String,
    /// Equal to `instance_id`; the id pushed onto the scope stack
    pub scope_instance_id: String,
}

pub struct IterationHandler;

impl IterationHandler {
    /// Expand an iteration step into its instances, in array order.
    ///
    /// Synthesized ids are unique within this expansion only; callers
    /// that need stability across calls must pin the ids themselves.
    pub fn expand(
        workflow: &Workflow,
        step: &WorkflowStep,
        context: &WorkflowContext,
    ) -> EngineResult<Vec<IterationInstance>> {
        let StepKind::Iteration { iterate_over, .. } = &step.kind else {
            return Err(EngineError::Workflow(
                docloom_types::WorkflowError::NotAnIterationStep(step.step_id.clone()),
            ));
        };

        let source_type = workflow
            .get_document_type(&iterate_over.doc_type)
            .ok_or_else(|| {
                EngineError::Workflow(docloom_types::WorkflowError::UnknownDocumentType(
                    iterate_over.doc_type.clone(),
                ))
            })?;
        let entity_type = workflow
            .get_entity_type(&iterate_over.entity_type)
            .ok_or_else(|| {
                EngineError::Workflow(docloom_types::WorkflowError::UnknownEntityType(
                    iterate_over.entity_type.clone(),
                ))
            })?;

        let source_instance_id = context.instance_id_for(&source_type.scope);
        let Some(source) =
            context.get_document(&iterate_over.doc_type, &source_type.scope, source_instance_id)
        else {
            tracing::debug!(step_id = %step.step_id, doc_type = %iterate_over.doc_type,
                "iteration source document absent; expanding to zero instances");
            return Ok(Vec::new());
        };

        let Some(items) = source
            .get(&iterate_over.collection_field)
            .and_then(Value::as_array)
        else {
            tracing::debug!(step_id = %step.step_id, field = %iterate_over.collection_field,
                "collection field absent or not an array; expanding to zero instances");
            return Ok(Vec::new());
        };

        let instances = items
            .iter()
            .enumerate()
            .map(|(index, item)| {
                let instance_id = item_id(item, &iterate_over.entity_type, index);
                IterationInstance {
                    entity_type: iterate_over.entity_type.clone(),
                    instance_id: instance_id.clone(),
                    data: item.clone(),
                    scope: entity_type.creates_scope.clone(),
                    scope_instance_id: instance_id,
                }
            })
            .collect();
        Ok(instances)
    }

    /// Count the instances an expansion would produce
    pub fn count_iterations(
        workflow: &Workflow,
        step: &WorkflowStep,
        context: &WorkflowContext,
    ) -> EngineResult<usize> {
        Ok(Self::expand(workflow, step, context)?.len())
    }
}

/// Probe `id`, `entity_id`, `<entity_type>_id` in order; synthesize
/// when none is present
fn item_id(item: &Value, entity_type: &str, index: usize) -> String {
    let typed_field = format!("{}_id", entity_type);
    for field in ["id", "entity_id", typed_field.as_str()] {
        if let Some(id) = item.get(field).and_then(Value::as_str) {
            return id.to_string();
        }
    }
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}_{}_{}", entity_type, index, &suffix[..8])
}
