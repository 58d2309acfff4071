//! Input resolution: turning declared references into context values
//!
//! Resolution re-checks cross-scope legality with the same
//! classification the static validator uses, then computes the lookup
//! instance id and fetches from Context. All failures for a step are
//! accumulated and returned together.

use docloom_types::{
    classify_reference, InputReference, ScopeHierarchy, WorkflowContext, WorkflowStep,
};
use serde_json::Value;
use std::collections::HashMap;

/// One resolved input
#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedInput {
    pub value: Option<Value>,
    pub found: bool,
    pub error: Option<String>,
}

impl ResolvedInput {
    fn found(value: Value) -> Self {
        Self {
            value: Some(value),
            found: true,
            error: None,
        }
    }

    fn absent() -> Self {
        Self {
            value: None,
            found: false,
            error: None,
        }
    }

    fn failed(error: impl Into<String>) -> Self {
        Self {
            value: None,
            found: false,
            error: Some(error.into()),
        }
    }
}

/// All of a step's inputs, in declaration order
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResolvedInputs {
    entries: Vec<(String, ResolvedInput)>,
}

impl ResolvedInputs {
    pub fn get(&self, key: &str) -> Option<&ResolvedInput> {
        self.entries
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, input)| input)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ResolvedInput)> {
        self.entries.iter().map(|(name, input)| (name.as_str(), input))
    }

    /// Every accumulated resolution error
    pub fn failures(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter_map(|(_, input)| input.error.as_deref())
            .collect()
    }

    pub fn ok(&self) -> bool {
        self.entries.iter().all(|(_, input)| input.error.is_none())
    }

    /// Only the found entries, as a plain key → value map for prompt
    /// injection
    pub fn found_values(&self) -> HashMap<&str, &Value> {
        self.entries
            .iter()
            .filter_map(|(name, input)| input.value.as_ref().map(|v| (name.as_str(), v)))
            .collect()
    }

    fn push(&mut self, key: String, input: ResolvedInput) {
        self.entries.push((key, input));
    }
}

/// Resolves a step's declared inputs against the runtime context
pub struct InputResolver<'a> {
    hierarchy: &'a ScopeHierarchy,
}

impl<'a> InputResolver<'a> {
    pub fn new(hierarchy: &'a ScopeHierarchy) -> Self {
        Self { hierarchy }
    }

    /// Resolve every input of `step`. `current_scope_id` is the active
    /// instance of the step's own scope; `ancestor_scope_ids` maps each
    /// ancestor scope to its active instance id.
    pub fn resolve(
        &self,
        step: &WorkflowStep,
        context: &WorkflowContext,
        current_scope_id: Option<&str>,
        ancestor_scope_ids: &HashMap<String, String>,
    ) -> ResolvedInputs {
        let mut resolved = ResolvedInputs::default();
        for (index, input) in step.inputs().iter().enumerate() {
            let key = input
                .key()
                .map(String::from)
                .unwrap_or_else(|| format!("input_{}", index));
            let entry = self.resolve_one(
                step,
                input,
                context,
                current_scope_id,
                ancestor_scope_ids,
            );
            if let Some(error) = &entry.error {
                tracing::debug!(step_id = %step.step_id, input = %key, error = %error,
                    "input resolution failure");
            }
            resolved.push(key, entry);
        }
        resolved
    }

    fn resolve_one(
        &self,
        step: &WorkflowStep,
        input: &InputReference,
        context: &WorkflowContext,
        current_scope_id: Option<&str>,
        ancestor_scope_ids: &HashMap<String, String>,
    ) -> ResolvedInput {
        // Same rule as the static validator; a workflow that passed
        // validation cannot fail here, hand-built ones can.
        let class = classify_reference(self.hierarchy, &input.scope, &step.scope, input.context);
        if !class.is_allowed() {
            return ResolvedInput::failed(format!(
                "illegal reference from scope '{}' to scope '{}': {}",
                step.scope,
                input.scope,
                class.describe()
            ));
        }

        let instance_id: Option<&str> = if self.hierarchy.is_root(&input.scope) {
            None
        } else if input.scope == step.scope {
            current_scope_id
        } else {
            match ancestor_scope_ids.get(&input.scope) {
                Some(id) => Some(id.as_str()),
                None => {
                    return self.not_found(
                        input,
                        format!("no active instance for ancestor scope '{}'", input.scope),
                    );
                }
            }
        };

        let value = match (&input.doc_type, &input.entity_type) {
            (Some(doc_type), _) => context.get_document(doc_type, &input.scope, instance_id),
            (None, Some(entity_type)) => match instance_id {
                Some(id) => context.get_entity(entity_type, id),
                None => None,
            },
            (None, None) => {
                return ResolvedInput::failed(
                    "input declares neither doc_type nor entity_type".to_string(),
                );
            }
        };

        match value {
            Some(value) => ResolvedInput::found(value.clone()),
            None => self.not_found(
                input,
                format!(
                    "'{}' not found at scope '{}' (instance {})",
                    input.key().unwrap_or("?"),
                    input.scope,
                    instance_id.unwrap_or("root"),
                ),
            ),
        }
    }

    fn not_found(&self, input: &InputReference, message: String) -> ResolvedInput {
        if input.required {
            ResolvedInput::failed(message)
        } else {
            ResolvedInput::absent()
        }
    }
}
