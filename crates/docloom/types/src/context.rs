//! Workflow context: the scope-aware runtime store of one execution
//!
//! Holds every document and entity produced so far, plus the explicit
//! stack of active scope instances. Owned by a single workflow
//! execution and mutated only by the executors. Serializes to a plain
//! nested structure for persistence.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// One active scope instance on the stack
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeFrame {
    pub scope: String,
    pub instance_id: String,
}

/// Scope-aware runtime store for produced documents and entities
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowContext {
    /// Documents keyed by `"doc_type:scope:instance"` (`root` when the
    /// scope has no instance id)
    documents: HashMap<String, Value>,
    /// Entities keyed by `"entity_type:instance_id"`
    entities: HashMap<String, Value>,
    /// Active scope instances, outermost first
    scope_stack: Vec<ScopeFrame>,
}

fn document_key(doc_type: &str, scope: &str, instance_id: Option<&str>) -> String {
    format!("{}:{}:{}", doc_type, scope, instance_id.unwrap_or("root"))
}

fn entity_key(entity_type: &str, instance_id: &str) -> String {
    format!("{}:{}", entity_type, instance_id)
}

impl WorkflowContext {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Documents ────────────────────────────────────────────────────

    pub fn store_document(
        &mut self,
        doc_type: &str,
        scope: &str,
        instance_id: Option<&str>,
        content: Value,
    ) {
        self.documents
            .insert(document_key(doc_type, scope, instance_id), content);
    }

    pub fn get_document(
        &self,
        doc_type: &str,
        scope: &str,
        instance_id: Option<&str>,
    ) -> Option<&Value> {
        self.documents.get(&document_key(doc_type, scope, instance_id))
    }

    pub fn has_document(&self, doc_type: &str, scope: &str, instance_id: Option<&str>) -> bool {
        self.documents
            .contains_key(&document_key(doc_type, scope, instance_id))
    }

    pub fn document_count(&self) -> usize {
        self.documents.len()
    }

    // ── Entities ─────────────────────────────────────────────────────

    pub fn store_entity(&mut self, entity_type: &str, instance_id: &str, content: Value) {
        self.entities
            .insert(entity_key(entity_type, instance_id), content);
    }

    pub fn get_entity(&self, entity_type: &str, instance_id: &str) -> Option<&Value> {
        self.entities.get(&entity_key(entity_type, instance_id))
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    // ── Scope stack ──────────────────────────────────────────────────

    pub fn push_scope(&mut self, scope: impl Into<String>, instance_id: impl Into<String>) {
        self.scope_stack.push(ScopeFrame {
            scope: scope.into(),
            instance_id: instance_id.into(),
        });
    }

    pub fn pop_scope(&mut self) -> Option<ScopeFrame> {
        self.scope_stack.pop()
    }

    /// The innermost active scope instance
    pub fn current_scope(&self) -> Option<&ScopeFrame> {
        self.scope_stack.last()
    }

    /// The full nesting path, outermost first
    pub fn get_scope_chain(&self) -> &[ScopeFrame] {
        &self.scope_stack
    }

    /// The active instance id for a scope, searching innermost first
    pub fn instance_id_for(&self, scope: &str) -> Option<&str> {
        self.scope_stack
            .iter()
            .rev()
            .find(|frame| frame.scope == scope)
            .map(|frame| frame.instance_id.as_str())
    }

    /// Scope → instance-id map of every active frame
    pub fn active_scope_ids(&self) -> HashMap<String, String> {
        self.scope_stack
            .iter()
            .map(|frame| (frame.scope.clone(), frame.instance_id.clone()))
            .collect()
    }
}
