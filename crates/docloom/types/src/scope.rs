//! Scope hierarchy: the nesting levels at which documents are produced
//!
//! A workflow declares a forest of scopes (e.g. project → epic → story).
//! Construction is where validity is enforced: unknown parents and
//! cycles are rejected up front. Accessors are total functions over
//! possibly-unknown names — they return `None`/`false` rather than
//! raising, so callers can probe freely.

use crate::{WorkflowError, WorkflowResult};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

// ── Scope Hierarchy ──────────────────────────────────────────────────

/// The parent/child relation between scope levels, validated on build
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeHierarchy {
    parents: HashMap<String, Option<String>>,
}

impl ScopeHierarchy {
    /// Build a hierarchy from a `scope → parent` map.
    ///
    /// Fails if a declared parent is not itself a declared scope, or
    /// if walking any scope's parent chain revisits a scope (cycle).
    pub fn build(parents: HashMap<String, Option<String>>) -> WorkflowResult<Self> {
        for (scope, parent) in &parents {
            if let Some(parent) = parent {
                if !parents.contains_key(parent) {
                    return Err(WorkflowError::InvalidScopeHierarchy(format!(
                        "scope '{}' declares unknown parent '{}'",
                        scope, parent
                    )));
                }
            }
        }

        for scope in parents.keys() {
            let mut visited = HashSet::new();
            visited.insert(scope.as_str());
            let mut current = scope.as_str();
            while let Some(Some(parent)) = parents.get(current) {
                if !visited.insert(parent.as_str()) {
                    return Err(WorkflowError::InvalidScopeHierarchy(format!(
                        "cycle in scope hierarchy through '{}'",
                        parent
                    )));
                }
                current = parent.as_str();
            }
        }

        Ok(Self { parents })
    }

    /// Whether `scope` is declared in this hierarchy
    pub fn contains(&self, scope: &str) -> bool {
        self.parents.contains_key(scope)
    }

    /// The declared parent of `scope`, if any
    pub fn get_parent(&self, scope: &str) -> Option<&str> {
        self.parents.get(scope).and_then(|p| p.as_deref())
    }

    /// Whether `scope` is declared and has no parent
    pub fn is_root(&self, scope: &str) -> bool {
        matches!(self.parents.get(scope), Some(None))
    }

    /// True iff `a` appears anywhere in `b`'s parent chain (strict —
    /// a scope is never its own ancestor)
    pub fn is_ancestor(&self, a: &str, b: &str) -> bool {
        let mut current = b;
        while let Some(parent) = self.get_parent(current) {
            if parent == a {
                return true;
            }
            current = parent;
        }
        false
    }

    /// Mirror of [`is_ancestor`](Self::is_ancestor)
    pub fn is_descendant(&self, a: &str, b: &str) -> bool {
        self.is_ancestor(b, a)
    }

    /// All scopes with no parent
    pub fn root_scopes(&self) -> Vec<&str> {
        let mut roots: Vec<&str> = self
            .parents
            .iter()
            .filter(|(_, parent)| parent.is_none())
            .map(|(name, _)| name.as_str())
            .collect();
        roots.sort_unstable();
        roots
    }

    /// Depth of `scope` in its tree (roots have depth 0)
    pub fn get_depth(&self, scope: &str) -> Option<usize> {
        if !self.contains(scope) {
            return None;
        }
        let mut depth = 0;
        let mut current = scope;
        while let Some(parent) = self.get_parent(current) {
            depth += 1;
            current = parent;
        }
        Some(depth)
    }

    /// Parent chain of `scope`, nearest ancestor first
    pub fn ancestors(&self, scope: &str) -> Vec<&str> {
        let mut chain = Vec::new();
        let mut current = scope;
        while let Some(parent) = self.get_parent(current) {
            chain.push(parent);
            current = parent;
        }
        chain
    }

    /// Number of declared scopes
    pub fn len(&self) -> usize {
        self.parents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parents.is_empty()
    }
}

// ── Cross-scope reference legality ───────────────────────────────────

/// Classification of an input reference relative to the scope of the
/// step that declares it.
///
/// This is the single implementation of the reference-legality rule.
/// The static validator and the runtime input resolver both call it,
/// so their verdicts agree on every case by construction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReferenceClass {
    /// Target scope is a strict ancestor of the step's scope
    Ancestor,
    /// Same scope, read through the active iteration context
    SameScopeContext,
    /// Same scope, no parent — only one instance can ever exist
    SameScopeRoot,
    /// Same non-root scope without context: ambiguous among siblings
    Sibling,
    /// Target scope is below the step — its documents don't exist yet
    Descendant,
    /// Neither ancestor, same, nor descendant
    CrossBranch,
}

impl ReferenceClass {
    /// Whether a reference of this class may be declared or resolved
    pub fn is_allowed(&self) -> bool {
        matches!(
            self,
            Self::Ancestor | Self::SameScopeContext | Self::SameScopeRoot
        )
    }

    /// Short human-readable rationale for forbidden classes
    pub fn describe(&self) -> &'static str {
        match self {
            Self::Ancestor => "ancestor scope reference",
            Self::SameScopeContext => "same-scope context reference",
            Self::SameScopeRoot => "same-scope reference at a root scope",
            Self::Sibling => {
                "sibling reference: same-scope reference without context at a non-root scope"
            }
            Self::Descendant => "descendant reference: a parent cannot read a child's documents",
            Self::CrossBranch => "cross-branch reference: scopes are on unrelated branches",
        }
    }
}

/// Classify an input reference from a step at `step_scope` targeting
/// `ref_scope`, with `context` marking a read of the active iteration
/// entity rather than a lookup by name.
pub fn classify_reference(
    hierarchy: &ScopeHierarchy,
    ref_scope: &str,
    step_scope: &str,
    context: bool,
) -> ReferenceClass {
    if hierarchy.is_ancestor(ref_scope, step_scope) {
        ReferenceClass::Ancestor
    } else if ref_scope == step_scope {
        if context {
            ReferenceClass::SameScopeContext
        } else if hierarchy.is_root(step_scope) {
            ReferenceClass::SameScopeRoot
        } else {
            ReferenceClass::Sibling
        }
    } else if hierarchy.is_descendant(ref_scope, step_scope) {
        ReferenceClass::Descendant
    } else {
        ReferenceClass::CrossBranch
    }
}
