//! Acceptance gate: pure lookups over config and recorded decisions

use docloom_types::{decision_key, AcceptanceDecision, DocumentTypeConfig};
use std::collections::HashMap;

pub struct AcceptanceGate;

impl AcceptanceGate {
    /// Whether the workflow may proceed past a document: acceptance is
    /// not required, or an accepting decision exists
    pub fn can_proceed(
        config: &DocumentTypeConfig,
        decisions: &HashMap<String, AcceptanceDecision>,
        scope_instance_id: Option<&str>,
    ) -> bool {
        if !config.acceptance_required {
            return true;
        }
        decisions
            .get(&decision_key(&config.name, scope_instance_id))
            .is_some_and(|decision| decision.accepted)
    }

    /// Whether a decision is still outstanding
    pub fn is_pending(
        config: &DocumentTypeConfig,
        decisions: &HashMap<String, AcceptanceDecision>,
        scope_instance_id: Option<&str>,
    ) -> bool {
        config.acceptance_required
            && !decisions.contains_key(&decision_key(&config.name, scope_instance_id))
    }

    /// Whether `role` may decide for this document type; an empty
    /// `accepted_by` list means anyone may
    pub fn can_accept(config: &DocumentTypeConfig, role: &str) -> bool {
        config.accepted_by.is_empty() || config.accepted_by.iter().any(|r| r == role)
    }
}
