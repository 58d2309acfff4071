//! Execution state: per-step records and the per-run aggregate
//!
//! `StepState` tracks one step's attempts, gates, and output;
//! `WorkflowState` tracks the whole run across pauses and resumes.
//! Both serialize to plain nested structures for persistence.
//!
//! Transition helpers favor best-effort forward progress: an
//! out-of-order call is logged as a warning, not an error.

use crate::{ClarificationQuestion, QaResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

// ── Step state ───────────────────────────────────────────────────────

/// The step execution state machine
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    #[default]
    Pending,
    Executing,
    /// Suspended awaiting clarification answers
    Clarifying,
    QaChecking,
    Remediating,
    Completed,
    Failed,
}

impl StepStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Per-step execution record, mutated in place across attempts
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StepState {
    pub step_id: String,
    pub status: StepStatus,
    /// Attempt counter; the first execution is attempt 1
    pub attempt: u32,
    pub max_attempts: u32,
    #[serde(default)]
    pub clarification_questions: Vec<ClarificationQuestion>,
    #[serde(default)]
    pub clarification_answers: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_document: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_llm_response: Option<String>,
    /// Every QA result across all attempts
    #[serde(default)]
    pub qa_history: Vec<QaResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StepState {
    pub fn new(step_id: impl Into<String>, max_attempts: u32) -> Self {
        Self {
            step_id: step_id.into(),
            status: StepStatus::Pending,
            attempt: 0,
            max_attempts,
            clarification_questions: Vec::new(),
            clarification_answers: HashMap::new(),
            output_document: None,
            raw_llm_response: None,
            qa_history: Vec::new(),
            started_at: None,
            completed_at: None,
            error: None,
        }
    }

    /// Begin an execution: increments the attempt counter and records
    /// the start time
    pub fn start(&mut self) {
        if self.status.is_terminal() {
            tracing::warn!(step_id = %self.step_id, status = ?self.status,
                "start() called on a terminal step state");
            return;
        }
        self.attempt += 1;
        self.status = StepStatus::Executing;
        if self.started_at.is_none() {
            self.started_at = Some(Utc::now());
        }
    }

    /// Begin a remediation retry
    pub fn begin_retry(&mut self) {
        self.attempt += 1;
        self.status = StepStatus::Remediating;
    }

    /// Suspend awaiting clarification answers
    pub fn await_clarification(&mut self, questions: Vec<ClarificationQuestion>) {
        self.clarification_questions = questions;
        self.status = StepStatus::Clarifying;
    }

    /// Record answers and return to executing
    pub fn record_answers(&mut self, answers: HashMap<String, String>) {
        if self.status != StepStatus::Clarifying {
            tracing::warn!(step_id = %self.step_id, status = ?self.status,
                "clarification answers recorded on a step that is not clarifying");
        }
        self.clarification_answers = answers;
        self.status = StepStatus::Executing;
    }

    pub fn record_qa(&mut self, result: QaResult) {
        self.qa_history.push(result);
    }

    pub fn complete(&mut self) {
        self.status = StepStatus::Completed;
        self.completed_at = Some(Utc::now());
    }

    pub fn fail(&mut self, reason: impl Into<String>) {
        self.status = StepStatus::Failed;
        self.error = Some(reason.into());
        self.completed_at = Some(Utc::now());
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// The most recent QA result, if any attempt got that far
    pub fn last_qa(&self) -> Option<&QaResult> {
        self.qa_history.last()
    }
}

// ── Iteration progress ───────────────────────────────────────────────

/// Durable record of how far an iteration step has advanced, so a
/// pause mid-iteration resumes at the correct item
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IterationProgress {
    pub total: usize,
    pub completed: usize,
    pub current_index: usize,
    /// Instance ids in expansion order; synthesized ids are pinned
    /// here so re-expansion after a restart reuses them
    pub entity_ids: Vec<String>,
}

impl IterationProgress {
    pub fn new(entity_ids: Vec<String>) -> Self {
        Self {
            total: entity_ids.len(),
            completed: 0,
            current_index: 0,
            entity_ids,
        }
    }

    pub fn advance(&mut self) {
        self.completed += 1;
        self.current_index = self.completed;
    }

    pub fn is_done(&self) -> bool {
        self.completed >= self.total
    }
}

// ── Acceptance ───────────────────────────────────────────────────────

/// A human accept/reject decision for one produced document
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptanceDecision {
    pub doc_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope_instance_id: Option<String>,
    pub accepted: bool,
    pub decided_by: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    pub decided_at: DateTime<Utc>,
}

impl AcceptanceDecision {
    pub fn accept(doc_type: impl Into<String>, decided_by: impl Into<String>) -> Self {
        Self {
            doc_type: doc_type.into(),
            scope_instance_id: None,
            accepted: true,
            decided_by: decided_by.into(),
            comment: None,
            decided_at: Utc::now(),
        }
    }

    pub fn reject(doc_type: impl Into<String>, decided_by: impl Into<String>) -> Self {
        Self {
            accepted: false,
            ..Self::accept(doc_type, decided_by)
        }
    }

    pub fn for_scope_instance(mut self, instance_id: impl Into<String>) -> Self {
        self.scope_instance_id = Some(instance_id.into());
        self
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }
}

/// The key acceptance decisions are stored under:
/// `"{doc_type}:{scope_instance_id|root}"`
pub fn decision_key(doc_type: &str, scope_instance_id: Option<&str>) -> String {
    format!("{}:{}", doc_type, scope_instance_id.unwrap_or("root"))
}

// ── Pause markers ────────────────────────────────────────────────────

/// Where a run paused awaiting a human acceptance decision
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingAcceptance {
    pub doc_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope_instance_id: Option<String>,
    /// The execution key of the step whose document awaits acceptance
    pub execution_key: String,
}

/// Where a run paused awaiting clarification answers
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingClarification {
    pub step_id: String,
    pub execution_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope_instance_id: Option<String>,
    /// Ancestor scope → instance id, captured at suspension time
    #[serde(default)]
    pub ancestor_scope_ids: HashMap<String, String>,
}

// ── Workflow state ───────────────────────────────────────────────────

/// Lifecycle status of one workflow execution
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    #[default]
    Pending,
    Running,
    WaitingClarification,
    WaitingAcceptance,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Per-execution aggregate: one instance per (workflow_id, project_id)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    pub workflow_id: String,
    pub project_id: String,
    pub status: RunStatus,
    /// Execution keys of completed steps, in completion order
    pub completed_steps: Vec<String>,
    /// Execution key → step state
    pub step_states: HashMap<String, StepState>,
    /// Iteration step id → progress
    pub iteration_progress: HashMap<String, IterationProgress>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_acceptance: Option<PendingAcceptance>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_clarification: Option<PendingClarification>,
    /// Decision key → decision; a new decision overwrites the entry
    pub acceptance_decisions: HashMap<String, AcceptanceDecision>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WorkflowState {
    pub fn new(workflow_id: impl Into<String>, project_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            workflow_id: workflow_id.into(),
            project_id: project_id.into(),
            status: RunStatus::Pending,
            completed_steps: Vec::new(),
            step_states: HashMap::new(),
            iteration_progress: HashMap::new(),
            pending_acceptance: None,
            pending_clarification: None,
            acceptance_decisions: HashMap::new(),
            created_at: now,
            updated_at: now,
            completed_at: None,
            error: None,
        }
    }

    pub fn run(&mut self) {
        if self.status.is_terminal() {
            tracing::warn!(workflow_id = %self.workflow_id, status = ?self.status,
                "run() called on a terminal workflow state");
            return;
        }
        self.status = RunStatus::Running;
        self.touch();
    }

    /// Record a step as complete. Idempotent: recording the same key
    /// twice keeps a single entry.
    pub fn mark_step_complete(&mut self, execution_key: impl Into<String>) {
        let key = execution_key.into();
        if !self.completed_steps.contains(&key) {
            self.completed_steps.push(key);
        }
        self.touch();
    }

    pub fn is_step_complete(&self, execution_key: &str) -> bool {
        self.completed_steps.iter().any(|k| k == execution_key)
    }

    /// Get or create the step state for an execution key
    pub fn ensure_step_state(
        &mut self,
        execution_key: &str,
        step_id: &str,
        max_attempts: u32,
    ) -> &mut StepState {
        self.touch();
        self.step_states
            .entry(execution_key.to_string())
            .or_insert_with(|| StepState::new(step_id, max_attempts))
    }

    pub fn step_state(&self, execution_key: &str) -> Option<&StepState> {
        self.step_states.get(execution_key)
    }

    pub fn step_state_mut(&mut self, execution_key: &str) -> Option<&mut StepState> {
        self.step_states.get_mut(execution_key)
    }

    pub fn pause_for_acceptance(&mut self, pending: PendingAcceptance) {
        self.pending_acceptance = Some(pending);
        self.status = RunStatus::WaitingAcceptance;
        self.touch();
    }

    pub fn pause_for_clarification(&mut self, pending: PendingClarification) {
        self.pending_clarification = Some(pending);
        self.status = RunStatus::WaitingClarification;
        self.touch();
    }

    pub fn record_decision(&mut self, decision: AcceptanceDecision) {
        let key = decision_key(&decision.doc_type, decision.scope_instance_id.as_deref());
        self.acceptance_decisions.insert(key, decision);
        self.touch();
    }

    pub fn complete(&mut self) {
        self.status = RunStatus::Completed;
        self.completed_at = Some(Utc::now());
        self.touch();
    }

    pub fn fail(&mut self, reason: impl Into<String>) {
        self.status = RunStatus::Failed;
        self.error = Some(reason.into());
        self.completed_at = Some(Utc::now());
        self.touch();
    }

    /// Terminal cancellation applied by a caller outside the main
    /// loop; in-flight generation cannot be interrupted, cancellation
    /// only prevents future steps from starting
    pub fn cancel(&mut self) {
        if self.status.is_terminal() {
            tracing::warn!(workflow_id = %self.workflow_id, status = ?self.status,
                "cancel() called on a terminal workflow state");
            return;
        }
        self.status = RunStatus::Cancelled;
        self.completed_at = Some(Utc::now());
        self.touch();
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
