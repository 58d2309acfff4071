//! Docloom domain types
//!
//! The shared vocabulary of the document-production pipeline:
//!
//! - [`ScopeHierarchy`] — the nesting levels (project → epic → story)
//!   and the cross-scope reference legality rule
//! - [`Workflow`] — the validated, immutable pipeline blueprint
//! - [`WorkflowContext`] — the scope-aware runtime store of one run
//! - [`WorkflowState`] / [`StepState`] — execution state across
//!   pauses, resumes, and retries
//! - [`QaResult`] / [`QuestionSet`] — the gate result records
//!
//! Static validation lives in `docloom-loader`; the runtime lives in
//! `docloom-engine`.

pub mod clarification;
pub mod context;
pub mod errors;
pub mod qa;
pub mod scope;
pub mod state;
pub mod workflow;

pub use clarification::{ClarificationQuestion, QuestionPriority, QuestionSet};
pub use context::{ScopeFrame, WorkflowContext};
pub use errors::{WorkflowError, WorkflowResult};
pub use qa::{FindingSeverity, QaFinding, QaResult};
pub use scope::{classify_reference, ReferenceClass, ScopeHierarchy};
pub use state::{
    decision_key, AcceptanceDecision, IterationProgress, PendingAcceptance, PendingClarification,
    RunStatus, StepState, StepStatus, WorkflowState,
};
pub use workflow::{
    DocumentTypeConfig, EntityTypeConfig, InputReference, IterationConfig, ScopeConfig, StepKind,
    Workflow, WorkflowStep,
};
