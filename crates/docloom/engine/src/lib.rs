//! Docloom execution engine
//!
//! Runs validated workflows: resolves step inputs against the
//! scope-aware context, drives generation through the clarification,
//! QA, remediation, and acceptance gates, fans iteration steps out per
//! collection item, and persists runs across the pause/resume boundary.
//!
//! The engine is a cooperative, non-parallel interpreter: one logical
//! thread of control per run, with the generation call as the only
//! await point and clarification/acceptance as process-level pauses.

pub mod acceptance;
pub mod clarification;
pub mod errors;
pub mod executor;
pub mod iteration;
pub mod json_extract;
pub mod persistence;
pub mod qa;
pub mod remediation;
pub mod resolver;
pub mod services;
pub mod step_executor;

pub use acceptance::AcceptanceGate;
pub use clarification::{ClarificationCheck, ClarificationGate};
pub use errors::{EngineError, EngineResult};
pub use executor::{RunOutcome, WorkflowExecutor};
pub use iteration::{IterationHandler, IterationInstance};
pub use json_extract::extract_json;
pub use persistence::{FilePersistence, InMemoryPersistence, StatePersistence};
pub use qa::QaGate;
pub use remediation::RemediationLoop;
pub use resolver::{InputResolver, ResolvedInput, ResolvedInputs};
pub use services::{CachedPromptLoader, GenerationService, InMemoryPromptLoader, PromptLoader};
pub use step_executor::{StepExecutor, StepOutcome};
