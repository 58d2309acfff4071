//! Docloom workflow loader
//!
//! Turns untrusted workflow definition JSON into validated
//! [`Workflow`](docloom_types::Workflow) values. Validation runs as an
//! ordered multi-pass pipeline: structural checks and scope-hierarchy
//! construction fail fast, every later pass accumulates its findings
//! so an author sees all problems at once.

pub mod errors;
pub mod loader;
pub mod schema;
pub mod validation;
pub mod validator;

pub use errors::{LoaderError, LoaderResult};
pub use loader::{LoadedWorkflow, WorkflowLoader};
pub use validation::{ValidationCode, ValidationError, ValidationResult};
pub use validator::WorkflowValidator;
