//! Workflow execution: the top-level cooperative loop
//!
//! One logical thread of control per run. The loop repeatedly picks
//! the first not-yet-completed top-level step and dispatches it;
//! iteration steps fan out nested steps per instance. Clarification
//! and acceptance are process-level pauses: the run is persisted and
//! can resume arbitrarily later, possibly in another process.

use crate::acceptance::AcceptanceGate;
use crate::errors::{EngineError, EngineResult};
use crate::iteration::{IterationHandler, IterationInstance};
use crate::persistence::StatePersistence;
use crate::step_executor::{StepExecutor, StepOutcome};
use docloom_types::{
    AcceptanceDecision, IterationProgress, PendingAcceptance, PendingClarification, RunStatus,
    ScopeHierarchy, Workflow, WorkflowContext, WorkflowState, WorkflowStep,
};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Why `run_until_pause` returned
#[derive(Clone, Debug)]
pub enum RunOutcome {
    Completed,
    WaitingAcceptance(PendingAcceptance),
    WaitingClarification(PendingClarification),
    Failed(String),
}

/// Internal control flow between steps
enum Flow {
    Continue,
    Pause(RunOutcome),
}

pub struct WorkflowExecutor {
    workflow: Workflow,
    hierarchy: ScopeHierarchy,
    steps: StepExecutor,
    persistence: Option<Arc<dyn StatePersistence>>,
    max_attempts: u32,
}

impl std::fmt::Debug for WorkflowExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowExecutor")
            .field("workflow", &self.workflow)
            .field("hierarchy", &self.hierarchy)
            .field("max_attempts", &self.max_attempts)
            .finish_non_exhaustive()
    }
}

impl WorkflowExecutor {
    pub fn new(workflow: Workflow, steps: StepExecutor) -> EngineResult<Self> {
        let hierarchy = workflow.scope_hierarchy()?;
        Ok(Self {
            workflow,
            hierarchy,
            steps,
            persistence: None,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        })
    }

    /// Validate a raw definition and wrap it in one call
    pub fn from_definition(raw: &serde_json::Value, steps: StepExecutor) -> EngineResult<Self> {
        let loaded = docloom_loader::WorkflowLoader::new().load_value(raw)?;
        for warning in &loaded.warnings {
            tracing::warn!(code = %warning.code, path = %warning.path,
                message = %warning.message, "definition warning");
        }
        Self::new(loaded.workflow, steps)
    }

    pub fn with_persistence(mut self, persistence: Arc<dyn StatePersistence>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn workflow(&self) -> &Workflow {
        &self.workflow
    }

    // ── Run lifecycle ────────────────────────────────────────────────

    /// Start a fresh run for a project. Refuses to clobber a saved
    /// run; use [`resume`](Self::resume) to continue one.
    pub async fn start(
        &self,
        project_id: &str,
    ) -> EngineResult<(WorkflowState, WorkflowContext, RunOutcome)> {
        if let Some(persistence) = &self.persistence {
            if persistence.exists(&self.workflow.workflow_id, project_id) {
                return Err(EngineError::InvalidState(format!(
                    "a saved run already exists for project '{}'",
                    project_id
                )));
            }
        }
        let mut state = WorkflowState::new(&self.workflow.workflow_id, project_id);
        let mut context = WorkflowContext::new();
        tracing::info!(workflow_id = %state.workflow_id, project_id = %project_id,
            "starting workflow run");
        let outcome = self.run_until_pause(&mut state, &mut context).await?;
        Ok((state, context, outcome))
    }

    /// Load a persisted run and continue it. Returns `None` when no
    /// run is saved for the project.
    pub async fn resume(
        &self,
        project_id: &str,
    ) -> EngineResult<Option<(WorkflowState, WorkflowContext, RunOutcome)>> {
        let persistence = self.persistence.as_ref().ok_or_else(|| {
            EngineError::InvalidState("resume requires configured persistence".to_string())
        })?;
        let Some((mut state, mut context)) =
            persistence.load(&self.workflow.workflow_id, project_id)?
        else {
            return Ok(None);
        };
        tracing::info!(workflow_id = %state.workflow_id, project_id = %project_id,
            status = ?state.status, "resuming workflow run");
        let outcome = self.run_until_pause(&mut state, &mut context).await?;
        Ok(Some((state, context, outcome)))
    }

    /// Terminal cancellation; a generation call already in flight is
    /// not interrupted, future steps simply never start
    pub fn cancel(
        &self,
        state: &mut WorkflowState,
        context: &WorkflowContext,
    ) -> EngineResult<()> {
        state.cancel();
        self.save(state, context)
    }

    /// Drive the run until it completes, fails, or pauses for
    /// external input
    pub async fn run_until_pause(
        &self,
        state: &mut WorkflowState,
        context: &mut WorkflowContext,
    ) -> EngineResult<RunOutcome> {
        // a set pause marker means the paused step is still incomplete;
        // only process_acceptance/process_clarification may clear it
        if let Some(pending) = &state.pending_acceptance {
            return Ok(RunOutcome::WaitingAcceptance(pending.clone()));
        }
        if let Some(pending) = &state.pending_clarification {
            return Ok(RunOutcome::WaitingClarification(pending.clone()));
        }
        if state.is_terminal() {
            return Ok(terminal_outcome(state));
        }

        state.run();
        loop {
            let next = self
                .workflow
                .steps
                .iter()
                .find(|step| !state.is_step_complete(&step.step_id));
            let Some(step) = next else {
                state.complete();
                self.save(state, context)?;
                tracing::info!(workflow_id = %state.workflow_id, "workflow run completed");
                return Ok(RunOutcome::Completed);
            };
            match self.dispatch(step, None, state, context).await? {
                Flow::Continue => continue,
                Flow::Pause(outcome) => return Ok(outcome),
            }
        }
    }

    // ── External input ───────────────────────────────────────────────

    /// Record an acceptance decision and, when accepted, resume
    pub async fn process_acceptance(
        &self,
        state: &mut WorkflowState,
        context: &mut WorkflowContext,
        decision: AcceptanceDecision,
    ) -> EngineResult<RunOutcome> {
        let config = self
            .workflow
            .get_document_type(&decision.doc_type)
            .ok_or_else(|| {
                EngineError::InvalidState(format!(
                    "acceptance decision for unknown document type '{}'",
                    decision.doc_type
                ))
            })?;
        if !AcceptanceGate::can_accept(config, &decision.decided_by) {
            return Err(EngineError::InvalidState(format!(
                "role '{}' may not decide on '{}'",
                decision.decided_by, decision.doc_type
            )));
        }

        let accepted = decision.accepted;
        let decided_by = decision.decided_by.clone();
        state.record_decision(decision);

        if !accepted {
            // rejection is terminal at this layer
            let reason = format!("document rejected by '{}'", decided_by);
            state.pending_acceptance = None;
            state.fail(reason.clone());
            self.save(state, context)?;
            return Ok(RunOutcome::Failed(reason));
        }

        if let Some(pending) = state.pending_acceptance.take() {
            state.mark_step_complete(&pending.execution_key);
        }
        state.run();
        self.run_until_pause(state, context).await
    }

    /// Feed clarification answers to the suspended step and resume
    pub async fn process_clarification(
        &self,
        state: &mut WorkflowState,
        context: &mut WorkflowContext,
        answers: HashMap<String, String>,
    ) -> EngineResult<RunOutcome> {
        let pending = state.pending_clarification.take().ok_or_else(|| {
            EngineError::InvalidState("no clarification is pending".to_string())
        })?;
        let step = self.workflow.get_step(&pending.step_id).ok_or_else(|| {
            EngineError::Workflow(docloom_types::WorkflowError::StepNotFound(
                pending.step_id.clone(),
            ))
        })?;

        let mut step_state = state
            .ensure_step_state(&pending.execution_key, &pending.step_id, self.max_attempts)
            .clone();
        let outcome = self
            .steps
            .continue_after_clarification(
                step,
                &self.hierarchy,
                context,
                &mut step_state,
                pending.scope_instance_id.as_deref(),
                &pending.ancestor_scope_ids,
                answers,
            )
            .await?;
        state
            .step_states
            .insert(pending.execution_key.clone(), step_state);

        state.run();
        match self.settle(
            step,
            &pending.execution_key,
            outcome,
            state,
            context,
            pending.scope_instance_id.clone(),
            pending.ancestor_scope_ids.clone(),
        )? {
            Flow::Pause(outcome) => Ok(outcome),
            Flow::Continue => self.run_until_pause(state, context).await,
        }
    }

    // ── Step dispatch ────────────────────────────────────────────────

    /// Recursive dispatch; boxed because iteration steps re-enter it
    /// for their nested steps
    fn dispatch<'a>(
        &'a self,
        step: &'a WorkflowStep,
        instance_suffix: Option<String>,
        state: &'a mut WorkflowState,
        context: &'a mut WorkflowContext,
    ) -> Pin<Box<dyn Future<Output = EngineResult<Flow>> + 'a>> {
        Box::pin(async move {
            let execution_key = match &instance_suffix {
                Some(suffix) => format!("{}::{}", step.step_id, suffix),
                None => step.step_id.clone(),
            };
            if state.is_step_complete(&execution_key) {
                return Ok(Flow::Continue);
            }
            if step.is_production() {
                self.run_production(step, &execution_key, state, context).await
            } else {
                self.run_iteration(step, &execution_key, state, context).await
            }
        })
    }

    async fn run_production(
        &self,
        step: &WorkflowStep,
        execution_key: &str,
        state: &mut WorkflowState,
        context: &mut WorkflowContext,
    ) -> EngineResult<Flow> {
        let current_scope_id = context.instance_id_for(&step.scope).map(String::from);
        let ancestors = context.active_scope_ids();

        let mut step_state = state
            .ensure_step_state(execution_key, &step.step_id, self.max_attempts)
            .clone();
        let outcome = self
            .steps
            .execute(
                step,
                &self.hierarchy,
                context,
                &mut step_state,
                current_scope_id.as_deref(),
                &ancestors,
                true,
            )
            .await?;
        state
            .step_states
            .insert(execution_key.to_string(), step_state);

        self.settle(
            step,
            execution_key,
            outcome,
            state,
            context,
            current_scope_id,
            ancestors,
        )
    }

    /// Apply a step outcome to the run: store output, gate on
    /// acceptance, record completion or the pause/failure
    #[allow(clippy::too_many_arguments)]
    fn settle(
        &self,
        step: &WorkflowStep,
        execution_key: &str,
        outcome: StepOutcome,
        state: &mut WorkflowState,
        context: &mut WorkflowContext,
        current_scope_id: Option<String>,
        ancestors: HashMap<String, String>,
    ) -> EngineResult<Flow> {
        match outcome {
            StepOutcome::Failed(reason) => {
                let reason = format!("step '{}' failed: {}", step.step_id, reason);
                state.fail(reason.clone());
                self.save(state, context)?;
                Ok(Flow::Pause(RunOutcome::Failed(reason)))
            }
            StepOutcome::NeedsClarification(_) => {
                let pending = PendingClarification {
                    step_id: step.step_id.clone(),
                    execution_key: execution_key.to_string(),
                    scope_instance_id: current_scope_id,
                    ancestor_scope_ids: ancestors,
                };
                state.pause_for_clarification(pending.clone());
                self.save(state, context)?;
                Ok(Flow::Pause(RunOutcome::WaitingClarification(pending)))
            }
            StepOutcome::Completed(document) => {
                let Some(produces) = step.produces() else {
                    return Err(EngineError::InvalidState(format!(
                        "step '{}' completed without a produced type",
                        step.step_id
                    )));
                };
                let config = self.workflow.get_document_type(produces).ok_or_else(|| {
                    EngineError::Workflow(docloom_types::WorkflowError::UnknownDocumentType(
                        produces.to_string(),
                    ))
                })?;
                let instance_id = if self.hierarchy.is_root(&config.scope) {
                    None
                } else {
                    current_scope_id
                };
                // visible in Context even while acceptance is pending
                context.store_document(produces, &config.scope, instance_id.as_deref(), document);

                if AcceptanceGate::is_pending(
                    config,
                    &state.acceptance_decisions,
                    instance_id.as_deref(),
                ) {
                    let pending = PendingAcceptance {
                        doc_type: produces.to_string(),
                        scope_instance_id: instance_id,
                        execution_key: execution_key.to_string(),
                    };
                    state.pause_for_acceptance(pending.clone());
                    self.save(state, context)?;
                    return Ok(Flow::Pause(RunOutcome::WaitingAcceptance(pending)));
                }
                if !AcceptanceGate::can_proceed(
                    config,
                    &state.acceptance_decisions,
                    instance_id.as_deref(),
                ) {
                    let reason = format!("document '{}' was rejected", produces);
                    state.fail(reason.clone());
                    self.save(state, context)?;
                    return Ok(Flow::Pause(RunOutcome::Failed(reason)));
                }

                state.mark_step_complete(execution_key);
                Ok(Flow::Continue)
            }
        }
    }

    async fn run_iteration(
        &self,
        step: &WorkflowStep,
        execution_key: &str,
        state: &mut WorkflowState,
        context: &mut WorkflowContext,
    ) -> EngineResult<Flow> {
        let mut instances = IterationHandler::expand(&self.workflow, step, context)?;

        // pin instance ids so synthesized ids survive a restart
        match state.iteration_progress.get(execution_key) {
            Some(progress) if progress.entity_ids.len() == instances.len() => {
                for (instance, id) in instances.iter_mut().zip(&progress.entity_ids) {
                    instance.instance_id = id.clone();
                    instance.scope_instance_id = id.clone();
                }
            }
            _ => {
                let ids = instances.iter().map(|i| i.instance_id.clone()).collect();
                state
                    .iteration_progress
                    .insert(execution_key.to_string(), IterationProgress::new(ids));
            }
        }

        if instances.is_empty() {
            tracing::info!(step_id = %step.step_id, "iteration expanded to zero instances");
            state.mark_step_complete(execution_key);
            return Ok(Flow::Continue);
        }

        for (index, instance) in instances.iter().enumerate() {
            context.store_entity(
                &instance.entity_type,
                &instance.instance_id,
                instance.data.clone(),
            );
            context.push_scope(&instance.scope, &instance.scope_instance_id);
            let result = self.run_instance(step, instance, state, context).await;
            // the pushed scope never outlives the instance, even on
            // pause or failure
            context.pop_scope();

            match result? {
                Flow::Pause(outcome) => {
                    if let Some(progress) = state.iteration_progress.get_mut(execution_key) {
                        progress.current_index = index;
                    }
                    return Ok(Flow::Pause(outcome));
                }
                Flow::Continue => {
                    if let Some(progress) = state.iteration_progress.get_mut(execution_key) {
                        progress.completed = index + 1;
                        progress.current_index = index + 1;
                    }
                }
            }
        }

        state.mark_step_complete(execution_key);
        Ok(Flow::Continue)
    }

    async fn run_instance(
        &self,
        step: &WorkflowStep,
        instance: &IterationInstance,
        state: &mut WorkflowState,
        context: &mut WorkflowContext,
    ) -> EngineResult<Flow> {
        for nested in step.nested_steps() {
            match self
                .dispatch(nested, Some(instance.instance_id.clone()), state, context)
                .await?
            {
                Flow::Continue => {}
                pause => return Ok(pause),
            }
        }
        Ok(Flow::Continue)
    }

    fn save(&self, state: &WorkflowState, context: &WorkflowContext) -> EngineResult<()> {
        if let Some(persistence) = &self.persistence {
            persistence.save(state, context)?;
        }
        Ok(())
    }
}

fn terminal_outcome(state: &WorkflowState) -> RunOutcome {
    match state.status {
        RunStatus::Completed => RunOutcome::Completed,
        RunStatus::Cancelled => RunOutcome::Failed("execution cancelled".to_string()),
        _ => RunOutcome::Failed(state.error.clone().unwrap_or_else(|| "failed".to_string())),
    }
}
