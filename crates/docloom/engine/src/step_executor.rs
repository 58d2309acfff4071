//! Step execution: the per-step state machine
//!
//! PENDING → EXECUTING → {CLARIFYING | QA_CHECKING} →
//! {REMEDIATING → EXECUTING | COMPLETED | FAILED}. The only await
//! point is the generation call; CLARIFYING suspends until
//! `continue_after_clarification` is driven by external answers.

use crate::clarification::ClarificationGate;
use crate::errors::{EngineError, EngineResult};
use crate::json_extract::extract_json;
use crate::qa::QaGate;
use crate::remediation::RemediationLoop;
use crate::resolver::{InputResolver, ResolvedInputs};
use crate::services::{GenerationService, PromptLoader};
use docloom_types::{
    ClarificationQuestion, QaResult, ScopeHierarchy, StepKind, StepState, WorkflowContext,
    WorkflowStep,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// How one execution call ended
#[derive(Clone, Debug)]
pub enum StepOutcome {
    Completed(Value),
    /// Suspended; the questions need external answers
    NeedsClarification(Vec<ClarificationQuestion>),
    Failed(String),
}

pub struct StepExecutor {
    generation: Arc<dyn GenerationService>,
    prompts: Arc<dyn PromptLoader>,
    qa: Arc<QaGate>,
    strict_qa: bool,
}

impl StepExecutor {
    pub fn new(
        generation: Arc<dyn GenerationService>,
        prompts: Arc<dyn PromptLoader>,
        qa: Arc<QaGate>,
    ) -> Self {
        Self {
            generation,
            prompts,
            qa,
            strict_qa: false,
        }
    }

    pub fn with_strict_qa(mut self) -> Self {
        self.strict_qa = true;
        self
    }

    /// Execute a production step from the top
    #[allow(clippy::too_many_arguments)]
    pub async fn execute(
        &self,
        step: &WorkflowStep,
        hierarchy: &ScopeHierarchy,
        context: &WorkflowContext,
        state: &mut StepState,
        current_scope_id: Option<&str>,
        ancestor_scope_ids: &HashMap<String, String>,
        allow_clarification: bool,
    ) -> EngineResult<StepOutcome> {
        let StepKind::Production {
            role,
            task_prompt,
            produces,
            ..
        } = &step.kind
        else {
            return Err(EngineError::Workflow(
                docloom_types::WorkflowError::NotAProductionStep(step.step_id.clone()),
            ));
        };

        state.start();
        tracing::info!(step_id = %step.step_id, attempt = state.attempt,
            scope = %step.scope, "executing step");

        // Prompt-load failure is a step failure, not retried.
        let (role_text, task_text) = match self.load_prompts(role, task_prompt) {
            Ok(prompts) => prompts,
            Err(err) => {
                state.fail(err.to_string());
                return Ok(StepOutcome::Failed(err.to_string()));
            }
        };

        let resolved = InputResolver::new(hierarchy).resolve(
            step,
            context,
            current_scope_id,
            ancestor_scope_ids,
        );
        if !resolved.ok() {
            let reason = format!(
                "input resolution failed: {}",
                resolved.failures().join("; ")
            );
            state.fail(reason.clone());
            return Ok(StepOutcome::Failed(reason));
        }

        let user_prompt = assemble_prompt(&task_text, &resolved, None, &[]);
        self.generation_loop(
            state,
            &role_text,
            &task_text,
            produces,
            user_prompt,
            allow_clarification,
        )
        .await
    }

    /// Resume a step suspended in CLARIFYING with its answers
    #[allow(clippy::too_many_arguments)]
    pub async fn continue_after_clarification(
        &self,
        step: &WorkflowStep,
        hierarchy: &ScopeHierarchy,
        context: &WorkflowContext,
        state: &mut StepState,
        current_scope_id: Option<&str>,
        ancestor_scope_ids: &HashMap<String, String>,
        answers: HashMap<String, String>,
    ) -> EngineResult<StepOutcome> {
        let StepKind::Production {
            role,
            task_prompt,
            produces,
            ..
        } = &step.kind
        else {
            return Err(EngineError::Workflow(
                docloom_types::WorkflowError::NotAProductionStep(step.step_id.clone()),
            ));
        };

        state.record_answers(answers);
        tracing::info!(step_id = %step.step_id, "continuing after clarification");

        let (role_text, task_text) = match self.load_prompts(role, task_prompt) {
            Ok(prompts) => prompts,
            Err(err) => {
                state.fail(err.to_string());
                return Ok(StepOutcome::Failed(err.to_string()));
            }
        };

        // scope context may have changed while suspended
        let resolved = InputResolver::new(hierarchy).resolve(
            step,
            context,
            current_scope_id,
            ancestor_scope_ids,
        );
        if !resolved.ok() {
            let reason = format!(
                "input resolution failed: {}",
                resolved.failures().join("; ")
            );
            state.fail(reason.clone());
            return Ok(StepOutcome::Failed(reason));
        }

        let user_prompt = assemble_prompt(
            &task_text,
            &resolved,
            Some(&state.clarification_answers),
            &state.clarification_questions,
        );
        // a compliant workflow asks once; no second clarification round
        self.generation_loop(state, &role_text, &task_text, produces, user_prompt, false)
            .await
    }

    fn load_prompts(&self, role: &str, task_prompt: &str) -> EngineResult<(String, String)> {
        let role_text = self.prompts.load_role(role)?;
        let task_text = self.prompts.load_task(task_prompt)?;
        Ok((role_text, task_text))
    }

    /// The generation+gate loop shared by first execution and
    /// clarification continuation
    async fn generation_loop(
        &self,
        state: &mut StepState,
        role_text: &str,
        task_text: &str,
        produces: &str,
        mut user_prompt: String,
        allow_clarification: bool,
    ) -> EngineResult<StepOutcome> {
        loop {
            let response = match self.generation.complete(role_text, &user_prompt).await {
                Ok(response) => response,
                Err(err) => {
                    // transport failure: fail immediately, never remediated
                    let reason = err.to_string();
                    state.fail(reason.clone());
                    return Ok(StepOutcome::Failed(reason));
                }
            };
            state.raw_llm_response = Some(response.clone());

            if state.attempt == 1 && allow_clarification {
                let check = ClarificationGate::check(&response);
                if check.needs_clarification && !check.questions.is_empty() {
                    tracing::info!(step_id = %state.step_id,
                        questions = check.questions.len(), "step suspended for clarification");
                    state.await_clarification(check.questions.clone());
                    return Ok(StepOutcome::NeedsClarification(check.questions));
                }
            }

            let qa_result = match extract_json(&response) {
                Some(document) => {
                    state.output_document = Some(document.clone());
                    self.qa.check(&document, produces, self.strict_qa)
                }
                None => QaResult::single_error(
                    "json_parse",
                    "$",
                    "response contains no parseable JSON document",
                ),
            };
            state.record_qa(qa_result.clone());

            if qa_result.passed {
                state.complete();
                // parse success is implied by a passing result
                let document = state.output_document.clone().unwrap_or(Value::Null);
                return Ok(StepOutcome::Completed(document));
            }

            if RemediationLoop::should_retry(state, &qa_result) {
                user_prompt =
                    RemediationLoop::build_remediation_prompt(task_text, state, &qa_result);
                state.begin_retry();
                tracing::info!(step_id = %state.step_id, attempt = state.attempt,
                    "remediating after failed qa");
                continue;
            }

            let reason = format!(
                "quality checks failed after {} attempt(s)",
                state.attempt
            );
            state.fail(reason.clone());
            return Ok(StepOutcome::Failed(reason));
        }
    }
}

/// Task prompt text, one fenced-JSON block per found input, and any
/// clarification Q&A pairs
fn assemble_prompt(
    task_text: &str,
    resolved: &ResolvedInputs,
    answers: Option<&HashMap<String, String>>,
    questions: &[ClarificationQuestion],
) -> String {
    let mut prompt = String::from(task_text);
    for (key, input) in resolved.iter() {
        if let Some(value) = &input.value {
            let rendered =
                serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string());
            prompt.push_str(&format!("\n\n### {}\n```json\n{}\n```", key, rendered));
        }
    }
    if let Some(answers) = answers {
        prompt.push_str("\n\nClarification answers:");
        for question in questions {
            let answer = answers
                .get(&question.id)
                .map(String::as_str)
                .unwrap_or("(no answer provided)");
            prompt.push_str(&format!("\nQ: {}\nA: {}", question.text, answer));
        }
    }
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use docloom_types::{
        DocumentTypeConfig, InputReference, ScopeConfig, StepStatus, Workflow,
    };
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Returns scripted responses in order; "!transport" scripts a
    /// transport failure
    struct ScriptedService {
        responses: Mutex<VecDeque<String>>,
    }

    impl ScriptedService {
        fn new(responses: impl IntoIterator<Item = &'static str>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into_iter().map(String::from).collect()),
            })
        }
    }

    #[async_trait]
    impl GenerationService for ScriptedService {
        async fn complete(&self, _system: &str, _user: &str) -> EngineResult<String> {
            let next = self
                .responses
                .lock()
                .unwrap()
                .pop_front()
                .expect("script exhausted");
            if next == "!transport" {
                return Err(EngineError::Generation("connection reset".to_string()));
            }
            Ok(next)
        }
    }

    fn make_workflow() -> Workflow {
        Workflow::new("planning-v1", "Planning")
            .with_scope("project", ScopeConfig::root())
            .with_document_type(DocumentTypeConfig::new("project_brief", "project"))
    }

    fn brief_step() -> WorkflowStep {
        WorkflowStep::production(
            "write_brief",
            "project",
            "planner",
            "Project Brief v1.0",
            "project_brief",
        )
    }

    fn make_executor(service: Arc<dyn GenerationService>) -> StepExecutor {
        let prompts = Arc::new(
            crate::services::InMemoryPromptLoader::new()
                .with_role("planner", "You are a planner.")
                .with_task("Project Brief v1.0", "Write the project brief."),
        );
        StepExecutor::new(service, prompts, Arc::new(QaGate::new()))
    }

    async fn run(
        executor: &StepExecutor,
        state: &mut StepState,
        allow_clarification: bool,
    ) -> StepOutcome {
        let workflow = make_workflow();
        let hierarchy = workflow.scope_hierarchy().unwrap();
        let context = WorkflowContext::new();
        executor
            .execute(
                &brief_step(),
                &hierarchy,
                &context,
                state,
                None,
                &HashMap::new(),
                allow_clarification,
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_first_attempt_success() {
        let executor = make_executor(ScriptedService::new([r#"{"title": "Alpha"}"#]));
        let mut state = StepState::new("write_brief", 3);

        let outcome = run(&executor, &mut state, true).await;
        assert!(matches!(outcome, StepOutcome::Completed(_)));
        assert_eq!(state.status, StepStatus::Completed);
        assert_eq!(state.attempt, 1);
        assert_eq!(state.qa_history.len(), 1);
        assert_eq!(state.output_document, Some(json!({"title": "Alpha"})));
    }

    #[tokio::test]
    async fn test_malformed_then_valid_remediates() {
        let executor = make_executor(ScriptedService::new([
            "not json",
            "still not json",
            r#"{"title": "Alpha"}"#,
        ]));
        let mut state = StepState::new("write_brief", 3);

        let outcome = run(&executor, &mut state, true).await;
        assert!(matches!(outcome, StepOutcome::Completed(_)));
        assert_eq!(state.attempt, 3);
        assert_eq!(state.qa_history.len(), 3);
        assert!(state.qa_history[2].passed);
        assert!(!state.qa_history[0].passed);
    }

    #[tokio::test]
    async fn test_remediation_bound() {
        let executor = make_executor(ScriptedService::new(["bad", "bad", "bad"]));
        let mut state = StepState::new("write_brief", 3);

        let outcome = run(&executor, &mut state, true).await;
        assert!(matches!(outcome, StepOutcome::Failed(_)));
        assert_eq!(state.status, StepStatus::Failed);
        assert_eq!(state.attempt, 3);
        assert_eq!(state.qa_history.len(), 3);
    }

    #[tokio::test]
    async fn test_transport_error_fails_without_retry() {
        let executor = make_executor(ScriptedService::new(["!transport"]));
        let mut state = StepState::new("write_brief", 3);

        let outcome = run(&executor, &mut state, true).await;
        let StepOutcome::Failed(reason) = outcome else {
            panic!("expected failure");
        };
        assert!(reason.contains("connection reset"));
        assert_eq!(state.attempt, 1);
        assert!(state.qa_history.is_empty());
    }

    #[tokio::test]
    async fn test_missing_prompt_fails_step() {
        let prompts = Arc::new(crate::services::InMemoryPromptLoader::new());
        let executor = StepExecutor::new(
            ScriptedService::new([]),
            prompts,
            Arc::new(QaGate::new()),
        );
        let mut state = StepState::new("write_brief", 3);

        let outcome = run(&executor, &mut state, true).await;
        assert!(matches!(outcome, StepOutcome::Failed(_)));
        assert_eq!(state.status, StepStatus::Failed);
    }

    #[tokio::test]
    async fn test_missing_required_input_skips_generation() {
        let executor = make_executor(ScriptedService::new([]));
        let workflow = make_workflow();
        let hierarchy = workflow.scope_hierarchy().unwrap();
        let context = WorkflowContext::new();
        let step = brief_step().with_input(InputReference::document("project", "project_brief"));
        let mut state = StepState::new("write_brief", 3);

        let outcome = executor
            .execute(
                &step,
                &hierarchy,
                &context,
                &mut state,
                None,
                &HashMap::new(),
                true,
            )
            .await
            .unwrap();
        // the script is empty; reaching the service would panic
        assert!(matches!(outcome, StepOutcome::Failed(_)));
        assert!(state.error.as_deref().unwrap().contains("input resolution"));
    }

    fn question_response() -> &'static str {
        r#"{"mode": "questions_only", "questions": [{"id": "q1", "text": "What currency?", "priority": "must", "answer_type": "string"}], "all_questions_end_with_qmark": true}"#
    }

    #[tokio::test]
    async fn test_clarification_suspends_first_attempt() {
        let executor = make_executor(ScriptedService::new([question_response()]));
        let mut state = StepState::new("write_brief", 3);

        let outcome = run(&executor, &mut state, true).await;
        let StepOutcome::NeedsClarification(questions) = outcome else {
            panic!("expected clarification");
        };
        assert_eq!(questions.len(), 1);
        assert_eq!(state.status, StepStatus::Clarifying);
    }

    #[tokio::test]
    async fn test_clarification_ignored_when_disallowed() {
        // the question-set JSON is treated as the output document and
        // QA-checked (it parses, and no schema is registered)
        let executor = make_executor(ScriptedService::new([question_response()]));
        let mut state = StepState::new("write_brief", 3);

        let outcome = run(&executor, &mut state, false).await;
        assert!(matches!(outcome, StepOutcome::Completed(_)));
    }

    #[tokio::test]
    async fn test_continue_after_clarification() {
        let executor = make_executor(ScriptedService::new([
            question_response(),
            r#"{"title": "Alpha", "currency": "EUR"}"#,
        ]));
        let workflow = make_workflow();
        let hierarchy = workflow.scope_hierarchy().unwrap();
        let context = WorkflowContext::new();
        let mut state = StepState::new("write_brief", 3);

        let outcome = executor
            .execute(
                &brief_step(),
                &hierarchy,
                &context,
                &mut state,
                None,
                &HashMap::new(),
                true,
            )
            .await
            .unwrap();
        assert!(matches!(outcome, StepOutcome::NeedsClarification(_)));

        let answers = HashMap::from([("q1".to_string(), "EUR".to_string())]);
        let outcome = executor
            .continue_after_clarification(
                &brief_step(),
                &hierarchy,
                &context,
                &mut state,
                None,
                &HashMap::new(),
                answers,
            )
            .await
            .unwrap();
        assert!(matches!(outcome, StepOutcome::Completed(_)));
        assert_eq!(
            state.clarification_answers.get("q1").map(String::as_str),
            Some("EUR")
        );
    }

    #[tokio::test]
    async fn test_schema_failure_remediates() {
        let mut qa = QaGate::new();
        qa.register_schema(
            "project_brief",
            &json!({"type": "object", "required": ["title"]}),
        )
        .unwrap();
        let prompts = Arc::new(
            crate::services::InMemoryPromptLoader::new()
                .with_role("planner", "You are a planner.")
                .with_task("Project Brief v1.0", "Write the project brief."),
        );
        let executor = StepExecutor::new(
            ScriptedService::new([r#"{"name": "wrong"}"#, r#"{"title": "Alpha"}"#]),
            prompts,
            Arc::new(qa),
        );
        let mut state = StepState::new("write_brief", 3);

        let outcome = run(&executor, &mut state, true).await;
        assert!(matches!(outcome, StepOutcome::Completed(_)));
        assert_eq!(state.attempt, 2);
    }
}
