//! Remediation: bounded retry of structurally-bad generation output
//!
//! The remediation prompt is the sole channel feeding QA failures back
//! into generation. Assembly is deterministic text, no model involved.

use docloom_types::{QaResult, StepState};

/// Previous responses are truncated beyond this many characters when
/// echoed into a remediation prompt.
const MAX_ECHOED_RESPONSE: usize = 2000;

pub struct RemediationLoop;

impl RemediationLoop {
    /// Whether another attempt is warranted after a QA check
    pub fn should_retry(state: &StepState, qa_result: &QaResult) -> bool {
        if qa_result.passed {
            return false;
        }
        if state.attempt >= state.max_attempts {
            return false;
        }
        // pure-warning failures carry nothing actionable
        qa_result.has_errors()
    }

    /// Build the prompt for the next attempt
    pub fn build_remediation_prompt(
        task_prompt: &str,
        state: &StepState,
        qa_result: &QaResult,
    ) -> String {
        let mut prompt = String::new();
        prompt.push_str(task_prompt);
        prompt.push_str(&format!(
            "\n\nThis is attempt {} of {}. The previous response failed quality checks.\n",
            state.attempt + 1,
            state.max_attempts
        ));

        if let Some(previous) = &state.raw_llm_response {
            prompt.push_str("\nPrevious response:\n");
            if previous.chars().count() > MAX_ECHOED_RESPONSE {
                let truncated: String = previous.chars().take(MAX_ECHOED_RESPONSE).collect();
                prompt.push_str(&truncated);
                prompt.push_str("\n[truncated]\n");
            } else {
                prompt.push_str(previous);
                prompt.push('\n');
            }
        }

        prompt.push_str("\nQuality findings:\n");
        for finding in &qa_result.findings {
            prompt.push_str(&format!(
                "- [{}] {}: {} (rule: {})\n",
                if finding.is_error() { "ERROR" } else { "WARNING" },
                finding.path,
                finding.message,
                finding.rule
            ));
        }

        prompt.push_str(
            "\nRegenerate the complete document, resolving every ERROR item above. \
             Respond with the corrected JSON document only.",
        );
        prompt
    }
}
