//! Clarification gate: the "questions only" protocol
//!
//! When the generator needs human input it must respond with a
//! structured question set and nothing else. The gate distinguishes
//! "didn't need to ask" (no marker present) from "tried to ask but the
//! format is broken" (marker present, extraction or schema failure) —
//! the latter still suspends the step, carrying the violations.

use crate::json_extract::extract_json;
use docloom_types::{ClarificationQuestion, QuestionSet};
use serde_json::json;
use std::sync::OnceLock;

/// Literal substrings that mark a question-set response. The scan is a
/// cheap pre-filter so ordinary document responses skip JSON work.
const QUESTION_MARKERS: &[&str] = &["questions_only", "\"questions\""];

/// Outcome of checking one raw response for clarification
#[derive(Clone, Debug, PartialEq)]
pub struct ClarificationCheck {
    pub needs_clarification: bool,
    pub questions: Vec<ClarificationQuestion>,
    /// Schema or policy violations; present when the response attempted
    /// the protocol but got it wrong
    pub validation_errors: Vec<String>,
}

impl ClarificationCheck {
    fn not_needed() -> Self {
        Self {
            needs_clarification: false,
            questions: Vec::new(),
            validation_errors: Vec::new(),
        }
    }

    fn broken(errors: Vec<String>) -> Self {
        Self {
            needs_clarification: true,
            questions: Vec::new(),
            validation_errors: errors,
        }
    }
}

fn question_set_validator() -> &'static jsonschema::Validator {
    static VALIDATOR: OnceLock<jsonschema::Validator> = OnceLock::new();
    VALIDATOR.get_or_init(|| {
        let schema = json!({
            "type": "object",
            "required": ["mode", "questions"],
            "properties": {
                "mode": { "type": "string" },
                "questions": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "required": ["id", "text", "priority", "answer_type"],
                        "properties": {
                            "id": { "type": "string" },
                            "text": { "type": "string" },
                            "why_it_matters": { "type": "string" },
                            "priority": { "enum": ["must", "should", "could"] },
                            "answer_type": { "type": "string" },
                            "required": { "type": "boolean" },
                            "blocking": { "type": "boolean" },
                            "choices": { "type": "array", "items": { "type": "string" } }
                        }
                    }
                },
                "non_question_line_count": { "type": "integer" },
                "declarative_sentence_count": { "type": "integer" },
                "answer_leadin_count": { "type": "integer" },
                "all_questions_end_with_qmark": { "type": "boolean" }
            }
        });
        // The schema is a checked constant.
        jsonschema::validator_for(&schema).expect("valid question set schema")
    })
}

pub struct ClarificationGate;

impl ClarificationGate {
    /// Check whether a raw response is a clarification request
    pub fn check(raw_response: &str) -> ClarificationCheck {
        if !QUESTION_MARKERS
            .iter()
            .any(|marker| raw_response.contains(marker))
        {
            return ClarificationCheck::not_needed();
        }

        let Some(value) = extract_json(raw_response) else {
            return ClarificationCheck::broken(vec![
                "response signals a question set but contains no extractable JSON object"
                    .to_string(),
            ]);
        };

        let schema_errors: Vec<String> = question_set_validator()
            .iter_errors(&value)
            .map(|error| format!("{} at {}", error, error.instance_path))
            .collect();
        if !schema_errors.is_empty() {
            return ClarificationCheck::broken(schema_errors);
        }

        match serde_json::from_value::<QuestionSet>(value) {
            Ok(set) => {
                let violations = Self::validate_questions_only(&set);
                ClarificationCheck {
                    needs_clarification: true,
                    questions: set.questions,
                    validation_errors: violations,
                }
            }
            Err(err) => ClarificationCheck::broken(vec![format!(
                "question set does not parse: {}",
                err
            )]),
        }
    }

    /// Content-policy checks independent of the schema. Violations are
    /// collected and returned, never raised.
    pub fn validate_questions_only(set: &QuestionSet) -> Vec<String> {
        let mut violations = Vec::new();
        if set.mode != "questions_only" {
            violations.push(format!(
                "mode must be 'questions_only', got '{}'",
                set.mode
            ));
        }
        if set.non_question_line_count != 0 {
            violations.push(format!(
                "response contains {} non-question line(s)",
                set.non_question_line_count
            ));
        }
        if set.declarative_sentence_count != 0 {
            violations.push(format!(
                "response contains {} declarative sentence(s)",
                set.declarative_sentence_count
            ));
        }
        if set.answer_leadin_count != 0 {
            violations.push(format!(
                "response contains {} answer lead-in(s)",
                set.answer_leadin_count
            ));
        }
        if !set.all_questions_end_with_qmark {
            violations.push("all_questions_end_with_qmark must be true".to_string());
        }
        for question in &set.questions {
            if !question.text.trim_end().ends_with('?') {
                violations.push(format!(
                    "question '{}' does not end with a question mark",
                    question.id
                ));
            }
        }
        violations
    }

    /// Questions that must be answered before the step may continue
    pub fn get_blocking_questions(
        questions: &[ClarificationQuestion],
    ) -> Vec<&ClarificationQuestion> {
        questions.iter().filter(|q| q.is_blocking()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn question_set_response() -> String {
        json!({
            "mode": "questions_only",
            "questions": [
                {
                    "id": "q1",
                    "text": "What currency should budgets use?",
                    "priority": "must",
                    "answer_type": "string"
                },
                {
                    "id": "q2",
                    "text": "Any preferred naming convention?",
                    "priority": "could",
                    "answer_type": "string",
                    "required": false
                }
            ],
            "non_question_line_count": 0,
            "declarative_sentence_count": 0,
            "answer_leadin_count": 0,
            "all_questions_end_with_qmark": true
        })
        .to_string()
    }

    #[test]
    fn test_plain_document_needs_no_clarification() {
        let check = ClarificationGate::check(r#"{"title": "Alpha", "sections": []}"#);
        assert!(!check.needs_clarification);
        assert!(check.questions.is_empty());
    }

    #[test]
    fn test_valid_question_set() {
        let check = ClarificationGate::check(&question_set_response());
        assert!(check.needs_clarification);
        assert_eq!(check.questions.len(), 2);
        assert!(check.validation_errors.is_empty());
    }

    #[test]
    fn test_fenced_question_set() {
        let raw = format!("```json\n{}\n```", question_set_response());
        let check = ClarificationGate::check(&raw);
        assert!(check.needs_clarification);
        assert_eq!(check.questions.len(), 2);
    }

    #[test]
    fn test_marker_without_json_is_broken_protocol() {
        let check = ClarificationGate::check("I will respond in questions_only mode shortly.");
        assert!(check.needs_clarification);
        assert!(check.questions.is_empty());
        assert!(!check.validation_errors.is_empty());
    }

    #[test]
    fn test_schema_failure_keeps_needs_clarification() {
        let raw = json!({
            "mode": "questions_only",
            "questions": [{ "id": "q1" }]
        })
        .to_string();
        let check = ClarificationGate::check(&raw);
        assert!(check.needs_clarification);
        assert!(check.questions.is_empty());
        assert!(!check.validation_errors.is_empty());
    }

    #[test]
    fn test_policy_declarative_sentences() {
        let set: QuestionSet = serde_json::from_str(&question_set_response()).unwrap();
        let mut set = set;
        set.declarative_sentence_count = 2;
        let violations = ClarificationGate::validate_questions_only(&set);
        assert_eq!(violations.len(), 1);
        assert!(violations[0].contains("declarative"));
    }

    #[test]
    fn test_policy_question_text_must_end_with_qmark() {
        let mut set: QuestionSet = serde_json::from_str(&question_set_response()).unwrap();
        set.questions[0].text = "Tell me the currency.".to_string();
        let violations = ClarificationGate::validate_questions_only(&set);
        assert!(violations.iter().any(|v| v.contains("question mark")));
    }

    #[test]
    fn test_policy_wrong_mode() {
        let mut set: QuestionSet = serde_json::from_str(&question_set_response()).unwrap();
        set.mode = "mixed".to_string();
        let violations = ClarificationGate::validate_questions_only(&set);
        assert!(violations.iter().any(|v| v.contains("questions_only")));
    }

    #[test]
    fn test_blocking_filter() {
        let check = ClarificationGate::check(&question_set_response());
        let blocking = ClarificationGate::get_blocking_questions(&check.questions);
        assert_eq!(blocking.len(), 1);
        assert_eq!(blocking[0].id, "q1");
    }
}
