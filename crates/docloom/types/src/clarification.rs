//! Clarification records: the "questions only" protocol payload
//!
//! When the generator needs human input instead of producing the
//! requested document, it must respond with a structured question set
//! and nothing else. These types model that payload; the content
//! policy checks live in the engine's clarification gate.

use serde::{Deserialize, Serialize};
use serde_json::Value;

fn default_true() -> bool {
    true
}

/// How badly an answer is needed
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuestionPriority {
    Must,
    Should,
    Could,
}

/// One clarification question
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClarificationQuestion {
    pub id: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub why_it_matters: Option<String>,
    pub priority: QuestionPriority,
    pub answer_type: String,
    #[serde(default = "default_true")]
    pub required: bool,
    #[serde(default = "default_true")]
    pub blocking: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub choices: Option<Vec<String>>,
    #[serde(default, rename = "default", skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
}

impl ClarificationQuestion {
    pub fn is_blocking(&self) -> bool {
        self.required && self.blocking
    }
}

/// A full question-set response, including the generator's
/// self-reported content counters
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QuestionSet {
    pub mode: String,
    pub questions: Vec<ClarificationQuestion>,
    #[serde(default)]
    pub non_question_line_count: u64,
    #[serde(default)]
    pub declarative_sentence_count: u64,
    #[serde(default)]
    pub answer_leadin_count: u64,
    #[serde(default)]
    pub all_questions_end_with_qmark: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_question_defaults() {
        let question: ClarificationQuestion = serde_json::from_value(json!({
            "id": "q1",
            "text": "Which currency should budgets use?",
            "priority": "must",
            "answer_type": "string"
        }))
        .unwrap();
        assert!(question.required);
        assert!(question.blocking);
        assert!(question.is_blocking());
        assert!(question.choices.is_none());
    }

    #[test]
    fn test_non_blocking_question() {
        let question: ClarificationQuestion = serde_json::from_value(json!({
            "id": "q2",
            "text": "Any preferred naming convention?",
            "priority": "could",
            "answer_type": "string",
            "required": false
        }))
        .unwrap();
        assert!(!question.is_blocking());
    }

    #[test]
    fn test_question_set_parses() {
        let set: QuestionSet = serde_json::from_value(json!({
            "mode": "questions_only",
            "questions": [{
                "id": "q1",
                "text": "What is the target launch date?",
                "priority": "must",
                "answer_type": "date"
            }],
            "non_question_line_count": 0,
            "declarative_sentence_count": 0,
            "answer_leadin_count": 0,
            "all_questions_end_with_qmark": true
        }))
        .unwrap();
        assert_eq!(set.mode, "questions_only");
        assert_eq!(set.questions.len(), 1);
        assert!(set.all_questions_end_with_qmark);
    }
}
