//! Questionnaire responses.
//!
//! # Invariants
//! - One record holds the full answer set of one questionnaire completion.
//! - Identity fields (experiment, participant, questionnaire, session, task)
//!   never change after submission; only `answers` is replaced.

use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub id: String,
    pub experiment_id: String,
    pub participant_id: String,
    pub questionnaire_id: String,
    pub session_id: Option<String>,
    pub task_id: Option<String>,
    pub answers: Value,
    pub submitted_at: String,
    pub submitted_by: String,
    pub updated_at: String,
    pub updated_by: String,
}

/// Submission request; `id` is generated when absent.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmitResponse {
    pub id: Option<String>,
    pub experiment_id: String,
    pub participant_id: String,
    pub questionnaire_id: String,
    pub session_id: Option<String>,
    pub task_id: Option<String>,
    pub answers: Value,
}

impl SubmitResponse {
    pub fn new(
        experiment_id: impl Into<String>,
        participant_id: impl Into<String>,
        questionnaire_id: impl Into<String>,
        answers: Value,
    ) -> Self {
        Self {
            id: None,
            experiment_id: experiment_id.into(),
            participant_id: participant_id.into(),
            questionnaire_id: questionnaire_id.into(),
            session_id: None,
            task_id: None,
            answers,
        }
    }

    pub fn in_session(mut self, session_id: impl Into<String>, task_id: Option<&str>) -> Self {
        self.session_id = Some(session_id.into());
        self.task_id = task_id.map(str::to_string);
        self
    }
}
