use serde::{Deserialize, Serialize};

/// Answers given to a single question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizAnswer {
    /// Question being answered.
    pub question_id: u64,
    /// Selected choices.
    pub user_answers: Vec<String>,
}

/// Body posted to the quiz submission endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizSubmitPayload {
    /// Server-issued quiz session.
    pub session_id: String,
    /// Topic of the quiz.
    pub topic: String,
    /// Chapter of the quiz.
    pub chapter: String,
    /// Time spent answering.
    pub duration_ms: u64,
    /// One entry per answered question.
    pub answers: Vec<QuizAnswer>,
}

/// Per-question grading detail.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct QuizAnswerDetail {
    /// Graded question.
    pub question_id: u64,
    /// Whether the answer was right.
    pub is_correct: bool,
    /// Expected choices.
    pub correct_answers: Vec<String>,
    /// Explanation shown after grading.
    pub explanation: String,
}

/// Graded result of a quiz submission.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct QuizSubmitResult {
    /// Score out of 100.
    pub score: u32,
    /// Questions in the quiz.
    pub total_questions: u32,
    /// Questions answered correctly.
    pub correct_answers: u32,
    /// Whether the score reached the pass mark.
    pub passed: bool,
    /// Per-question grading.
    pub details: Vec<QuizAnswerDetail>,
}
