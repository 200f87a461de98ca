use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use time::OffsetDateTime;

/// Event name pushed when a chapter's progress changes server-side.
pub const EVENT_PROGRESS_UPDATED: &str = "progress_updated";
/// Event name pushed when a quiz has been graded.
pub const EVENT_QUIZ_COMPLETED: &str = "quiz_completed";

/// Raw `{event, data}` envelope pushed on the realtime channel.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Envelope {
    /// Event name.
    pub event: String,
    /// Event payload, decoded according to `event`.
    #[serde(default)]
    pub data: Value,
}

/// Payload of a `progress_updated` push.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ProgressUpdatedEvent {
    /// User the update belongs to.
    #[serde(alias = "userId")]
    pub user_id: u64,
    /// Topic of the chapter.
    #[serde(alias = "topicId")]
    pub topic_id: String,
    /// Chapter whose progress changed.
    #[serde(alias = "chapterId")]
    pub chapter_id: String,
    /// Whether the chapter is now completed.
    #[serde(default)]
    pub completed: bool,
    /// When the change happened.
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

/// Payload of a `quiz_completed` push.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct QuizCompletedEvent {
    /// User who took the quiz.
    #[serde(alias = "userId")]
    pub user_id: u64,
    /// Graded quiz.
    #[serde(alias = "quizId")]
    pub quiz_id: u64,
    /// Score obtained.
    pub score: i64,
    /// Questions in the quiz.
    #[serde(alias = "totalQuestions")]
    pub total_questions: u32,
    /// Whether the quiz was passed.
    #[serde(default)]
    pub passed: bool,
    /// When grading finished.
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

/// A decoded realtime push.
#[derive(Debug, Clone, PartialEq)]
pub enum PushMessage {
    /// A chapter's progress changed.
    ProgressUpdated(ProgressUpdatedEvent),
    /// A quiz was graded.
    QuizCompleted(QuizCompletedEvent),
    /// Envelope was well formed but the event name is not one we handle.
    Unknown(String),
}

/// Why a realtime frame could not be decoded.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Frame is not a `{event, data}` object.
    #[error("frame is not a valid envelope")]
    Envelope(#[source] serde_json::Error),
    /// Envelope is valid but `data` does not match `event`.
    #[error("invalid `{event}` payload")]
    Payload {
        /// Event name of the rejected payload.
        event: String,
        /// Underlying decode failure.
        #[source]
        source: serde_json::Error,
    },
}

impl PushMessage {
    /// Parse a text frame into a typed push message.
    pub fn from_json_str(text: &str) -> Result<Self, DecodeError> {
        let envelope: Envelope = serde_json::from_str(text).map_err(DecodeError::Envelope)?;
        let payload_error = |source| DecodeError::Payload {
            event: envelope.event.clone(),
            source,
        };
        match envelope.event.as_str() {
            EVENT_PROGRESS_UPDATED => serde_json::from_value(envelope.data.clone())
                .map(Self::ProgressUpdated)
                .map_err(payload_error),
            EVENT_QUIZ_COMPLETED => serde_json::from_value(envelope.data.clone())
                .map(Self::QuizCompleted)
                .map_err(payload_error),
            _ => Ok(Self::Unknown(envelope.event.clone())),
        }
    }
}
