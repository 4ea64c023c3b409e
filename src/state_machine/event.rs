//! Events that drive the questionnaire state machine

use crate::router::{AsideAnswer, Classification};

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Inbound user text
    UserMessage { text: String },

    /// A question was rendered into the reply
    QuestionAsked { index: u32 },

    IntentClassified {
        text: String,
        classification: Classification,
    },

    /// Classifier errored or timed out
    ClassificationFailed { text: String, reason: String },

    /// The answer to question `index` was appended to the session
    AnswerRecorded { index: u32 },

    AsideAnswered { answer: AsideAnswer },

    /// Retrieval errored or timed out
    RetrievalFailed { reason: String },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::UserMessage { .. } => "user_message",
            Event::QuestionAsked { .. } => "question_asked",
            Event::IntentClassified { .. } => "intent_classified",
            Event::ClassificationFailed { .. } => "classification_failed",
            Event::AnswerRecorded { .. } => "answer_recorded",
            Event::AsideAnswered { .. } => "aside_answered",
            Event::RetrievalFailed { .. } => "retrieval_failed",
        }
    }
}
