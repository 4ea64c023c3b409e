//! Effects produced by state transitions

use super::state::QuestionStyle;

/// Localized canned replies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Utterance {
    Welcome,
    Reprompt,
    NoInformation,
    RetrievalUnavailable,
    Closing,
    ClosingAck,
}

/// Effects the step executor carries out
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Append a canned reply
    Say(Utterance),

    /// Append verbatim text, e.g. a knowledge-base answer
    SayText(String),

    /// Render question `index` into the reply; yields `QuestionAsked`
    AskQuestion { index: u32, style: QuestionStyle },

    /// Yields `IntentClassified` or `ClassificationFailed`
    ClassifyIntent { text: String },

    /// Yields `AsideAnswered` or `RetrievalFailed`
    AnswerAside { text: String },

    /// Yields `AnswerRecorded`
    RecordAnswer { index: u32, text: String },

    MarkPending { index: u32 },

    ClearPending,

    /// Mark the session complete
    Finalize,
}

impl Effect {
    pub fn say(utterance: Utterance) -> Self {
        Effect::Say(utterance)
    }

    pub fn ask(index: u32) -> Self {
        Effect::AskQuestion {
            index,
            style: QuestionStyle::Full,
        }
    }

    pub fn ask_styled(index: u32, style: QuestionStyle) -> Self {
        Effect::AskQuestion { index, style }
    }

    pub fn record_answer(index: u32, text: impl Into<String>) -> Self {
        Effect::RecordAnswer {
            index,
            text: text.into(),
        }
    }
}
