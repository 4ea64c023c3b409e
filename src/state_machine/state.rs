//! Questionnaire phase types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Phase of a questionnaire session
///
/// Only `NotStarted`, `AwaitAnswer` and `Complete` are resting phases; the
/// others exist only while a step is being processed and are never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Phase {
    /// No message received yet
    #[default]
    NotStarted,

    /// Question `index` is about to be sent
    AskQuestion { index: u32 },

    /// Question `index` was sent and its answer is awaited
    AwaitAnswer { index: u32 },

    /// Deciding whether a message answers question `index`
    CheckIntent { index: u32 },

    /// Answering a side question raised while question `index` was open
    AnswerAside { index: u32 },

    /// The answer to question `index` is being recorded
    Advance { index: u32 },

    /// All questions answered
    Complete,
}

impl Phase {
    pub fn is_resting(&self) -> bool {
        matches!(
            self,
            Phase::NotStarted | Phase::AwaitAnswer { .. } | Phase::Complete
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            Phase::NotStarted => "not_started",
            Phase::AskQuestion { .. } => "ask_question",
            Phase::AwaitAnswer { .. } => "await_answer",
            Phase::CheckIntent { .. } => "check_intent",
            Phase::AnswerAside { .. } => "answer_aside",
            Phase::Advance { .. } => "advance",
            Phase::Complete => "complete",
        }
    }

    /// Question index carried by the phase, if any
    pub fn question(&self) -> Option<u32> {
        match self {
            Phase::AskQuestion { index }
            | Phase::AwaitAnswer { index }
            | Phase::CheckIntent { index }
            | Phase::AnswerAside { index }
            | Phase::Advance { index } => Some(*index),
            Phase::NotStarted | Phase::Complete => None,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.question() {
            Some(index) => write!(f, "{}({index})", self.name()),
            None => f.write_str(self.name()),
        }
    }
}

/// How the interrupted question is brought back after an aside
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AsideMode {
    /// Repeat the full question text
    #[default]
    Reask,
    /// Short reminder naming the question number
    Resume,
}

/// How a question is rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuestionStyle {
    Full,
    Reminder,
}

impl From<AsideMode> for QuestionStyle {
    fn from(mode: AsideMode) -> Self {
        match mode {
            AsideMode::Reask => QuestionStyle::Full,
            AsideMode::Resume => QuestionStyle::Reminder,
        }
    }
}

/// Immutable settings a transition depends on
#[derive(Debug, Clone, Copy)]
pub struct StepContext {
    pub total_questions: u32,
    pub max_answer_chars: usize,
    pub aside_mode: AsideMode,
}

impl StepContext {
    pub fn new(total_questions: u32, max_answer_chars: usize, aside_mode: AsideMode) -> Self {
        Self {
            total_questions,
            max_answer_chars,
            aside_mode,
        }
    }

    /// Whether `text` may be accepted as an answer without classification
    pub fn is_acceptable_answer(&self, text: &str) -> bool {
        let trimmed = text.trim();
        !trimmed.is_empty() && trimmed.chars().count() <= self.max_answer_chars
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_serialization_is_tagged() {
        let json = serde_json::to_string(&Phase::AwaitAnswer { index: 3 }).unwrap();
        assert_eq!(json, r#"{"type":"await_answer","index":3}"#);
        let back: Phase = serde_json::from_str(r#"{"type":"complete"}"#).unwrap();
        assert_eq!(back, Phase::Complete);
    }

    #[test]
    fn test_resting_phases() {
        assert!(Phase::NotStarted.is_resting());
        assert!(Phase::AwaitAnswer { index: 1 }.is_resting());
        assert!(Phase::Complete.is_resting());
        assert!(!Phase::CheckIntent { index: 1 }.is_resting());
        assert!(!Phase::AnswerAside { index: 1 }.is_resting());
    }

    #[test]
    fn test_acceptable_answer() {
        let ctx = StepContext::new(8, 5, AsideMode::Reask);
        assert!(ctx.is_acceptable_answer(" oui "));
        assert!(!ctx.is_acceptable_answer("   "));
        assert!(!ctx.is_acceptable_answer("beaucoup trop long"));
    }
}
