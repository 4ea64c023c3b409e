//! Pure state transition function
//!
//! Given the same session, context and event this always produces the same
//! phase and effects. All I/O happens in the executor that interprets the
//! effects.

use super::effect::Utterance;
use super::{Effect, Event, Phase, StepContext};
use crate::router::{AsideAnswer, Intent};
use crate::session::Session;
use thiserror::Error;

/// Result of a state transition
#[derive(Debug)]
pub struct TransitionResult {
    pub new_phase: Phase,
    pub effects: Vec<Effect>,
}

impl TransitionResult {
    pub fn new(phase: Phase) -> Self {
        Self {
            new_phase: phase,
            effects: vec![],
        }
    }

    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }

    pub fn with_effects(mut self, effects: impl IntoIterator<Item = Effect>) -> Self {
        self.effects.extend(effects);
        self
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),
}

pub fn transition(
    session: &Session,
    ctx: &StepContext,
    event: Event,
) -> Result<TransitionResult, TransitionError> {
    match (&session.phase, event) {
        // The opener is greeted, never classified
        (Phase::NotStarted, Event::UserMessage { .. }) => {
            Ok(TransitionResult::new(Phase::AskQuestion { index: 1 })
                .with_effect(Effect::say(Utterance::Welcome))
                .with_effect(Effect::ask(1)))
        }

        (Phase::AskQuestion { index }, Event::QuestionAsked { index: asked }) if *index == asked => {
            Ok(TransitionResult::new(Phase::AwaitAnswer { index: asked }))
        }

        (Phase::AwaitAnswer { index }, Event::UserMessage { text }) => {
            if text.trim().is_empty() {
                Ok(reprompt(*index))
            } else {
                Ok(TransitionResult::new(Phase::CheckIntent { index: *index })
                    .with_effect(Effect::ClassifyIntent { text }))
            }
        }

        (
            Phase::CheckIntent { index },
            Event::IntentClassified {
                text,
                classification,
            },
        ) => match classification.intent {
            Intent::Answer => Ok(accept(*index, &text)),
            Intent::Aside => Ok(TransitionResult::new(Phase::AnswerAside { index: *index })
                .with_effect(Effect::MarkPending { index: *index })
                .with_effect(Effect::AnswerAside { text })),
        },

        // Conservative fallback: a plausible answer is kept, anything else re-asks
        (Phase::CheckIntent { index }, Event::ClassificationFailed { text, .. }) => {
            if ctx.is_acceptable_answer(&text) {
                Ok(accept(*index, &text))
            } else {
                Ok(reprompt(*index))
            }
        }

        (Phase::AnswerAside { index }, Event::AsideAnswered { answer }) => {
            let reply = match answer {
                AsideAnswer::Found(text) => Effect::SayText(text),
                AsideAnswer::NoInformation => Effect::say(Utterance::NoInformation),
            };
            Ok(resume(session, ctx, *index, reply))
        }

        (Phase::AnswerAside { index }, Event::RetrievalFailed { .. }) => Ok(resume(
            session,
            ctx,
            *index,
            Effect::say(Utterance::RetrievalUnavailable),
        )),

        (Phase::Advance { index }, Event::AnswerRecorded { index: recorded })
            if *index == recorded =>
        {
            if recorded >= ctx.total_questions {
                Ok(TransitionResult::new(Phase::Complete)
                    .with_effects([Effect::Finalize, Effect::say(Utterance::Closing)]))
            } else {
                let next = recorded + 1;
                Ok(TransitionResult::new(Phase::AskQuestion { index: next })
                    .with_effect(Effect::ask(next)))
            }
        }

        (Phase::Complete, Event::UserMessage { .. }) => {
            Ok(TransitionResult::new(Phase::Complete).with_effect(Effect::say(Utterance::ClosingAck)))
        }

        (phase, event) => Err(TransitionError::InvalidTransition(format!(
            "{phase} cannot handle {}",
            event.name()
        ))),
    }
}

fn accept(index: u32, text: &str) -> TransitionResult {
    TransitionResult::new(Phase::Advance { index }).with_effects([
        Effect::record_answer(index, text.trim()),
        Effect::ClearPending,
    ])
}

fn reprompt(index: u32) -> TransitionResult {
    TransitionResult::new(Phase::AskQuestion { index })
        .with_effect(Effect::say(Utterance::Reprompt))
        .with_effect(Effect::ask(index))
}

/// Go back to the interrupted question after an aside
fn resume(session: &Session, ctx: &StepContext, index: u32, reply: Effect) -> TransitionResult {
    let target = session.pending_question_index.unwrap_or(index);
    TransitionResult::new(Phase::AskQuestion { index: target })
        .with_effect(reply)
        .with_effect(Effect::ask_styled(target, ctx.aside_mode.into()))
}
