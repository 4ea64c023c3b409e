//! Step executor
//!
//! Runs one inbound message through the state machine: feeds events to the
//! pure transition function and carries out the effects it returns, until
//! the session settles in a resting phase.

use crate::language::Language;
use crate::questionnaire::Questionnaire;
use crate::router::IntentRouter;
use crate::session::{Session, SessionError};
use crate::state_machine::{transition, Effect, Event, Phase, StepContext, TransitionError, Utterance};
use chrono::Utc;
use std::collections::VecDeque;
use thiserror::Error;

/// Upper bound on events processed for one message
const MAX_EVENTS_PER_STEP: usize = 16;

#[derive(Debug, Error)]
pub enum StepError {
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("Question {0} does not exist")]
    UnknownQuestion(u32),
    #[error("Step did not settle after {0} events")]
    Runaway(usize),
    #[error("Step stopped in non-resting phase {0}")]
    Stalled(Phase),
}

#[derive(Debug)]
pub struct StepOutcome {
    pub session: Session,
    pub reply: String,
}

pub struct StepExecutor<'a> {
    router: &'a IntentRouter,
    questionnaire: &'a Questionnaire,
    ctx: StepContext,
    language: Language,
    summary_max_turns: usize,
}

impl<'a> StepExecutor<'a> {
    pub fn new(
        router: &'a IntentRouter,
        questionnaire: &'a Questionnaire,
        ctx: StepContext,
        language: Language,
        summary_max_turns: usize,
    ) -> Self {
        Self {
            router,
            questionnaire,
            ctx,
            language,
            summary_max_turns,
        }
    }

    /// Process `text` against `session`, returning the updated session and
    /// the reply. The input session is untouched on error.
    pub async fn run(&self, session: &Session, text: &str) -> Result<StepOutcome, StepError> {
        let mut session = session.clone();
        let mut replies: Vec<String> = Vec::new();
        let mut events = VecDeque::from([Event::UserMessage {
            text: text.to_string(),
        }]);
        let mut processed = 0;

        while let Some(event) = events.pop_front() {
            processed += 1;
            if processed > MAX_EVENTS_PER_STEP {
                return Err(StepError::Runaway(MAX_EVENTS_PER_STEP));
            }

            let event_name = event.name();
            let result = transition(&session, &self.ctx, event)?;
            tracing::debug!(
                user_id = %session.user_id,
                event = event_name,
                from = %session.phase,
                to = %result.new_phase,
                "Transition"
            );
            session.phase = result.new_phase;

            for effect in result.effects {
                if let Some(next) = self.execute(&mut session, effect, &mut replies).await? {
                    events.push_back(next);
                }
            }
        }

        if !session.phase.is_resting() {
            return Err(StepError::Stalled(session.phase));
        }

        let reply = replies.join("\n\n");
        session
            .dialogue_summary
            .push_turn(text, &reply, self.summary_max_turns);
        Ok(StepOutcome { session, reply })
    }

    async fn execute(
        &self,
        session: &mut Session,
        effect: Effect,
        replies: &mut Vec<String>,
    ) -> Result<Option<Event>, StepError> {
        let language = self.language;
        match effect {
            Effect::Say(Utterance::Welcome) => {
                replies.push(self.questionnaire.welcome(language, session.context.as_ref()));
                Ok(None)
            }
            Effect::Say(utterance) => {
                replies.push(self.questionnaire.utterance(language, utterance).to_string());
                Ok(None)
            }
            Effect::SayText(text) => {
                replies.push(text);
                Ok(None)
            }
            Effect::AskQuestion { index, style } => {
                let question = self
                    .questionnaire
                    .render_question(language, index, style)
                    .ok_or(StepError::UnknownQuestion(index))?;
                replies.push(question);
                Ok(Some(Event::QuestionAsked { index }))
            }
            Effect::ClassifyIntent { text } => {
                let summary = session.dialogue_summary.render();
                match self.router.classify(language, &summary, &text).await {
                    Ok(classification) => {
                        tracing::info!(
                            user_id = %session.user_id,
                            intent = ?classification.intent,
                            confidence = classification.confidence,
                            "Message classified"
                        );
                        Ok(Some(Event::IntentClassified {
                            text,
                            classification,
                        }))
                    }
                    Err(e) => {
                        tracing::warn!(user_id = %session.user_id, error = %e, "Intent classification failed");
                        Ok(Some(Event::ClassificationFailed {
                            text,
                            reason: e.to_string(),
                        }))
                    }
                }
            }
            Effect::AnswerAside { text } => match self.router.answer_aside(language, &text).await {
                Ok(answer) => Ok(Some(Event::AsideAnswered { answer })),
                Err(e) => {
                    tracing::warn!(user_id = %session.user_id, error = %e, "Aside retrieval failed");
                    Ok(Some(Event::RetrievalFailed {
                        reason: e.to_string(),
                    }))
                }
            },
            Effect::RecordAnswer { index, text } => {
                session.record_answer(index, text, Utc::now())?;
                Ok(Some(Event::AnswerRecorded { index }))
            }
            Effect::MarkPending { index } => {
                session.pending_question_index = Some(index);
                Ok(None)
            }
            Effect::ClearPending => {
                session.pending_question_index = None;
                Ok(None)
            }
            Effect::Finalize => {
                session.completed = true;
                tracing::info!(
                    user_id = %session.user_id,
                    answers = session.answers.len(),
                    "Questionnaire completed"
                );
                Ok(None)
            }
        }
    }
}
