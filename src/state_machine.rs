//! Questionnaire state machine
//!
//! Elm-style: a pure transition function maps (session, event) to a new
//! phase plus effects, and the runtime executor performs the effects.

mod effect;
pub mod event;
pub mod state;
pub(crate) mod transition;

#[cfg(test)]
mod proptests;

pub use effect::{Effect, Utterance};
pub use event::Event;
pub use state::{AsideMode, Phase, QuestionStyle, StepContext};
pub use transition::{transition, TransitionError};
