//! Property-based tests for the state machine
//!
//! These tests verify key invariants hold across all possible inputs.

use super::*;
use crate::router::{AsideAnswer, Classification, Intent};
use crate::session::Session;
use chrono::Utc;
use proptest::prelude::*;
use std::collections::VecDeque;

const TOTAL: u32 = 5;

// ============================================================================
// Test Helpers
// ============================================================================

fn test_context() -> StepContext {
    StepContext::new(TOTAL, 200, AsideMode::Reask)
}

fn new_session() -> Session {
    Session::new("prop-user", Utc::now(), chrono::Duration::hours(1))
}

/// Session waiting on question `index` with every earlier question answered
fn session_awaiting(index: u32) -> Session {
    let mut session = new_session();
    for i in 1..index {
        session.record_answer(i, format!("answer {i}"), Utc::now()).unwrap();
    }
    session.phase = Phase::AwaitAnswer { index };
    session
}

/// What the outside world says while a message is processed
#[derive(Debug, Clone)]
enum Oracle {
    Answer,
    Aside(Option<String>),
    ClassifierDown,
    RetrievalDown,
}

/// Synchronous stand-in for the executor: runs one message to rest
fn drive(
    session: &mut Session,
    ctx: &StepContext,
    text: &str,
    oracle: &Oracle,
) -> Result<Vec<Effect>, TransitionError> {
    let mut all_effects = Vec::new();
    let mut events = VecDeque::from([Event::UserMessage {
        text: text.to_string(),
    }]);

    while let Some(event) = events.pop_front() {
        let result = transition(session, ctx, event)?;
        session.phase = result.new_phase;
        for effect in result.effects {
            let next = match &effect {
                Effect::AskQuestion { index, .. } => Some(Event::QuestionAsked { index: *index }),
                Effect::ClassifyIntent { text } => Some(match oracle {
                    Oracle::Answer => Event::IntentClassified {
                        text: text.clone(),
                        classification: Classification::new(Intent::Answer, 0.9),
                    },
                    Oracle::Aside(_) | Oracle::RetrievalDown => Event::IntentClassified {
                        text: text.clone(),
                        classification: Classification::new(Intent::Aside, 0.9),
                    },
                    Oracle::ClassifierDown => Event::ClassificationFailed {
                        text: text.clone(),
                        reason: "offline".into(),
                    },
                }),
                Effect::AnswerAside { .. } => Some(match oracle {
                    Oracle::Aside(Some(found)) => Event::AsideAnswered {
                        answer: AsideAnswer::Found(found.clone()),
                    },
                    Oracle::RetrievalDown => Event::RetrievalFailed {
                        reason: "offline".into(),
                    },
                    _ => Event::AsideAnswered {
                        answer: AsideAnswer::NoInformation,
                    },
                }),
                Effect::RecordAnswer { index, text } => {
                    session
                        .record_answer(*index, text.clone(), Utc::now())
                        .expect("answers are recorded in order");
                    Some(Event::AnswerRecorded { index: *index })
                }
                Effect::MarkPending { index } => {
                    session.pending_question_index = Some(*index);
                    None
                }
                Effect::ClearPending => {
                    session.pending_question_index = None;
                    None
                }
                Effect::Finalize => {
                    session.completed = true;
                    None
                }
                Effect::Say(_) | Effect::SayText(_) => None,
            };
            all_effects.push(effect);
            if let Some(next) = next {
                events.push_back(next);
            }
        }
    }
    Ok(all_effects)
}

fn is_consistent(session: &Session) -> bool {
    let indexes_in_order = session
        .answers
        .iter()
        .zip(1u32..)
        .all(|(answer, expected)| answer.question_index == expected);
    let count_matches = usize::try_from(session.question_index) == Ok(session.answers.len());

    let phase_matches = match session.phase {
        Phase::NotStarted => session.question_index == 0 && !session.completed,
        Phase::AwaitAnswer { index } => {
            index == session.question_index + 1 && index <= TOTAL && !session.completed
        }
        Phase::Complete => session.completed && session.question_index == TOTAL,
        _ => false,
    };
    let pending_matches = session
        .pending_question_index
        .is_none_or(|pending| pending == session.question_index + 1);

    indexes_in_order && count_matches && phase_matches && pending_matches
}

// ============================================================================
// Arbitrary Generators
// ============================================================================

fn arb_index() -> impl Strategy<Value = u32> {
    1u32..=TOTAL
}

fn arb_phase() -> impl Strategy<Value = Phase> {
    prop_oneof![
        Just(Phase::NotStarted),
        arb_index().prop_map(|index| Phase::AskQuestion { index }),
        arb_index().prop_map(|index| Phase::AwaitAnswer { index }),
        arb_index().prop_map(|index| Phase::CheckIntent { index }),
        arb_index().prop_map(|index| Phase::AnswerAside { index }),
        arb_index().prop_map(|index| Phase::Advance { index }),
        Just(Phase::Complete),
    ]
}

fn arb_text() -> impl Strategy<Value = String> {
    prop_oneof![
        "[ \t]{0,3}",
        "[a-zA-Z0-9 ]{1,40}",
        "[a-z ]{1,20}\\?",
    ]
}

fn arb_classification() -> impl Strategy<Value = Classification> {
    (prop_oneof![Just(Intent::Answer), Just(Intent::Aside)], 0.0f32..=1.0)
        .prop_map(|(intent, confidence)| Classification::new(intent, confidence))
}

fn arb_aside_answer() -> impl Strategy<Value = AsideAnswer> {
    prop_oneof![
        "[a-zA-Z ]{1,30}".prop_map(AsideAnswer::Found),
        Just(AsideAnswer::NoInformation),
    ]
}

fn arb_event() -> impl Strategy<Value = Event> {
    prop_oneof![
        arb_text().prop_map(|text| Event::UserMessage { text }),
        arb_index().prop_map(|index| Event::QuestionAsked { index }),
        (arb_text(), arb_classification()).prop_map(|(text, classification)| {
            Event::IntentClassified {
                text,
                classification,
            }
        }),
        arb_text().prop_map(|text| Event::ClassificationFailed {
            text,
            reason: "timeout".into(),
        }),
        arb_index().prop_map(|index| Event::AnswerRecorded { index }),
        arb_aside_answer().prop_map(|answer| Event::AsideAnswered { answer }),
        Just(Event::RetrievalFailed {
            reason: "timeout".into(),
        }),
    ]
}

fn arb_oracle() -> impl Strategy<Value = Oracle> {
    prop_oneof![
        3 => Just(Oracle::Answer),
        1 => proptest::option::of("[a-zA-Z ]{1,20}").prop_map(Oracle::Aside),
        1 => Just(Oracle::ClassifierDown),
        1 => Just(Oracle::RetrievalDown),
    ]
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    /// Any sequence of messages leaves the session in a consistent resting phase
    #[test]
    fn prop_sessions_stay_consistent(
        steps in proptest::collection::vec((arb_text(), arb_oracle()), 0..40)
    ) {
        let ctx = test_context();
        let mut session = new_session();

        for (text, oracle) in &steps {
            let before = session.question_index;
            let result = drive(&mut session, &ctx, text, oracle);
            prop_assert!(result.is_ok(), "{:?}", result);
            prop_assert!(session.phase.is_resting());
            prop_assert!(is_consistent(&session), "inconsistent session: {:?}", session);
            // One message records at most one answer
            prop_assert!(session.question_index == before || session.question_index == before + 1);
        }
    }

    /// Asides never move the questionnaire forward or backward
    #[test]
    fn prop_asides_preserve_position(
        index in arb_index(),
        asides in proptest::collection::vec(
            prop_oneof![
                proptest::option::of("[a-z ]{1,10}").prop_map(Oracle::Aside),
                Just(Oracle::RetrievalDown),
            ],
            1..6,
        ),
    ) {
        let ctx = test_context();
        let mut session = session_awaiting(index);

        for oracle in &asides {
            drive(&mut session, &ctx, "une question ?", oracle).unwrap();
            prop_assert_eq!(&session.phase, &Phase::AwaitAnswer { index });
            prop_assert_eq!(session.question_index, index - 1);
            prop_assert_eq!(session.pending_question_index, Some(index));
        }

        drive(&mut session, &ctx, "ma réponse", &Oracle::Answer).unwrap();
        prop_assert_eq!(session.answers.last().map(|a| a.question_index), Some(index));
        prop_assert_eq!(session.pending_question_index, None);
    }

    /// Blank input is re-prompted and never reaches the classifier
    #[test]
    fn prop_blank_input_reprompts(index in arb_index(), blank in "[ \t\n]{0,5}") {
        let session = session_awaiting(index);
        let result = transition(&session, &test_context(), Event::UserMessage { text: blank }).unwrap();

        let classifies = result
            .effects
            .iter()
            .any(|e| matches!(e, Effect::ClassifyIntent { .. }));
        prop_assert_eq!(result.new_phase, Phase::AskQuestion { index });
        prop_assert!(!classifies);
    }

    /// Every (phase, event) pair either transitions or errors, never panics,
    /// and never names a question outside the questionnaire
    #[test]
    fn prop_any_pair_is_handled(phase in arb_phase(), event in arb_event()) {
        let mut session = new_session();
        session.phase = phase;

        if let Ok(result) = transition(&session, &test_context(), event) {
            if let Some(index) = result.new_phase.question() {
                prop_assert!((1..=TOTAL).contains(&index));
            }
            for effect in &result.effects {
                if let Effect::AskQuestion { index, .. } = effect {
                    prop_assert!((1..=TOTAL).contains(index));
                }
            }
        }
    }

    /// The transition function is pure
    #[test]
    fn prop_transition_is_deterministic(phase in arb_phase(), event in arb_event()) {
        let mut session = new_session();
        session.phase = phase;
        let ctx = test_context();

        let first = transition(&session, &ctx, event.clone());
        let second = transition(&session, &ctx, event);
        match (first, second) {
            (Ok(a), Ok(b)) => {
                prop_assert_eq!(a.new_phase, b.new_phase);
                prop_assert_eq!(a.effects, b.effects);
            }
            (Err(a), Err(b)) => prop_assert_eq!(a, b),
            (a, b) => prop_assert!(false, "diverged: {:?} vs {:?}", a, b),
        }
    }

    /// Completed sessions only acknowledge
    #[test]
    fn prop_complete_is_terminal(text in arb_text()) {
        let mut session = session_awaiting(TOTAL);
        drive(&mut session, &test_context(), "dernière réponse", &Oracle::Answer).unwrap();
        prop_assert_eq!(&session.phase, &Phase::Complete);

        let result = transition(&session, &test_context(), Event::UserMessage { text }).unwrap();
        prop_assert_eq!(result.new_phase, Phase::Complete);
        prop_assert_eq!(result.effects, vec![Effect::Say(Utterance::ClosingAck)]);
    }
}
