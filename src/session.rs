//! Per-user session record
//!
//! The session is the unit of persistence and of concurrency control. It is
//! stored as JSON, so every field added after the first release carries
//! `#[serde(default)]` and unknown fields are ignored on read.

mod summary;

pub use summary::DialogueSummary;

use crate::language::Language;
use crate::state_machine::Phase;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One accepted answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Answer {
    pub question_index: u32,
    pub text: String,
    pub answered_at: DateTime<Utc>,
}

/// Contact enrichment attached at session start
///
/// Accepts the CRM's Spanish field names as aliases.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactContext {
    #[serde(default, alias = "empresa")]
    pub company: Option<String>,
    #[serde(default, alias = "nombre")]
    pub first_name: Option<String>,
    #[serde(default, alias = "apellido")]
    pub last_name: Option<String>,
    #[serde(default, alias = "cargo")]
    pub position: Option<String>,
    #[serde(default)]
    pub sector: Option<String>,
    #[serde(default, alias = "descripcion")]
    pub description: Option<String>,
}

impl ContactContext {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Display name for greetings, if known
    pub fn greeting_name(&self) -> Option<&str> {
        self.first_name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("Answer for question {got} is out of order (expected {expected})")]
    OutOfOrderAnswer { expected: u32, got: u32 },
    #[error("Session is already complete")]
    AlreadyCompleted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub user_id: String,
    #[serde(default)]
    pub phase: Phase,
    #[serde(default)]
    pub question_index: u32,
    #[serde(default)]
    pub answers: Vec<Answer>,
    #[serde(default)]
    pub pending_question_index: Option<u32>,
    #[serde(default)]
    pub language: Option<Language>,
    #[serde(default)]
    pub context: Option<ContactContext>,
    #[serde(default)]
    pub dialogue_summary: DialogueSummary,
    #[serde(default)]
    pub completed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Optimistic concurrency token; 0 means never persisted
    #[serde(default)]
    pub version: u64,
}

impl Session {
    pub fn new(user_id: impl Into<String>, now: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            user_id: user_id.into(),
            phase: Phase::NotStarted,
            question_index: 0,
            answers: Vec::new(),
            pending_question_index: None,
            language: None,
            context: None,
            dialogue_summary: DialogueSummary::default(),
            completed: false,
            created_at: now,
            updated_at: now,
            expires_at: now + ttl,
            version: 0,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Append the answer to question `index`.
    ///
    /// Answers are accepted strictly in order, so `index` must be the
    /// question right after the last answered one.
    pub fn record_answer(
        &mut self,
        index: u32,
        text: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<(), SessionError> {
        if self.completed {
            return Err(SessionError::AlreadyCompleted);
        }
        let expected = self.question_index + 1;
        if index != expected {
            return Err(SessionError::OutOfOrderAnswer {
                expected,
                got: index,
            });
        }
        self.answers.push(Answer {
            question_index: index,
            text: text.into(),
            answered_at: now,
        });
        self.question_index = index;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session::new("u1", Utc::now(), Duration::hours(24))
    }

    #[test]
    fn test_record_answer_in_order() {
        let mut s = session();
        let now = Utc::now();
        s.record_answer(1, "a", now).unwrap();
        s.record_answer(2, "b", now).unwrap();
        assert_eq!(s.question_index, 2);
        assert_eq!(s.answers.len(), 2);
        assert_eq!(s.answers[1].question_index, 2);
    }

    #[test]
    fn test_record_answer_rejects_skip_and_duplicate() {
        let mut s = session();
        let now = Utc::now();
        assert_eq!(
            s.record_answer(2, "skip", now),
            Err(SessionError::OutOfOrderAnswer {
                expected: 1,
                got: 2
            })
        );
        s.record_answer(1, "a", now).unwrap();
        assert!(s.record_answer(1, "again", now).is_err());
        assert_eq!(s.answers.len(), 1);
    }

    #[test]
    fn test_record_answer_after_completion() {
        let mut s = session();
        s.completed = true;
        assert_eq!(
            s.record_answer(1, "late", Utc::now()),
            Err(SessionError::AlreadyCompleted)
        );
    }

    #[test]
    fn test_deserialize_ignores_unknown_and_defaults_missing() {
        let json = r#"{
            "user_id": "u9",
            "created_at": "2026-01-01T00:00:00Z",
            "updated_at": "2026-01-01T00:00:00Z",
            "expires_at": "2026-01-02T00:00:00Z",
            "some_future_field": {"x": 1}
        }"#;
        let s: Session = serde_json::from_str(json).unwrap();
        assert_eq!(s.phase, Phase::NotStarted);
        assert_eq!(s.version, 0);
        assert!(s.answers.is_empty());
        assert!(s.language.is_none());
    }

    #[test]
    fn test_contact_context_accepts_crm_field_names() {
        let json = r#"{"empresa": "Acme", "nombre": "Ana", "cargo": "CEO", "sector": "Retail"}"#;
        let ctx: ContactContext = serde_json::from_str(json).unwrap();
        assert_eq!(ctx.company.as_deref(), Some("Acme"));
        assert_eq!(ctx.greeting_name(), Some("Ana"));
        assert_eq!(ctx.position.as_deref(), Some("CEO"));
        assert!(!ctx.is_empty());
        assert!(ContactContext::default().is_empty());
    }

    #[test]
    fn test_expiry() {
        let now = Utc::now();
        let s = Session::new("u1", now, Duration::seconds(10));
        assert!(!s.is_expired(now));
        assert!(s.is_expired(now + Duration::seconds(10)));
    }
}
