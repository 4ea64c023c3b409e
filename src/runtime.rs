//! Request orchestration
//!
//! Serializes work per user, loads the session, resolves language and
//! context, runs one state-machine step under a time budget and persists
//! the result with optimistic versioning.

mod executor;
mod locks;
pub mod traits;

#[cfg(test)]
pub mod testing;

use executor::StepExecutor;
use locks::UserLocks;
pub use traits::*;

use crate::config::Config;
use crate::db::InteractionRecord;
use crate::language::{Language, LanguageResolver};
use crate::questionnaire::Questionnaire;
use crate::router::IntentRouter;
use crate::session::Session;
use crate::state_machine::{AsideMode, Phase, QuestionStyle, StepContext};
use crate::store::{BackendMode, SessionStore, StoreError, StoreStats};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use uuid::Uuid;

/// A conflicting save is retried once after reloading
const MAX_SAVE_ATTEMPTS: u32 = 2;

const MAX_USER_ID_CHARS: usize = 128;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Invalid user id: {0:?}")]
    InvalidUserId(String),
    #[error("Session {user_id} kept changing concurrently, giving up")]
    VersionConflict { user_id: String },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Externally visible projection of a session
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub user_id: String,
    pub phase: Phase,
    pub question_index: u32,
    pub total_questions: u32,
    pub language: Option<Language>,
    pub completed: bool,
    pub pending_question_index: Option<u32>,
    pub degraded_persistence: bool,
}

impl StatusSnapshot {
    fn from_session(session: &Session, total_questions: u32, degraded: bool) -> Self {
        Self {
            user_id: session.user_id.clone(),
            phase: session.phase.clone(),
            question_index: session.question_index,
            total_questions,
            language: session.language,
            completed: session.completed,
            pending_question_index: session.pending_question_index,
            degraded_persistence: degraded,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Reply {
    pub text: String,
    pub status: StatusSnapshot,
}

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Wall-clock budget for one message, excluding persistence
    pub step_budget: Duration,
    pub context_timeout: Duration,
    pub max_answer_chars: usize,
    pub aside_mode: AsideMode,
    pub summary_max_turns: usize,
}

impl OrchestratorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            step_budget: config.timeouts.step,
            context_timeout: config.timeouts.context,
            max_answer_chars: config.max_answer_chars,
            aside_mode: config.aside_mode,
            summary_max_turns: config.summary_max_turns,
        }
    }
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            step_budget: Duration::from_secs(20),
            context_timeout: Duration::from_secs(3),
            max_answer_chars: 1_000,
            aside_mode: AsideMode::Reask,
            summary_max_turns: 6,
        }
    }
}

/// External capabilities the orchestrator calls out to
pub struct Capabilities {
    pub router: IntentRouter,
    pub resolver: LanguageResolver,
    pub contacts: Arc<dyn ContextLookup>,
    pub audit: Arc<dyn AuditSink>,
}

pub struct Orchestrator {
    store: Arc<SessionStore>,
    router: IntentRouter,
    resolver: LanguageResolver,
    contacts: Arc<dyn ContextLookup>,
    audit: Arc<dyn AuditSink>,
    questionnaire: Arc<Questionnaire>,
    settings: OrchestratorSettings,
    locks: UserLocks,
}

impl Orchestrator {
    pub fn new(
        store: Arc<SessionStore>,
        capabilities: Capabilities,
        questionnaire: Arc<Questionnaire>,
        settings: OrchestratorSettings,
    ) -> Self {
        let Capabilities {
            router,
            resolver,
            contacts,
            audit,
        } = capabilities;
        Self {
            store,
            router,
            resolver,
            contacts,
            audit,
            questionnaire,
            settings,
            locks: UserLocks::new(),
        }
    }

    pub fn total_questions(&self) -> u32 {
        self.questionnaire.total()
    }

    fn new_session(&self, user_id: &str) -> Session {
        let ttl = chrono::Duration::from_std(self.store.ttl())
            .unwrap_or_else(|_| chrono::Duration::days(1));
        Session::new(user_id, Utc::now(), ttl)
    }

    fn snapshot(&self, session: &Session, degraded: bool) -> StatusSnapshot {
        StatusSnapshot::from_session(session, self.total_questions(), degraded)
    }

    /// Process one inbound message and return the reply
    pub async fn handle(&self, user_id: &str, text: &str) -> Result<Reply, OrchestratorError> {
        let user_id = validate_user_id(user_id)?;
        let started = Instant::now();
        let _guard = self.locks.acquire(user_id).await;

        for attempt in 1..=MAX_SAVE_ATTEMPTS {
            match self.process(user_id, text, started).await {
                Err(OrchestratorError::Store(StoreError::Conflict {
                    expected, found, ..
                })) => {
                    tracing::warn!(
                        user_id,
                        attempt,
                        expected,
                        found = ?found,
                        "Session changed concurrently, reloading"
                    );
                }
                other => return other,
            }
        }
        Err(OrchestratorError::VersionConflict {
            user_id: user_id.to_string(),
        })
    }

    async fn process(
        &self,
        user_id: &str,
        text: &str,
        started: Instant,
    ) -> Result<Reply, OrchestratorError> {
        let loaded = self.store.load(user_id).await?;
        let mut session = loaded
            .session
            .unwrap_or_else(|| self.new_session(user_id));

        if session.phase == Phase::NotStarted && session.context.is_none() {
            self.enrich(&mut session).await;
        }
        let language = self.resolver.resolve(&mut session, text).await;
        let phase_before = session.phase.clone();

        let ctx = StepContext::new(
            self.questionnaire.total(),
            self.settings.max_answer_chars,
            self.settings.aside_mode,
        );
        let executor = StepExecutor::new(
            &self.router,
            &self.questionnaire,
            ctx,
            language,
            self.settings.summary_max_turns,
        );

        let outcome = tokio::time::timeout(self.settings.step_budget, executor.run(&session, text)).await;
        let (next, reply) = match outcome {
            Ok(Ok(outcome)) => (outcome.session, outcome.reply),
            Ok(Err(e)) => {
                tracing::error!(user_id, phase = %phase_before, error = %e, "Step failed, keeping previous session");
                let reply = self.apology(&session, language);
                (session, reply)
            }
            Err(_) => {
                tracing::warn!(
                    user_id,
                    phase = %phase_before,
                    budget_ms = %self.settings.step_budget.as_millis(),
                    "Step budget exhausted, keeping previous session"
                );
                let reply = self.apology(&session, language);
                (session, reply)
            }
        };

        let saved = self.store.save(next).await?;
        let degraded = loaded.degraded || saved.degraded;
        let latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        tracing::info!(
            user_id,
            language = %language,
            phase_before = %phase_before,
            phase_after = %saved.session.phase,
            question_index = saved.session.question_index,
            duration_ms = latency_ms,
            degraded,
            "Message handled"
        );

        self.emit_audit(InteractionRecord {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            phase_before: phase_before.to_string(),
            phase_after: saved.session.phase.to_string(),
            message_text: text.to_string(),
            reply_text: reply.clone(),
            timestamp: Utc::now(),
            latency_ms,
            degraded,
        });

        Ok(Reply {
            text: reply,
            status: self.snapshot(&saved.session, degraded),
        })
    }

    /// Attach directory context to a new session; failures are ignored
    async fn enrich(&self, session: &mut Session) {
        let lookup = self.contacts.lookup(&session.user_id);
        match tokio::time::timeout(self.settings.context_timeout, lookup).await {
            Ok(Ok(Some(context))) if !context.is_empty() => {
                LanguageResolver::attach_context(session, context);
                tracing::debug!(user_id = %session.user_id, "Contact context attached");
            }
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                tracing::warn!(user_id = %session.user_id, error = %e, "Context lookup failed");
            }
            Err(_) => {
                tracing::warn!(
                    user_id = %session.user_id,
                    timeout_ms = %self.settings.context_timeout.as_millis(),
                    "Context lookup timed out"
                );
            }
        }
    }

    /// Apology followed by the question the session is still waiting on
    fn apology(&self, session: &Session, language: Language) -> String {
        let mut reply = self.questionnaire.apology(language).to_string();
        let question = session
            .phase
            .question()
            .and_then(|index| self.questionnaire.render_question(language, index, QuestionStyle::Full));
        if let Some(question) = question {
            reply.push_str("\n\n");
            reply.push_str(&question);
        }
        reply
    }

    fn emit_audit(&self, record: InteractionRecord) {
        let audit = self.audit.clone();
        tokio::spawn(async move {
            if let Err(e) = audit.record(&record).await {
                tracing::warn!(user_id = %record.user_id, error = %e, "Failed to write audit record");
            }
        });
    }

    /// Delete the session; the next message starts over
    pub async fn reset(&self, user_id: &str) -> Result<StatusSnapshot, OrchestratorError> {
        let user_id = validate_user_id(user_id)?;
        let _guard = self.locks.acquire(user_id).await;
        let existed = self.store.reset(user_id).await?;
        tracing::info!(user_id, existed, "Session reset");
        let degraded = self.store.mode() == BackendMode::Degraded;
        Ok(self.snapshot(&self.new_session(user_id), degraded))
    }

    /// Current status; `None` when the user has not started
    pub async fn status(&self, user_id: &str) -> Result<Option<StatusSnapshot>, OrchestratorError> {
        let user_id = validate_user_id(user_id)?;
        let loaded = self.store.load(user_id).await?;
        Ok(loaded
            .session
            .map(|session| self.snapshot(&session, loaded.degraded)))
    }

    /// Pin the session language explicitly, creating the session if needed
    pub async fn set_language(
        &self,
        user_id: &str,
        language: Language,
    ) -> Result<StatusSnapshot, OrchestratorError> {
        let user_id = validate_user_id(user_id)?;
        let _guard = self.locks.acquire(user_id).await;

        for attempt in 1..=MAX_SAVE_ATTEMPTS {
            let loaded = self.store.load(user_id).await?;
            let mut session = loaded
                .session
                .unwrap_or_else(|| self.new_session(user_id));
            let previous = LanguageResolver::override_language(&mut session, language);

            match self.store.save(session).await {
                Ok(saved) => {
                    tracing::info!(user_id, language = %language, previous = ?previous, "Session language set");
                    return Ok(self.snapshot(&saved.session, loaded.degraded || saved.degraded));
                }
                Err(StoreError::Conflict { .. }) => {
                    tracing::warn!(user_id, attempt, "Session changed concurrently, reloading");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(OrchestratorError::VersionConflict {
            user_id: user_id.to_string(),
        })
    }

    pub async fn stats(&self) -> StoreStats {
        self.store.stats().await
    }

    /// Delete every session
    pub async fn purge_all(&self) -> Result<usize, OrchestratorError> {
        Ok(self.store.purge().await?)
    }

    /// Evict expired sessions from the local cache
    pub fn sweep_expired(&self) -> usize {
        self.store.sweep_expired()
    }
}

pub(crate) fn validate_user_id(user_id: &str) -> Result<&str, OrchestratorError> {
    let trimmed = user_id.trim();
    if trimmed.is_empty()
        || trimmed.chars().count() > MAX_USER_ID_CHARS
        || trimmed.chars().any(char::is_control)
    {
        return Err(OrchestratorError::InvalidUserId(user_id.to_string()));
    }
    Ok(trimmed)
}
