//! Trait abstractions for external capabilities
//!
//! These traits keep the orchestrator and state machine independent of the
//! concrete classifier, retriever, contact directory and audit sink, and let
//! tests substitute mocks.

use crate::db::InteractionRecord;
use crate::language::Language;
use crate::llm::{LlmError, LlmMessage, LlmRequest, LlmService, SystemContent};
use crate::router::{AsideAnswer, Classification, Intent};
use crate::session::ContactContext;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CapabilityError {
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("{0} is not configured")]
    Unconfigured(&'static str),
    #[error(transparent)]
    Llm(#[from] LlmError),
}

/// Decides whether a message answers the open question
#[async_trait]
pub trait IntentClassifier: Send + Sync {
    async fn classify(
        &self,
        language: Language,
        dialogue_summary: &str,
        text: &str,
    ) -> Result<Classification, CapabilityError>;
}

/// Answers free-form questions from the knowledge base
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn answer(&self, language: Language, text: &str) -> Result<AsideAnswer, CapabilityError>;
}

/// Detects the language of a message; `None` when undecidable
#[async_trait]
pub trait LanguageDetector: Send + Sync {
    async fn detect(&self, text: &str) -> Result<Option<Language>, CapabilityError>;
}

/// Looks up contact enrichment for a user identifier
#[async_trait]
pub trait ContextLookup: Send + Sync {
    async fn lookup(&self, user_id: &str) -> Result<Option<ContactContext>, CapabilityError>;
}

/// Append-only sink for interaction records
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, record: &InteractionRecord) -> Result<(), CapabilityError>;
}

// ============================================================================
// Arc implementations for trait objects
// ============================================================================

#[async_trait]
impl<T: IntentClassifier + ?Sized> IntentClassifier for Arc<T> {
    async fn classify(
        &self,
        language: Language,
        dialogue_summary: &str,
        text: &str,
    ) -> Result<Classification, CapabilityError> {
        (**self).classify(language, dialogue_summary, text).await
    }
}

#[async_trait]
impl<T: Retriever + ?Sized> Retriever for Arc<T> {
    async fn answer(&self, language: Language, text: &str) -> Result<AsideAnswer, CapabilityError> {
        (**self).answer(language, text).await
    }
}

#[async_trait]
impl<T: ContextLookup + ?Sized> ContextLookup for Arc<T> {
    async fn lookup(&self, user_id: &str) -> Result<Option<ContactContext>, CapabilityError> {
        (**self).lookup(user_id).await
    }
}

#[async_trait]
impl<T: AuditSink + ?Sized> AuditSink for Arc<T> {
    async fn record(&self, record: &InteractionRecord) -> Result<(), CapabilityError> {
        (**self).record(record).await
    }
}

// ============================================================================
// Production Adapters
// ============================================================================

/// Intent classifier backed by a text-completion model
pub struct LlmIntentClassifier {
    llm: Arc<dyn LlmService>,
}

impl LlmIntentClassifier {
    pub fn new(llm: Arc<dyn LlmService>) -> Self {
        Self { llm }
    }

    fn build_request(language: Language, dialogue_summary: &str, text: &str) -> LlmRequest {
        let system = format!(
            "You classify WhatsApp messages received during a diagnostic questionnaire held in {}. \
             Reply only with a JSON object: {{\"intent\": \"answer\" or \"aside\", \"confidence\": 0.0 to 1.0}}. \
             \"answer\" means the message replies to the assistant's last question, even briefly or vaguely. \
             \"aside\" means the user asks something else or changes the subject.",
            language.english_name()
        );
        let summary = if dialogue_summary.trim().is_empty() {
            "(no previous turns)"
        } else {
            dialogue_summary
        };
        LlmRequest::new(SystemContent::new(system))
            .with_message(LlmMessage::user(format!(
                "Conversation so far:\n{summary}\n\nNew message:\n{text}"
            )))
            .with_max_tokens(60)
            .with_temperature(0.0)
    }
}

#[derive(Deserialize)]
struct Verdict {
    intent: String,
    #[serde(default)]
    confidence: Option<f32>,
}

fn parse_intent(word: &str) -> Option<Intent> {
    match word.trim().to_lowercase().as_str() {
        "answer" | "response" => Some(Intent::Answer),
        "aside" | "question" | "off_topic" => Some(Intent::Aside),
        _ => None,
    }
}

/// Parse a classifier reply, tolerating prose around the JSON object
pub(crate) fn parse_classification(raw: &str) -> Result<Classification, CapabilityError> {
    let object = raw
        .find('{')
        .zip(raw.rfind('}'))
        .and_then(|(start, end)| raw.get(start..=end));

    if let Some(object) = object {
        let verdict: Verdict = serde_json::from_str(object)
            .map_err(|e| CapabilityError::InvalidResponse(format!("{e}: {raw}")))?;
        let intent = parse_intent(&verdict.intent).ok_or_else(|| {
            CapabilityError::InvalidResponse(format!("unknown intent: {}", verdict.intent))
        })?;
        return Ok(Classification::new(intent, verdict.confidence.unwrap_or(0.5)));
    }

    parse_intent(raw.trim_matches(|c: char| !c.is_alphanumeric() && c != '_'))
        .map(|intent| Classification::new(intent, 0.5))
        .ok_or_else(|| CapabilityError::InvalidResponse(raw.to_string()))
}

#[async_trait]
impl IntentClassifier for LlmIntentClassifier {
    async fn classify(
        &self,
        language: Language,
        dialogue_summary: &str,
        text: &str,
    ) -> Result<Classification, CapabilityError> {
        let request = Self::build_request(language, dialogue_summary, text);
        let response = self.llm.complete(&request).await?;
        parse_classification(&response.text)
    }
}

/// Language detector backed by a text-completion model
pub struct LlmLanguageDetector {
    llm: Arc<dyn LlmService>,
}

impl LlmLanguageDetector {
    pub fn new(llm: Arc<dyn LlmService>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl LanguageDetector for LlmLanguageDetector {
    async fn detect(&self, text: &str) -> Result<Option<Language>, CapabilityError> {
        let request = LlmRequest::new(SystemContent::new(
            "Identify the language of the user's message. Reply with exactly one code: \
             fr for French, es for Spanish, or unknown for anything else.",
        ))
        .with_message(LlmMessage::user(text))
        .with_max_tokens(5)
        .with_temperature(0.0);

        let response = self.llm.complete(&request).await?;
        Ok(Language::from_code(&response.text))
    }
}
