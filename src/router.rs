//! Intent routing and tool dispatch
//!
//! The router decides whether a message answers the open question or is an
//! aside, and fetches the aside's answer. It holds no session state: inputs
//! are borrowed, outputs are values, and every failure comes back as a
//! [`ToolFailure`] for the state machine to handle.

use crate::language::Language;
use crate::runtime::traits::{CapabilityError, IntentClassifier, Retriever};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    /// The message answers the open question
    Answer,
    /// The message is an unrelated question or remark
    Aside,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub intent: Intent,
    pub confidence: f32,
}

impl Classification {
    pub fn new(intent: Intent, confidence: f32) -> Self {
        Self {
            intent,
            confidence: confidence.clamp(0.0, 1.0),
        }
    }
}

/// Outcome of a knowledge-base lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AsideAnswer {
    Found(String),
    /// Nothing relevant in the knowledge base
    NoInformation,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ToolFailure {
    #[error("{capability} timed out after {}ms", .after.as_millis())]
    Timeout {
        capability: &'static str,
        after: Duration,
    },
    #[error("{capability} failed: {message}")]
    Failed {
        capability: &'static str,
        message: String,
    },
}

pub struct IntentRouter {
    classifier: Arc<dyn IntentClassifier>,
    retriever: Arc<dyn Retriever>,
    classify_timeout: Duration,
    retrieval_timeout: Duration,
}

impl IntentRouter {
    pub fn new(
        classifier: Arc<dyn IntentClassifier>,
        retriever: Arc<dyn Retriever>,
        classify_timeout: Duration,
        retrieval_timeout: Duration,
    ) -> Self {
        Self {
            classifier,
            retriever,
            classify_timeout,
            retrieval_timeout,
        }
    }

    pub async fn classify(
        &self,
        language: Language,
        dialogue_summary: &str,
        text: &str,
    ) -> Result<Classification, ToolFailure> {
        bounded(
            "intent_classifier",
            self.classify_timeout,
            self.classifier.classify(language, dialogue_summary, text),
        )
        .await
    }

    pub async fn answer_aside(
        &self,
        language: Language,
        text: &str,
    ) -> Result<AsideAnswer, ToolFailure> {
        bounded(
            "retriever",
            self.retrieval_timeout,
            self.retriever.answer(language, text),
        )
        .await
    }
}

async fn bounded<T>(
    capability: &'static str,
    after: Duration,
    call: impl Future<Output = Result<T, CapabilityError>>,
) -> Result<T, ToolFailure> {
    match tokio::time::timeout(after, call).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(ToolFailure::Failed {
            capability,
            message: e.to_string(),
        }),
        Err(_) => Err(ToolFailure::Timeout { capability, after }),
    }
}

// ============================================================================
// Heuristic classifier
// ============================================================================

const QUESTION_OPENERS: &[&str] = &[
    "qu'est-ce", "comment", "pourquoi", "quel", "quelle", "quels", "quelles", "combien",
    "est-ce", "pouvez-vous", "où", "qué", "cómo", "cuál", "cuáles", "cuánto", "cuántos",
    "dónde", "quién", "puede", "pueden",
];

/// Offline classifier: treats questions as asides, everything else as answers
#[derive(Debug, Default, Clone, Copy)]
pub struct HeuristicClassifier;

impl HeuristicClassifier {
    pub fn classify_text(text: &str) -> Classification {
        let lowered = text.trim().to_lowercase();
        let first_word = lowered
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .trim_matches(|c: char| !c.is_alphanumeric() && c != '\'' && c != '-');
        let asks = lowered.contains('?')
            || lowered.starts_with('¿')
            || QUESTION_OPENERS.contains(&first_word);
        if asks {
            Classification::new(Intent::Aside, 0.6)
        } else {
            Classification::new(Intent::Answer, 0.6)
        }
    }
}

#[async_trait]
impl IntentClassifier for HeuristicClassifier {
    async fn classify(
        &self,
        _language: Language,
        _dialogue_summary: &str,
        text: &str,
    ) -> Result<Classification, CapabilityError> {
        Ok(Self::classify_text(text))
    }
}
