//! Knowledge-base retrieval for aside questions
//!
//! Embeds the question, pulls the closest passages from the vector index and
//! asks the text-completion model for a short grounded answer in the
//! session's language.

use crate::language::Language;
use crate::llm::{LlmError, LlmMessage, LlmRequest, LlmService, SystemContent};
use crate::router::AsideAnswer;
use crate::runtime::traits::{CapabilityError, Retriever};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Marker the model returns when the passages do not cover the question
const NO_INFO_MARKER: &str = "NO_INFO";

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError>;
}

/// Similarity search returning passage texts, best match first
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn query(&self, vector: Vec<f32>, top_k: usize) -> Result<Vec<String>, CapabilityError>;
}

pub struct RagRetriever {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    llm: Arc<dyn LlmService>,
    top_k: usize,
}

impl RagRetriever {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        llm: Arc<dyn LlmService>,
        top_k: usize,
    ) -> Self {
        Self {
            embedder,
            index,
            llm,
            top_k: top_k.max(1),
        }
    }

    fn system_prompt(language: Language) -> &'static str {
        match language {
            Language::Fr => {
                "Tu es l'assistant de la Chambre de commerce. Réponds en français, en trois \
                 phrases maximum, uniquement à partir du contexte fourni. Si le contexte ne \
                 permet pas de répondre, réponds exactement NO_INFO."
            }
            Language::Es => {
                "Eres el asistente de la Cámara de Comercio. Responde en español, en tres \
                 frases como máximo, usando solo el contexto proporcionado. Si el contexto no \
                 permite responder, responde exactamente NO_INFO."
            }
        }
    }

    fn build_request(language: Language, passages: &[String], question: &str) -> LlmRequest {
        let (context_label, question_label) = match language {
            Language::Fr => ("Contexte", "Question"),
            Language::Es => ("Contexto", "Pregunta"),
        };
        let context = passages.join("\n---\n");
        LlmRequest::new(SystemContent::new(Self::system_prompt(language)))
            .with_message(LlmMessage::user(format!(
                "{context_label}:\n{context}\n\n{question_label}: {question}"
            )))
            .with_max_tokens(300)
            .with_temperature(0.3)
    }
}

#[async_trait]
impl Retriever for RagRetriever {
    async fn answer(&self, language: Language, text: &str) -> Result<AsideAnswer, CapabilityError> {
        let vector = self.embedder.embed(text).await?;
        let passages = self.index.query(vector, self.top_k).await?;
        if passages.is_empty() {
            tracing::debug!(language = %language, "No passages matched aside question");
            return Ok(AsideAnswer::NoInformation);
        }

        let request = Self::build_request(language, &passages, text);
        let response = self.llm.complete(&request).await?;
        let answer = response.text.trim();
        if answer.is_empty() || answer.contains(NO_INFO_MARKER) {
            return Ok(AsideAnswer::NoInformation);
        }
        Ok(AsideAnswer::Found(answer.to_string()))
    }
}

/// Stand-in when no knowledge base is configured; every lookup fails
pub struct UnconfiguredRetriever;

#[async_trait]
impl Retriever for UnconfiguredRetriever {
    async fn answer(&self, _language: Language, _text: &str) -> Result<AsideAnswer, CapabilityError> {
        Err(CapabilityError::Unconfigured("knowledge base"))
    }
}

// ============================================================================
// Pinecone
// ============================================================================

/// Pinecone index queried over its REST data plane
pub struct PineconeIndex {
    client: Client,
    host: String,
    api_key: String,
    namespace: Option<String>,
}

impl PineconeIndex {
    pub fn new(host: &str, api_key: String, namespace: Option<String>) -> Result<Self, CapabilityError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| CapabilityError::Transport(format!("Failed to create HTTP client: {e}")))?;
        let host = host.trim_end_matches('/');
        let host = if host.starts_with("http://") || host.starts_with("https://") {
            host.to_string()
        } else {
            format!("https://{host}")
        };
        Ok(Self {
            client,
            host,
            api_key,
            namespace,
        })
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    vector: Vec<f32>,
    top_k: usize,
    include_metadata: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    namespace: Option<&'a str>,
}

#[derive(Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<QueryMatch>,
}

#[derive(Deserialize)]
struct QueryMatch {
    #[serde(default)]
    metadata: Option<serde_json::Map<String, serde_json::Value>>,
}

impl QueryMatch {
    /// Passage text, from whichever metadata field the ingester used
    fn passage(&self) -> Option<String> {
        let metadata = self.metadata.as_ref()?;
        ["text", "content", "document"]
            .iter()
            .filter_map(|key| metadata.get(*key).and_then(serde_json::Value::as_str))
            .map(str::trim)
            .find(|text| !text.is_empty())
            .map(str::to_string)
    }
}

fn passages(response: &QueryResponse) -> Vec<String> {
    response.matches.iter().filter_map(QueryMatch::passage).collect()
}

#[async_trait]
impl VectorIndex for PineconeIndex {
    async fn query(&self, vector: Vec<f32>, top_k: usize) -> Result<Vec<String>, CapabilityError> {
        let body = QueryRequest {
            vector,
            top_k,
            include_metadata: true,
            namespace: self.namespace.as_deref(),
        };
        let response = self
            .client
            .post(format!("{}/query", self.host))
            .header("Api-Key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| CapabilityError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(CapabilityError::Transport(format!(
                "vector index returned HTTP {status}: {text}"
            )));
        }
        let parsed: QueryResponse = response
            .json()
            .await
            .map_err(|e| CapabilityError::InvalidResponse(e.to_string()))?;
        Ok(passages(&parsed))
    }
}
