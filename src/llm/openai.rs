//! `OpenAI` and `OpenAI`-compatible provider implementation

use super::types::{LlmRequest, LlmResponse, Usage};
use super::{LlmError, LlmService};
use crate::retrieval::Embedder;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

fn build_client() -> Result<Client, LlmError> {
    Client::builder()
        .timeout(Duration::from_secs(60))
        .build()
        .map_err(|e| LlmError::unknown(format!("Failed to create HTTP client: {e}")))
}

/// Send a JSON POST and decode a JSON reply, mapping failures to [`LlmError`]
async fn post_json<Req: Serialize + Sync, Resp: for<'de> Deserialize<'de>>(
    client: &Client,
    url: &str,
    api_key: &str,
    body: &Req,
) -> Result<Resp, LlmError> {
    let response = client
        .post(url)
        .bearer_auth(api_key)
        .json(body)
        .send()
        .await
        .map_err(|e| LlmError::from_transport(&e))?;

    let status = response.status();
    let retry_after = response
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs);
    let body = response
        .text()
        .await
        .map_err(|e| LlmError::network(format!("Failed to read response: {e}")))?;

    if !status.is_success() {
        let message = serde_json::from_str::<OpenAiErrorResponse>(&body)
            .map_or(body, |r| r.error.message);
        let error = LlmError::from_status(status.as_u16(), &message);
        return Err(match retry_after {
            Some(after) => error.with_retry_after(after),
            None => error,
        });
    }

    serde_json::from_str(&body)
        .map_err(|e| LlmError::unknown(format!("Failed to parse response: {e} - body: {body}")))
}

/// Chat-completions service
pub struct OpenAiService {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAiService {
    pub fn new(api_key: String, base_url: &str, model: String) -> Result<Self, LlmError> {
        Ok(Self {
            client: build_client()?,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
        })
    }

    fn translate_request(&self, request: &LlmRequest) -> ChatRequest {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);

        if !request.system.is_empty() {
            let system_text = request
                .system
                .iter()
                .map(|s| s.text.as_str())
                .collect::<Vec<_>>()
                .join("\n\n");
            messages.push(ChatMessage {
                role: "system".to_string(),
                content: system_text,
            });
        }

        for msg in &request.messages {
            messages.push(ChatMessage {
                role: msg.role.as_str().to_string(),
                content: msg.content.clone(),
            });
        }

        ChatRequest {
            model: self.model.clone(),
            messages,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        }
    }

    fn normalize_response(response: ChatResponse) -> Result<LlmResponse, LlmError> {
        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::unknown("No choices in response"))?;

        Ok(LlmResponse {
            text: choice.message.content.unwrap_or_default().trim().to_string(),
            usage: response
                .usage
                .map(|u| Usage {
                    input_tokens: u.prompt_tokens,
                    output_tokens: u.completion_tokens,
                })
                .unwrap_or_default(),
        })
    }
}

#[async_trait]
impl LlmService for OpenAiService {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.translate_request(request);
        let response: ChatResponse = post_json(&self.client, &url, &self.api_key, &body).await?;
        Self::normalize_response(response)
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}

/// Embeddings endpoint client
pub struct OpenAiEmbedder {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAiEmbedder {
    pub fn new(api_key: String, base_url: &str, model: String) -> Result<Self, LlmError> {
        Ok(Self {
            client: build_client()?,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
        })
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        let url = format!("{}/embeddings", self.base_url);
        let body = EmbeddingRequest {
            model: &self.model,
            input: text,
        };
        let response: EmbeddingResponse = post_json(&self.client, &url, &self.api_key, &body).await?;
        response
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| LlmError::unknown("No embedding in response"))
    }
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct OpenAiErrorResponse {
    error: OpenAiErrorBody,
}

#[derive(Debug, Deserialize)]
struct OpenAiErrorBody {
    message: String,
}
