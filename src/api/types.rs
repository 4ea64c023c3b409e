//! API request and response types

use crate::db::InteractionRecord;
use crate::language::Language;
use crate::runtime::StatusSnapshot;
use serde::{Deserialize, Serialize};

/// Inbound WhatsApp message
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub user_id: String,
    pub user_input: String,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub status: &'static str,
    pub response: String,
    pub session: StatusSnapshot,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub exists: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<StatusSnapshot>,
}

#[derive(Debug, Deserialize)]
pub struct LanguageRequest {
    pub language: Language,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub user_id: String,
    pub interactions: Vec<InteractionRecord>,
}

#[derive(Debug, Serialize)]
pub struct PurgeResponse {
    pub deleted: usize,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}
