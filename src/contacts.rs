//! Contact enrichment lookup against the CRM backend

use crate::runtime::traits::{CapabilityError, ContextLookup};
use crate::session::ContactContext;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::Duration;

/// Keep only the digits of a phone-number identifier
pub fn normalize_phone(user_id: &str) -> String {
    user_id.chars().filter(char::is_ascii_digit).collect()
}

/// Fetches `GET {base}/api/v1/whatsapp/info/{digits}`
pub struct HttpContextLookup {
    client: Client,
    base_url: String,
}

impl HttpContextLookup {
    pub fn new(base_url: &str) -> Result<Self, CapabilityError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| CapabilityError::Transport(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url_for(&self, user_id: &str) -> Option<String> {
        let digits = normalize_phone(user_id);
        if digits.is_empty() {
            return None;
        }
        Some(format!("{}/api/v1/whatsapp/info/{digits}", self.base_url))
    }
}

#[async_trait]
impl ContextLookup for HttpContextLookup {
    async fn lookup(&self, user_id: &str) -> Result<Option<ContactContext>, CapabilityError> {
        let Some(url) = self.url_for(user_id) else {
            return Ok(None);
        };

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| CapabilityError::Transport(e.to_string()))?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let context: Option<ContactContext> = response
                    .json()
                    .await
                    .map_err(|e| CapabilityError::InvalidResponse(e.to_string()))?;
                Ok(context.filter(|c| !c.is_empty()))
            }
            status => Err(CapabilityError::Transport(format!(
                "contact directory returned HTTP {status}"
            ))),
        }
    }
}

/// Used when no contact directory is configured
pub struct NoContextLookup;

#[async_trait]
impl ContextLookup for NoContextLookup {
    async fn lookup(&self, _user_id: &str) -> Result<Option<ContactContext>, CapabilityError> {
        Ok(None)
    }
}
