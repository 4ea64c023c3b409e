//! LLM error types

use std::time::Duration;
use thiserror::Error;

/// LLM error with classification
#[derive(Debug, Error)]
#[error("{message}")]
pub struct LlmError {
    pub kind: LlmErrorKind,
    pub message: String,
    pub retry_after: Option<Duration>,
}

impl LlmError {
    pub fn new(kind: LlmErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn with_retry_after(mut self, duration: Duration) -> Self {
        self.retry_after = Some(duration);
        self
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(LlmErrorKind::Network, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(LlmErrorKind::Unknown, message)
    }

    /// Classify a non-success HTTP status
    pub fn from_status(status: u16, message: &str) -> Self {
        match status {
            401 | 403 => Self::new(
                LlmErrorKind::Auth,
                format!("Authentication failed: {message}"),
            ),
            429 => Self::new(
                LlmErrorKind::RateLimit,
                format!("Rate limit exceeded: {message}"),
            ),
            400 | 404 | 422 => Self::new(
                LlmErrorKind::InvalidRequest,
                format!("Invalid request: {message}"),
            ),
            500..=599 => Self::new(
                LlmErrorKind::ServerError,
                format!("Server error: {message}"),
            ),
            _ => Self::unknown(format!("HTTP {status}: {message}")),
        }
    }

    /// Map a reqwest transport error
    pub fn from_transport(e: &reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::network(format!("Request timeout: {e}"))
        } else if e.is_connect() {
            Self::network(format!("Connection failed: {e}"))
        } else {
            Self::unknown(format!("Request failed: {e}"))
        }
    }
}

/// Error classification for retry logic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmErrorKind {
    /// Network issues, timeouts - retryable
    Network,
    /// Rate limited (429) - retryable with backoff
    RateLimit,
    /// Server error (5xx) - retryable
    ServerError,
    /// Authentication failed (401, 403) - not retryable
    Auth,
    /// Bad request (400) - not retryable
    InvalidRequest,
    Unknown,
}

impl LlmErrorKind {
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Network | Self::RateLimit | Self::ServerError)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert_eq!(LlmError::from_status(401, "bad key").kind, LlmErrorKind::Auth);
        assert_eq!(LlmError::from_status(429, "slow down").kind, LlmErrorKind::RateLimit);
        assert_eq!(LlmError::from_status(503, "busy").kind, LlmErrorKind::ServerError);
        assert_eq!(LlmError::from_status(400, "bad").kind, LlmErrorKind::InvalidRequest);
        assert_eq!(LlmError::from_status(302, "moved").kind, LlmErrorKind::Unknown);
        assert!(LlmErrorKind::RateLimit.is_retryable());
        assert!(!LlmErrorKind::Auth.is_retryable());
    }
}
