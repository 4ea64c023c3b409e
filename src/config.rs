//! Service configuration from environment variables

use crate::language::Language;
use crate::questionnaire::{Questionnaire, QuestionnaireError};
use crate::state_machine::AsideMode;
use crate::store::StoreSettings;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_KEY_PREFIX: &str = "questionnaire:user:";
pub const DEFAULT_SESSION_TTL_SECS: u64 = 86_400;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
    #[error(transparent)]
    Questionnaire(#[from] QuestionnaireError),
}

/// Text-completion and embedding provider settings
#[derive(Debug, Clone, Default)]
pub struct LlmConfig {
    pub openai_api_key: Option<String>,
    pub base_url: String,
    pub chat_model: String,
    pub embedding_model: String,
}

/// Vector index settings
#[derive(Debug, Clone, Default)]
pub struct KnowledgeConfig {
    pub pinecone_api_key: Option<String>,
    pub index_host: Option<String>,
    pub namespace: Option<String>,
    pub top_k: usize,
}

#[derive(Debug, Clone)]
pub struct Timeouts {
    pub store: Duration,
    pub classify: Duration,
    pub retrieval: Duration,
    pub language: Duration,
    pub context: Duration,
    /// Overall budget for one message
    pub step: Duration,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub redis_url: Option<String>,
    pub key_prefix: String,
    pub session_ttl: Duration,
    pub store_retry_after: Duration,
    pub timeouts: Timeouts,
    pub max_answer_chars: usize,
    pub summary_max_turns: usize,
    pub fallback_language: Language,
    pub aside_mode: AsideMode,
    pub questionnaire: Questionnaire,
    pub llm: LlmConfig,
    pub knowledge: KnowledgeConfig,
    pub contacts_base_url: Option<String>,
    pub audit_db_path: String,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; blank values count as unset
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let millis = |key: &'static str, default: u64| -> Result<Duration, ConfigError> {
            parse_or(get(key), key, default).map(Duration::from_millis)
        };

        let questionnaire = match get("QUESTIONNAIRE_PATH") {
            Some(path) => Questionnaire::load(path)?,
            None => Questionnaire::default(),
        };

        let fallback_language = match get("FALLBACK_LANGUAGE") {
            Some(v) => Language::from_code(&v).ok_or_else(|| ConfigError::Invalid {
                key: "FALLBACK_LANGUAGE",
                value: v.clone(),
                reason: "expected fr or es".into(),
            })?,
            None => Language::Fr,
        };

        let aside_mode = match get("ASIDE_MODE").map(|v| v.to_lowercase()).as_deref() {
            None | Some("reask") => AsideMode::Reask,
            Some("resume") => AsideMode::Resume,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    key: "ASIDE_MODE",
                    value: other.to_string(),
                    reason: "expected reask or resume".into(),
                })
            }
        };

        let session_ttl_secs: u64 = parse_or(get("SESSION_TTL_SECS"), "SESSION_TTL_SECS", DEFAULT_SESSION_TTL_SECS)?;
        if session_ttl_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "SESSION_TTL_SECS",
                value: "0".into(),
                reason: "must be positive".into(),
            });
        }

        let home = get("HOME").unwrap_or_else(|| "/tmp".to_string());

        Ok(Self {
            port: parse_or(get("PORT"), "PORT", 8000)?,
            redis_url: get("REDIS_URL"),
            key_prefix: get("SESSION_KEY_PREFIX").unwrap_or_else(|| DEFAULT_KEY_PREFIX.to_string()),
            session_ttl: Duration::from_secs(session_ttl_secs),
            store_retry_after: Duration::from_secs(parse_or(
                get("STORE_RETRY_AFTER_SECS"),
                "STORE_RETRY_AFTER_SECS",
                30,
            )?),
            timeouts: Timeouts {
                store: millis("STORE_TIMEOUT_MS", 2_000)?,
                classify: millis("CLASSIFY_TIMEOUT_MS", 6_000)?,
                retrieval: millis("RETRIEVAL_TIMEOUT_MS", 10_000)?,
                language: millis("LANGUAGE_TIMEOUT_MS", 4_000)?,
                context: millis("CONTEXT_TIMEOUT_MS", 3_000)?,
                step: millis("STEP_BUDGET_MS", 20_000)?,
            },
            max_answer_chars: parse_or(get("MAX_ANSWER_CHARS"), "MAX_ANSWER_CHARS", 1_000)?,
            summary_max_turns: parse_or(get("SUMMARY_MAX_TURNS"), "SUMMARY_MAX_TURNS", 6)?,
            fallback_language,
            aside_mode,
            questionnaire,
            llm: LlmConfig {
                openai_api_key: get("OPENAI_API_KEY"),
                base_url: get("OPENAI_BASE_URL")
                    .unwrap_or_else(|| crate::llm::DEFAULT_OPENAI_BASE_URL.to_string()),
                chat_model: get("CHAT_MODEL").unwrap_or_else(|| "gpt-4o-mini".to_string()),
                embedding_model: get("EMBEDDING_MODEL")
                    .unwrap_or_else(|| "text-embedding-3-small".to_string()),
            },
            knowledge: KnowledgeConfig {
                pinecone_api_key: get("PINECONE_API_KEY"),
                index_host: get("PINECONE_INDEX_HOST"),
                namespace: get("PINECONE_NAMESPACE"),
                top_k: parse_or(get("RAG_TOP_K"), "RAG_TOP_K", 2)?,
            },
            contacts_base_url: get("CONTACTS_BASE_URL"),
            audit_db_path: get("AUDIT_DB_PATH")
                .unwrap_or_else(|| format!("{home}/.questionnaire-service/audit.db")),
        })
    }

    pub fn store_settings(&self) -> StoreSettings {
        StoreSettings {
            key_prefix: self.key_prefix.clone(),
            ttl: self.session_ttl,
            timeout: self.timeouts.store,
            retry_after: self.store_retry_after,
        }
    }
}

fn parse_or<T>(value: Option<String>, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match value {
        None => Ok(default),
        Some(v) => v.parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            value: v.clone(),
            reason: e.to_string(),
        }),
    }
}
