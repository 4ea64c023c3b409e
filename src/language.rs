//! Language and contact context resolution
//!
//! A session's language is decided once, from the first message that needs
//! it, and then travels with the session. Nothing in this module keeps
//! process-wide state, so concurrent users can never see each other's
//! language.

use crate::runtime::traits::{CapabilityError, LanguageDetector};
use crate::session::{ContactContext, Session};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Supported conversation languages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Fr,
    Es,
}

impl Language {
    pub const ALL: [Language; 2] = [Language::Fr, Language::Es];

    pub fn code(self) -> &'static str {
        match self {
            Language::Fr => "fr",
            Language::Es => "es",
        }
    }

    /// Name used when instructing a text-completion model
    pub fn english_name(self) -> &'static str {
        match self {
            Language::Fr => "French",
            Language::Es => "Spanish",
        }
    }

    /// Lenient parse of a language code or name, e.g. `"fr"`, `"Español"`
    pub fn from_code(code: &str) -> Option<Self> {
        let first = code
            .trim()
            .split(|c: char| !c.is_alphabetic())
            .find(|w| !w.is_empty())?
            .to_lowercase();
        match first.as_str() {
            "fr" | "fra" | "french" | "français" | "francais" => Some(Language::Fr),
            "es" | "spa" | "spanish" | "español" | "espanol" => Some(Language::Es),
            _ => None,
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Error)]
#[error("Unsupported language: {0}")]
pub struct UnsupportedLanguage(pub String);

impl FromStr for Language {
    type Err = UnsupportedLanguage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Language::from_code(s).ok_or_else(|| UnsupportedLanguage(s.to_string()))
    }
}

// ============================================================================
// Keyword heuristic
// ============================================================================

const SPANISH_WORDS: &[&str] = &[
    "hola", "buenas", "buenos", "gracias", "estoy", "soy", "quiero", "necesito", "tengo",
    "tenemos", "somos", "nuestra", "nuestro", "empresa", "como", "cómo", "qué", "usted", "por",
    "favor", "días", "dias", "también", "el", "los", "las", "una", "y", "sí", "hacemos",
];

const FRENCH_WORDS: &[&str] = &[
    "bonjour", "bonsoir", "salut", "merci", "je", "suis", "nous", "vous", "sommes", "avons",
    "oui", "est", "c", "j", "avec", "pour", "notre", "nos", "entreprise", "voudrais", "mais",
    "très", "aussi", "le", "les", "une", "des", "et", "au", "aux",
];

/// Guess the language of `text` from marker words and characters.
///
/// Returns `None` when the evidence is absent or tied.
pub fn keyword_guess(text: &str) -> Option<Language> {
    let lowered = text.to_lowercase();
    let mut spanish = 0u32;
    let mut french = 0u32;

    for word in lowered.split(|c: char| !c.is_alphanumeric()) {
        if word.is_empty() {
            continue;
        }
        if SPANISH_WORDS.contains(&word) {
            spanish += 1;
        }
        if FRENCH_WORDS.contains(&word) {
            french += 1;
        }
    }

    for c in lowered.chars() {
        match c {
            'ñ' | '¿' | '¡' => spanish += 2,
            'á' | 'í' | 'ó' | 'ú' => spanish += 1,
            'ç' | 'œ' | 'è' | 'ê' | 'à' | 'ù' | 'â' | 'î' | 'ô' => french += 1,
            _ => {}
        }
    }

    match spanish.cmp(&french) {
        std::cmp::Ordering::Greater => Some(Language::Es),
        std::cmp::Ordering::Less => Some(Language::Fr),
        std::cmp::Ordering::Equal => None,
    }
}

/// Detector that uses only the keyword heuristic
#[derive(Debug, Default, Clone, Copy)]
pub struct KeywordDetector;

#[async_trait]
impl LanguageDetector for KeywordDetector {
    async fn detect(&self, text: &str) -> Result<Option<Language>, CapabilityError> {
        Ok(keyword_guess(text))
    }
}

// ============================================================================
// Resolver
// ============================================================================

/// Resolves and pins the language of a session
pub struct LanguageResolver {
    detector: Arc<dyn LanguageDetector>,
    fallback: Language,
    timeout: Duration,
}

impl LanguageResolver {
    pub fn new(detector: Arc<dyn LanguageDetector>, fallback: Language, timeout: Duration) -> Self {
        Self {
            detector,
            fallback,
            timeout,
        }
    }

    /// Return the session's language, detecting and storing it on first use.
    pub async fn resolve(&self, session: &mut Session, text: &str) -> Language {
        if let Some(language) = session.language {
            return language;
        }

        let detected = self.detect(text).await;
        let language = detected.unwrap_or(self.fallback);
        session.language = Some(language);

        tracing::info!(
            user_id = %session.user_id,
            language = %language,
            detected = detected.is_some(),
            "Session language resolved"
        );
        language
    }

    async fn detect(&self, text: &str) -> Option<Language> {
        if text.trim().is_empty() {
            return None;
        }
        match tokio::time::timeout(self.timeout, self.detector.detect(text)).await {
            Ok(Ok(found)) => found.or_else(|| keyword_guess(text)),
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Language detection failed, using keyword heuristic");
                keyword_guess(text)
            }
            Err(_) => {
                tracing::warn!(
                    timeout_ms = %self.timeout.as_millis(),
                    "Language detection timed out, using keyword heuristic"
                );
                keyword_guess(text)
            }
        }
    }

    /// Explicitly replace the session language. Returns the previous value.
    pub fn override_language(session: &mut Session, language: Language) -> Option<Language> {
        session.language.replace(language)
    }

    /// Attach enrichment context. Only the first attachment sticks.
    pub fn attach_context(session: &mut Session, context: ContactContext) -> bool {
        if session.context.is_some() {
            return false;
        }
        session.context = Some(context);
        true
    }
}
