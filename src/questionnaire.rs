//! Questionnaire content: questions and localized canned replies
//!
//! The built-in questionnaire has eight questions. A JSON file with the same
//! shape can replace it; any message it omits keeps its built-in text.

use crate::language::Language;
use crate::session::ContactContext;
use crate::state_machine::{QuestionStyle, Utterance};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QuestionnaireError {
    #[error("Failed to read questionnaire file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid questionnaire file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid questionnaire: {0}")]
    Invalid(String),
}

/// Text in every supported language
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Localized {
    pub fr: String,
    pub es: String,
}

impl Localized {
    fn new(fr: &str, es: &str) -> Self {
        Self {
            fr: fr.to_string(),
            es: es.to_string(),
        }
    }

    pub fn get(&self, language: Language) -> &str {
        match language {
            Language::Fr => &self.fr,
            Language::Es => &self.es,
        }
    }

    fn is_complete(&self) -> bool {
        Language::ALL.iter().all(|l| !self.get(*l).trim().is_empty())
    }
}

/// Canned replies. `{total}`, `{n}`, `{name}` and `{text}` are substituted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Messages {
    pub welcome: Localized,
    pub welcome_named: Localized,
    pub question_full: Localized,
    pub question_reminder: Localized,
    pub reprompt: Localized,
    pub no_information: Localized,
    pub retrieval_unavailable: Localized,
    pub closing: Localized,
    pub closing_ack: Localized,
    pub apology: Localized,
}

impl Default for Messages {
    fn default() -> Self {
        Self {
            welcome: Localized::new(
                "Bonjour ! Bienvenue dans le diagnostic de votre entreprise. Je vais vous poser {total} questions courtes. Vous pouvez aussi me poser vos propres questions à tout moment.",
                "¡Hola! Bienvenido al diagnóstico de su empresa. Le haré {total} preguntas cortas. También puede hacerme sus propias preguntas en cualquier momento.",
            ),
            welcome_named: Localized::new(
                "Bonjour {name} ! Bienvenue dans le diagnostic de votre entreprise. Je vais vous poser {total} questions courtes. Vous pouvez aussi me poser vos propres questions à tout moment.",
                "¡Hola {name}! Bienvenido al diagnóstico de su empresa. Le haré {total} preguntas cortas. También puede hacerme sus propias preguntas en cualquier momento.",
            ),
            question_full: Localized::new("Question {n}/{total} : {text}", "Pregunta {n}/{total}: {text}"),
            question_reminder: Localized::new(
                "Revenons à la question {n}/{total}.",
                "Volvamos a la pregunta {n}/{total}.",
            ),
            reprompt: Localized::new(
                "Je n'ai pas bien reçu votre réponse.",
                "No recibí bien su respuesta.",
            ),
            no_information: Localized::new(
                "Je n'ai pas trouvé d'informations spécifiques sur ce sujet dans notre base de connaissances.",
                "No encontré información específica sobre este tema en nuestra base de conocimientos.",
            ),
            retrieval_unavailable: Localized::new(
                "Je ne peux pas consulter notre base de connaissances pour le moment.",
                "No puedo consultar nuestra base de conocimientos en este momento.",
            ),
            closing: Localized::new(
                "Merci pour vos réponses ! Le diagnostic est terminé. Un conseiller reviendra vers vous prochainement.",
                "¡Gracias por sus respuestas! El diagnóstico ha terminado. Un asesor se pondrá en contacto con usted pronto.",
            ),
            closing_ack: Localized::new(
                "Votre diagnostic est déjà terminé, merci ! Un conseiller vous recontactera.",
                "Su diagnóstico ya está completo, ¡gracias! Un asesor se pondrá en contacto con usted.",
            ),
            apology: Localized::new(
                "Désolé, j'ai rencontré un problème technique. Pouvez-vous réessayer ?",
                "Disculpe, encontré un problema técnico. ¿Puede intentarlo de nuevo?",
            ),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Questionnaire {
    pub questions: Vec<Localized>,
    #[serde(default)]
    pub messages: Messages,
}

impl Default for Questionnaire {
    fn default() -> Self {
        let questions = vec![
            Localized::new(
                "Quel est le nom de votre entreprise et son secteur d'activité ?",
                "¿Cuál es el nombre de su empresa y su sector de actividad?",
            ),
            Localized::new(
                "Combien de personnes travaillent dans votre entreprise ?",
                "¿Cuántas personas trabajan en su empresa?",
            ),
            Localized::new(
                "Depuis combien d'années votre entreprise existe-t-elle ?",
                "¿Desde hace cuántos años existe su empresa?",
            ),
            Localized::new(
                "Quels sont aujourd'hui vos principaux marchés ou clients ?",
                "¿Cuáles son hoy sus principales mercados o clientes?",
            ),
            Localized::new(
                "Exportez-vous déjà, ou envisagez-vous de le faire ? Vers quels pays ?",
                "¿Ya exporta o piensa hacerlo? ¿Hacia qué países?",
            ),
            Localized::new(
                "Quels sont les principaux défis de votre entreprise en ce moment ?",
                "¿Cuáles son los principales desafíos de su empresa en este momento?",
            ),
            Localized::new(
                "Quels services d'accompagnement vous seraient les plus utiles (formation, mise en relation, financement...) ?",
                "¿Qué servicios de acompañamiento le serían más útiles (formación, contactos, financiamiento...)?",
            ),
            Localized::new(
                "Comment et quand préférez-vous être recontacté ?",
                "¿Cómo y cuándo prefiere que lo contactemos?",
            ),
        ];
        Self {
            questions,
            messages: Messages::default(),
        }
    }
}

impl Questionnaire {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, QuestionnaireError> {
        let raw = std::fs::read_to_string(path)?;
        let questionnaire: Questionnaire = serde_json::from_str(&raw)?;
        questionnaire.validate()?;
        Ok(questionnaire)
    }

    pub fn validate(&self) -> Result<(), QuestionnaireError> {
        if self.questions.is_empty() {
            return Err(QuestionnaireError::Invalid(
                "at least one question is required".into(),
            ));
        }
        if let Some(pos) = self.questions.iter().position(|q| !q.is_complete()) {
            return Err(QuestionnaireError::Invalid(format!(
                "question {} is missing a translation",
                pos + 1
            )));
        }
        if u32::try_from(self.questions.len()).is_err() {
            return Err(QuestionnaireError::Invalid("too many questions".into()));
        }
        Ok(())
    }

    pub fn total(&self) -> u32 {
        u32::try_from(self.questions.len()).unwrap_or(u32::MAX)
    }

    /// Raw text of question `index` (1-based)
    pub fn question_text(&self, language: Language, index: u32) -> Option<&str> {
        let position = usize::try_from(index.checked_sub(1)?).ok()?;
        self.questions.get(position).map(|q| q.get(language))
    }

    pub fn render_question(
        &self,
        language: Language,
        index: u32,
        style: QuestionStyle,
    ) -> Option<String> {
        let text = self.question_text(language, index)?;
        let template = match style {
            QuestionStyle::Full => self.messages.question_full.get(language),
            QuestionStyle::Reminder => self.messages.question_reminder.get(language),
        };
        Some(
            template
                .replace("{n}", &index.to_string())
                .replace("{total}", &self.total().to_string())
                .replace("{text}", text),
        )
    }

    pub fn welcome(&self, language: Language, context: Option<&ContactContext>) -> String {
        let total = self.total().to_string();
        match context.and_then(ContactContext::greeting_name) {
            Some(name) => self
                .messages
                .welcome_named
                .get(language)
                .replace("{name}", name)
                .replace("{total}", &total),
            None => self.messages.welcome.get(language).replace("{total}", &total),
        }
    }

    pub fn utterance(&self, language: Language, utterance: Utterance) -> &str {
        let m = &self.messages;
        let text = match utterance {
            // Welcome needs the contact context; see `welcome`
            Utterance::Welcome => &m.welcome,
            Utterance::Reprompt => &m.reprompt,
            Utterance::NoInformation => &m.no_information,
            Utterance::RetrievalUnavailable => &m.retrieval_unavailable,
            Utterance::Closing => &m.closing,
            Utterance::ClosingAck => &m.closing_ack,
        };
        text.get(language)
    }

    pub fn apology(&self, language: Language) -> &str {
        self.messages.apology.get(language)
    }
}
