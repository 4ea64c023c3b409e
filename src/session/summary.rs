//! Bounded dialogue memory
//!
//! Keeps the last few turns verbatim (truncated) and folds older turns into a
//! digest whose oldest text is dropped first.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

const TURN_TEXT_MAX_CHARS: usize = 280;
const DIGEST_MAX_CHARS: usize = 1200;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub user: String,
    pub reply: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialogueSummary {
    #[serde(default)]
    pub digest: String,
    #[serde(default)]
    pub recent: VecDeque<Turn>,
}

impl DialogueSummary {
    pub fn push_turn(&mut self, user: &str, reply: &str, max_turns: usize) {
        self.recent.push_back(Turn {
            user: truncate_chars(user, TURN_TEXT_MAX_CHARS),
            reply: truncate_chars(reply, TURN_TEXT_MAX_CHARS),
        });
        while self.recent.len() > max_turns {
            let Some(evicted) = self.recent.pop_front() else {
                break;
            };
            self.fold(&evicted);
        }
    }

    fn fold(&mut self, turn: &Turn) {
        if !self.digest.is_empty() {
            self.digest.push_str(" | ");
        }
        self.digest.push_str(&format!("user: {} / bot: {}", turn.user, turn.reply));
        self.digest = keep_last_chars(&self.digest, DIGEST_MAX_CHARS);
    }

    /// Plain-text rendering passed to the intent classifier
    pub fn render(&self) -> String {
        let mut out = String::new();
        if !self.digest.is_empty() {
            out.push_str("Earlier: ");
            out.push_str(&self.digest);
            out.push('\n');
        }
        for turn in &self.recent {
            out.push_str("User: ");
            out.push_str(&turn.user);
            out.push_str("\nAssistant: ");
            out.push_str(&turn.reply);
            out.push('\n');
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.digest.is_empty() && self.recent.is_empty()
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max.saturating_sub(1)).collect();
    out.push('…');
    out
}

fn keep_last_chars(s: &str, max: usize) -> String {
    let count = s.chars().count();
    if count <= max {
        return s.to_string();
    }
    s.chars().skip(count - max).collect()
}
