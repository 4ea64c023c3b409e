//! Audit log schema and types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// SQL schema for initialization
pub const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS interactions (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    phase_before TEXT NOT NULL,
    phase_after TEXT NOT NULL,
    message_text TEXT NOT NULL,
    reply_text TEXT NOT NULL,
    created_at TEXT NOT NULL,
    latency_ms INTEGER NOT NULL,
    degraded BOOLEAN NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_interactions_user ON interactions(user_id, created_at DESC);
";

/// Immutable record of one processed message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InteractionRecord {
    pub id: String,
    pub user_id: String,
    pub phase_before: String,
    pub phase_after: String,
    pub message_text: String,
    pub reply_text: String,
    pub timestamp: DateTime<Utc>,
    pub latency_ms: u64,
    pub degraded: bool,
}
