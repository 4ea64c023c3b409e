//! Append-only audit log
//!
//! Every processed message leaves one row in `interactions`. Rows are never
//! updated or deleted by the service.

mod schema;

pub use schema::*;

use crate::runtime::traits::{AuditSink, CapabilityError};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Database lock poisoned")]
    Poisoned,
    #[error("Invalid stored value: {0}")]
    InvalidValue(String),
}

pub type DbResult<T> = Result<T, DbError>;

/// Thread-safe audit log handle
#[derive(Clone)]
pub struct AuditLog {
    conn: Arc<Mutex<Connection>>,
}

impl AuditLog {
    /// Open or create the audit log at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    /// Open an in-memory audit log (for testing)
    #[allow(dead_code)] // Used in tests
    pub fn open_in_memory() -> DbResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> DbResult<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> DbResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| DbError::Poisoned)
    }

    pub fn append(&self, record: &InteractionRecord) -> DbResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO interactions (id, user_id, phase_before, phase_after, message_text, reply_text, created_at, latency_ms, degraded)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                record.id,
                record.user_id,
                record.phase_before,
                record.phase_after,
                record.message_text,
                record.reply_text,
                record.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true),
                i64::try_from(record.latency_ms).unwrap_or(i64::MAX),
                record.degraded,
            ],
        )?;
        Ok(())
    }

    /// Most recent records for a user, newest first
    pub fn recent_for_user(&self, user_id: &str, limit: usize) -> DbResult<Vec<InteractionRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, user_id, phase_before, phase_after, message_text, reply_text, created_at, latency_ms, degraded
             FROM interactions WHERE user_id = ?1
             ORDER BY created_at DESC, rowid DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(
            params![user_id, i64::try_from(limit).unwrap_or(i64::MAX)],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, String>(6)?,
                    row.get::<_, i64>(7)?,
                    row.get::<_, bool>(8)?,
                ))
            },
        )?;

        let mut records = Vec::new();
        for row in rows {
            let (id, user_id, phase_before, phase_after, message_text, reply_text, created_at, latency_ms, degraded) =
                row?;
            let timestamp = DateTime::parse_from_rfc3339(&created_at)
                .map_err(|e| DbError::InvalidValue(format!("created_at {created_at}: {e}")))?
                .with_timezone(&Utc);
            records.push(InteractionRecord {
                id,
                user_id,
                phase_before,
                phase_after,
                message_text,
                reply_text,
                timestamp,
                latency_ms: u64::try_from(latency_ms).unwrap_or_default(),
                degraded,
            });
        }
        Ok(records)
    }

    #[allow(dead_code)] // Used in tests
    pub fn count(&self) -> DbResult<u64> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM interactions", [], |row| row.get(0))?;
        Ok(u64::try_from(count).unwrap_or_default())
    }
}

/// [`AuditSink`] writing to the SQLite audit log off the async workers
pub struct SqliteAuditSink {
    log: AuditLog,
}

impl SqliteAuditSink {
    pub fn new(log: AuditLog) -> Self {
        Self { log }
    }
}

#[async_trait]
impl AuditSink for SqliteAuditSink {
    async fn record(&self, record: &InteractionRecord) -> Result<(), CapabilityError> {
        let log = self.log.clone();
        let record = record.clone();
        tokio::task::spawn_blocking(move || log.append(&record))
            .await
            .map_err(|e| CapabilityError::Transport(format!("audit task failed: {e}")))?
            .map_err(|e| CapabilityError::Transport(e.to_string()))
    }
}
