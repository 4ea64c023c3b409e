//! Session store
//!
//! Keyed, versioned session persistence with TTL expiry. Writes are
//! compare-and-swap on the session `version`. Every durable read and write is
//! mirrored into a process-local cache. When the durable backend fails or
//! times out, calls are served from that cache and the result is flagged
//! `degraded`; the durable backend is probed again after a cooldown.

mod memory;
mod redis_backend;

pub use memory::MemoryBackend;
pub use redis_backend::RedisBackend;

use crate::session::Session;
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Backend unavailable: {0}")]
    Unavailable(String),
    #[error("Version conflict (expected {expected}, found {found:?})")]
    Conflict { expected: u64, found: Option<u64> },
    #[error("{op} timed out after {}ms", .after.as_millis())]
    Timeout { op: &'static str, after: Duration },
}

impl BackendError {
    /// Failures that should route traffic to the fallback
    pub fn is_outage(&self) -> bool {
        matches!(self, BackendError::Unavailable(_) | BackendError::Timeout { .. })
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Session {user_id} was modified concurrently (expected version {expected}, found {found:?})")]
    Conflict {
        user_id: String,
        expected: u64,
        found: Option<u64>,
    },
    #[error("Session store unavailable: {0}")]
    Unavailable(String),
    #[error("Session serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Raw key/value backend; payloads are session JSON
#[async_trait]
pub trait SessionBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, BackendError>;

    /// Write `payload` only if the stored record's version equals
    /// `expected_version` (a missing record counts as version 0).
    async fn put(
        &self,
        key: &str,
        payload: &str,
        expected_version: u64,
        ttl: Duration,
    ) -> Result<(), BackendError>;

    async fn delete(&self, key: &str) -> Result<bool, BackendError>;

    async fn count(&self, prefix: &str) -> Result<usize, BackendError>;

    async fn purge(&self, prefix: &str) -> Result<usize, BackendError>;
}

#[async_trait]
impl<T: SessionBackend + ?Sized> SessionBackend for Arc<T> {
    async fn get(&self, key: &str) -> Result<Option<String>, BackendError> {
        (**self).get(key).await
    }

    async fn put(
        &self,
        key: &str,
        payload: &str,
        expected_version: u64,
        ttl: Duration,
    ) -> Result<(), BackendError> {
        (**self).put(key, payload, expected_version, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<bool, BackendError> {
        (**self).delete(key).await
    }

    async fn count(&self, prefix: &str) -> Result<usize, BackendError> {
        (**self).count(prefix).await
    }

    async fn purge(&self, prefix: &str) -> Result<usize, BackendError> {
        (**self).purge(prefix).await
    }
}

/// Read just the version of a stored payload
pub(crate) fn stored_version(payload: &str) -> Option<u64> {
    #[derive(Deserialize)]
    struct VersionProbe {
        #[serde(default)]
        version: u64,
    }
    serde_json::from_str::<VersionProbe>(payload)
        .ok()
        .map(|p| p.version)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendMode {
    /// Durable backend healthy
    Durable,
    /// Durable backend configured but failing; serving from fallback
    Degraded,
    /// No durable backend configured
    Memory,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub active_count: usize,
    pub backend_mode: BackendMode,
    pub latency_estimate_ms: f64,
}

#[derive(Debug, Clone)]
pub struct StoreSettings {
    pub key_prefix: String,
    pub ttl: Duration,
    pub timeout: Duration,
    pub retry_after: Duration,
}

#[derive(Debug)]
pub struct Loaded {
    pub session: Option<Session>,
    pub degraded: bool,
}

#[derive(Debug)]
pub struct Saved {
    pub session: Session,
    pub degraded: bool,
}

#[derive(Default)]
struct Health {
    cooldown_until: Option<Instant>,
}

pub struct SessionStore {
    durable: Option<Arc<dyn SessionBackend>>,
    fallback: MemoryBackend,
    settings: StoreSettings,
    health: Mutex<Health>,
    latency_us: AtomicU64,
}

impl SessionStore {
    pub fn new(durable: Arc<dyn SessionBackend>, settings: StoreSettings) -> Self {
        Self {
            durable: Some(durable),
            fallback: MemoryBackend::fallback(),
            settings,
            health: Mutex::new(Health::default()),
            latency_us: AtomicU64::new(0),
        }
    }

    pub fn memory_only(settings: StoreSettings) -> Self {
        Self {
            durable: None,
            fallback: MemoryBackend::new(),
            settings,
            health: Mutex::new(Health::default()),
            latency_us: AtomicU64::new(0),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.settings.ttl
    }

    fn key(&self, user_id: &str) -> String {
        format!("{}{user_id}", self.settings.key_prefix)
    }

    fn health(&self) -> MutexGuard<'_, Health> {
        self.health.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn mode(&self) -> BackendMode {
        match (&self.durable, self.health().cooldown_until) {
            (None, _) => BackendMode::Memory,
            (Some(_), Some(until)) if Instant::now() < until => BackendMode::Degraded,
            (Some(_), _) => BackendMode::Durable,
        }
    }

    /// Durable backend, unless it is cooling down after a failure
    fn durable_target(&self) -> Option<Arc<dyn SessionBackend>> {
        match self.mode() {
            BackendMode::Durable => self.durable.clone(),
            BackendMode::Degraded | BackendMode::Memory => None,
        }
    }

    fn mark_unavailable(&self, op: &'static str, reason: &str) {
        let mut health = self.health();
        let was_healthy = health.cooldown_until.is_none();
        health.cooldown_until = Some(Instant::now() + self.settings.retry_after);
        if was_healthy {
            tracing::warn!(
                op,
                error = %reason,
                retry_after_secs = self.settings.retry_after.as_secs(),
                "Durable session store unavailable, serving from local fallback"
            );
        }
    }

    fn mark_healthy(&self) {
        if self.health().cooldown_until.take().is_some() {
            tracing::info!("Durable session store recovered");
        }
    }

    fn observe_latency(&self, elapsed: Duration) {
        let sample = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        let previous = self.latency_us.load(Ordering::Relaxed);
        let estimate = if previous == 0 {
            sample
        } else {
            (previous.saturating_mul(4).saturating_add(sample)) / 5
        };
        self.latency_us.store(estimate, Ordering::Relaxed);
    }

    /// Run a durable call under the store timeout, tracking health and latency
    async fn durable_call<T>(
        &self,
        op: &'static str,
        call: impl Future<Output = Result<T, BackendError>>,
    ) -> Result<T, BackendError> {
        let started = Instant::now();
        let result = match tokio::time::timeout(self.settings.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(BackendError::Timeout {
                op,
                after: self.settings.timeout,
            }),
        };
        self.observe_latency(started.elapsed());
        match &result {
            Err(e) if e.is_outage() => self.mark_unavailable(op, &e.to_string()),
            _ => self.mark_healthy(),
        }
        result
    }

    /// Keep the local cache in step with what the durable backend returned
    fn mirror(&self, key: &str, payload: Option<&str>) {
        match payload {
            Some(payload) => self.fallback.mirror(key, payload, self.settings.ttl),
            None => self.fallback.evict(key),
        }
    }

    /// Decode a stored payload; corrupt or foreign records are discarded
    async fn decode(
        &self,
        user_id: &str,
        key: &str,
        payload: Option<String>,
        durable: Option<&Arc<dyn SessionBackend>>,
    ) -> Option<Session> {
        let payload = payload?;
        let session = match serde_json::from_str::<Session>(&payload) {
            Ok(session) if session.user_id == user_id => session,
            Ok(session) => {
                tracing::error!(user_id, stored_user_id = %session.user_id, "Stored session belongs to another user, discarding");
                self.discard(key, durable).await;
                return None;
            }
            Err(e) => {
                tracing::error!(user_id, error = %e, "Corrupt session record, discarding");
                self.discard(key, durable).await;
                return None;
            }
        };
        if session.is_expired(Utc::now()) {
            return None;
        }
        Some(session)
    }

    async fn discard(&self, key: &str, durable: Option<&Arc<dyn SessionBackend>>) {
        let result = match durable {
            Some(backend) => self.durable_call("discard", backend.delete(key)).await,
            None => self.fallback.delete(key).await,
        };
        if let Err(e) = result {
            tracing::warn!(error = %e, "Failed to delete corrupt session record");
        }
    }

    pub async fn load(&self, user_id: &str) -> Result<Loaded, StoreError> {
        let key = self.key(user_id);

        if let Some(durable) = self.durable_target() {
            if let Ok(payload) = self.durable_call("load", durable.get(&key)).await {
                let session = self.decode(user_id, &key, payload.clone(), Some(&durable)).await;
                self.mirror(&key, session.as_ref().and(payload.as_deref()));
                return Ok(Loaded {
                    session,
                    degraded: false,
                });
            }
        }

        let payload = self
            .fallback
            .get(&key)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        let session = self.decode(user_id, &key, payload, None).await;
        Ok(Loaded {
            session,
            degraded: self.durable.is_some(),
        })
    }

    /// Persist `session` if nobody else has written since it was loaded.
    ///
    /// The returned session carries the new version and refreshed expiry.
    pub async fn save(&self, session: Session) -> Result<Saved, StoreError> {
        let key = self.key(&session.user_id);
        let expected = session.version;
        let now = Utc::now();
        let ttl = chrono::Duration::from_std(self.settings.ttl)
            .unwrap_or_else(|_| chrono::Duration::days(1));

        let mut record = session;
        record.version = expected + 1;
        record.updated_at = now;
        record.expires_at = now + ttl;
        let payload = serde_json::to_string(&record)?;

        let user_id = record.user_id.clone();
        let conflict = |expected, found| StoreError::Conflict {
            user_id: user_id.clone(),
            expected,
            found,
        };

        if let Some(durable) = self.durable_target() {
            match self
                .durable_call("save", durable.put(&key, &payload, expected, self.settings.ttl))
                .await
            {
                Ok(()) => {
                    self.mirror(&key, Some(&payload));
                    return Ok(Saved {
                        session: record,
                        degraded: false,
                    });
                }
                Err(BackendError::Conflict { expected, found }) => {
                    return Err(conflict(expected, found));
                }
                Err(BackendError::Unavailable(_) | BackendError::Timeout { .. }) => {}
            }
        }

        match self
            .fallback
            .put(&key, &payload, expected, self.settings.ttl)
            .await
        {
            Ok(()) => {
                let degraded = self.durable.is_some();
                if degraded {
                    tracing::warn!(
                        user_id = %user_id,
                        version = record.version,
                        "Session saved to local fallback only"
                    );
                }
                Ok(Saved {
                    session: record,
                    degraded,
                })
            }
            Err(BackendError::Conflict { expected, found }) => Err(conflict(expected, found)),
            Err(e) => Err(StoreError::Unavailable(e.to_string())),
        }
    }

    /// Delete the session. Returns whether a record existed.
    ///
    /// The durable delete is attempted even while the backend is cooling
    /// down. If it fails nothing is deleted and the reset is reported as
    /// unavailable, so the session cannot reappear once the backend recovers.
    pub async fn reset(&self, user_id: &str) -> Result<bool, StoreError> {
        let key = self.key(user_id);
        let mut existed = false;

        if let Some(durable) = &self.durable {
            match self.durable_call("reset", durable.delete(&key)).await {
                Ok(deleted) => existed |= deleted,
                Err(e) => {
                    tracing::warn!(user_id, error = %e, "Durable delete failed, session kept");
                    return Err(StoreError::Unavailable(e.to_string()));
                }
            }
        }
        existed |= self
            .fallback
            .delete(&key)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(existed)
    }

    /// Delete every session under the key prefix
    pub async fn purge(&self) -> Result<usize, StoreError> {
        let prefix = &self.settings.key_prefix;
        let mut removed = 0;
        if let Some(durable) = &self.durable {
            removed += self
                .durable_call("purge", durable.purge(prefix))
                .await
                .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        }
        let local = self
            .fallback
            .purge(prefix)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        // With a durable backend the local entries are copies of durable ones
        if self.durable.is_none() {
            removed += local;
        }
        tracing::info!(removed, "Purged all sessions");
        Ok(removed)
    }

    pub async fn stats(&self) -> StoreStats {
        let prefix = &self.settings.key_prefix;
        let mut active_count = None;
        if let Some(durable) = self.durable_target() {
            active_count = self.durable_call("count", durable.count(prefix)).await.ok();
        }
        let active_count = match active_count {
            Some(count) => count,
            None => self.fallback.count(prefix).await.unwrap_or_default(),
        };

        #[allow(clippy::cast_precision_loss)]
        let latency_estimate_ms = self.latency_us.load(Ordering::Relaxed) as f64 / 1000.0;

        StoreStats {
            active_count,
            backend_mode: self.mode(),
            latency_estimate_ms,
        }
    }

    /// Evict expired entries from the local cache
    pub fn sweep_expired(&self) -> usize {
        self.fallback.sweep()
    }
}
