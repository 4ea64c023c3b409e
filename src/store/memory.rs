//! Process-local session backend

use super::{stored_version, BackendError, SessionBackend};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

struct Entry {
    payload: String,
    expires_at: Instant,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// In-memory backend with read-time expiry
///
/// In fallback role (`adopt_unknown`) it mirrors the durable store, and a
/// write for a key it has never seen is accepted whatever version the caller
/// expects, because the record's history lives in the durable store.
pub struct MemoryBackend {
    entries: Mutex<HashMap<String, Entry>>,
    adopt_unknown: bool,
}

impl MemoryBackend {
    /// Standalone backend with strict versioning
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            adopt_unknown: false,
        }
    }

    /// Backend used while the durable store is unreachable
    pub fn fallback() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            adopt_unknown: true,
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drop expired entries, returning how many were removed
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|_, e| e.is_live(now));
        before - entries.len()
    }

    /// Overwrite `key` with a copy of the durable record
    pub fn mirror(&self, key: &str, payload: &str, ttl: Duration) {
        self.entries().insert(
            key.to_string(),
            Entry {
                payload: payload.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
    }

    pub fn evict(&self, key: &str) {
        self.entries().remove(key);
    }

    #[cfg(test)]
    pub fn insert_raw(&self, key: &str, payload: &str, ttl: Duration) {
        self.entries().insert(
            key.to_string(),
            Entry {
                payload: payload.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, BackendError> {
        let now = Instant::now();
        let mut entries = self.entries();
        match entries.get(key) {
            Some(entry) if entry.is_live(now) => Ok(Some(entry.payload.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn put(
        &self,
        key: &str,
        payload: &str,
        expected_version: u64,
        ttl: Duration,
    ) -> Result<(), BackendError> {
        let now = Instant::now();
        let mut entries = self.entries();

        match entries.get(key).filter(|e| e.is_live(now)) {
            Some(current) => {
                let found = stored_version(&current.payload);
                if found != Some(expected_version) {
                    return Err(BackendError::Conflict {
                        expected: expected_version,
                        found,
                    });
                }
            }
            None if expected_version != 0 && !self.adopt_unknown => {
                return Err(BackendError::Conflict {
                    expected: expected_version,
                    found: None,
                });
            }
            None => {}
        }

        entries.insert(
            key.to_string(),
            Entry {
                payload: payload.to_string(),
                expires_at: now + ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, BackendError> {
        Ok(self.entries().remove(key).is_some())
    }

    async fn count(&self, prefix: &str) -> Result<usize, BackendError> {
        let now = Instant::now();
        Ok(self
            .entries()
            .iter()
            .filter(|(k, e)| k.starts_with(prefix) && e.is_live(now))
            .count())
    }

    async fn purge(&self, prefix: &str) -> Result<usize, BackendError> {
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|k, _| !k.starts_with(prefix));
        Ok(before - entries.len())
    }
}
