//! Redis session backend

use super::{BackendError, SessionBackend};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Script};
use std::time::Duration;
use tokio::sync::Mutex;

/// Compare-and-set on the stored record's `version` field, then `SET ... EX`.
///
/// Returns `{1, expected}` on success and `{0, found}` on conflict, where
/// `found` is -1 for a missing key.
const CAS_SCRIPT: &str = r"
local current = redis.call('GET', KEYS[1])
local expected = tonumber(ARGV[1])
if current then
  local ok, decoded = pcall(cjson.decode, current)
  local found = -2
  if ok and type(decoded) == 'table' and tonumber(decoded['version']) then
    found = tonumber(decoded['version'])
  end
  if found ~= expected then
    return {0, found}
  end
elseif expected ~= 0 then
  return {0, -1}
end
redis.call('SET', KEYS[1], ARGV[2], 'EX', ARGV[3])
return {1, expected}
";

const SCAN_BATCH: usize = 200;

pub struct RedisBackend {
    client: redis::Client,
    conn: Mutex<Option<MultiplexedConnection>>,
    cas: Script,
}

impl RedisBackend {
    pub fn open(url: &str) -> Result<Self, BackendError> {
        let client =
            redis::Client::open(url).map_err(|e| BackendError::Unavailable(e.to_string()))?;
        Ok(Self {
            client,
            conn: Mutex::new(None),
            cas: Script::new(CAS_SCRIPT),
        })
    }

    async fn connection(&self) -> Result<MultiplexedConnection, BackendError> {
        let mut cached = self.conn.lock().await;
        if let Some(conn) = cached.as_ref() {
            return Ok(conn.clone());
        }
        let conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| BackendError::Unavailable(e.to_string()))?;
        *cached = Some(conn.clone());
        Ok(conn)
    }

    /// Drop the cached connection so the next call reconnects
    async fn fail(&self, e: &redis::RedisError) -> BackendError {
        *self.conn.lock().await = None;
        BackendError::Unavailable(e.to_string())
    }

    async fn scan_keys(&self, prefix: &str) -> Result<Vec<String>, BackendError> {
        let mut conn = self.connection().await?;
        let pattern = format!("{prefix}*");
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();
        loop {
            let reply: Result<(u64, Vec<String>), _> = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await;
            let (next, batch) = match reply {
                Ok(reply) => reply,
                Err(e) => return Err(self.fail(&e).await),
            };
            keys.extend(batch);
            if next == 0 {
                return Ok(keys);
            }
            cursor = next;
        }
    }
}

fn decode_cas_reply(reply: &[i64], expected: u64) -> Result<(), BackendError> {
    match reply {
        [1, _] => Ok(()),
        [0, found] => Err(BackendError::Conflict {
            expected,
            found: u64::try_from(*found).ok(),
        }),
        other => Err(BackendError::Unavailable(format!(
            "unexpected CAS reply: {other:?}"
        ))),
    }
}

#[async_trait]
impl SessionBackend for RedisBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, BackendError> {
        let mut conn = self.connection().await?;
        let payload: Result<Option<String>, _> = conn.get(key).await;
        match payload {
            Ok(payload) => Ok(payload),
            Err(e) => Err(self.fail(&e).await),
        }
    }

    async fn put(
        &self,
        key: &str,
        payload: &str,
        expected_version: u64,
        ttl: Duration,
    ) -> Result<(), BackendError> {
        let mut conn = self.connection().await?;
        let reply: Result<Vec<i64>, _> = self
            .cas
            .key(key)
            .arg(expected_version)
            .arg(payload)
            .arg(ttl.as_secs().max(1))
            .invoke_async(&mut conn)
            .await;
        match reply {
            Ok(reply) => decode_cas_reply(&reply, expected_version),
            Err(e) => Err(self.fail(&e).await),
        }
    }

    async fn delete(&self, key: &str) -> Result<bool, BackendError> {
        let mut conn = self.connection().await?;
        let deleted: Result<u64, _> = conn.del(key).await;
        match deleted {
            Ok(n) => Ok(n > 0),
            Err(e) => Err(self.fail(&e).await),
        }
    }

    async fn count(&self, prefix: &str) -> Result<usize, BackendError> {
        Ok(self.scan_keys(prefix).await?.len())
    }

    async fn purge(&self, prefix: &str) -> Result<usize, BackendError> {
        let keys = self.scan_keys(prefix).await?;
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.connection().await?;
        let mut removed = 0usize;
        for chunk in keys.chunks(SCAN_BATCH) {
            let deleted: Result<usize, _> = conn.del(chunk).await;
            match deleted {
                Ok(n) => removed += n,
                Err(e) => return Err(self.fail(&e).await),
            }
        }
        Ok(removed)
    }
}
