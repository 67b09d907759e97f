//! Shared key-value store interface for sessions, counters, and tombstones.
//!
//! The core only needs TTL expiry and an atomic conditional write; anything
//! providing those semantics can back it. Ships a Redis adapter and an
//! in-memory implementation used by tests and embedded deployments.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use redis::{aio::ConnectionManager, Client, Script};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(#[source] anyhow::Error),

    #[error("store returned corrupt data: {0}")]
    Corrupt(#[source] anyhow::Error),
}

/// Expected value for a conditional write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expected<'a> {
    /// The key must not exist.
    Absent,
    /// The key must hold exactly this value.
    Value(&'a str),
}

/// Snapshot of a windowed counter after an increment.
#[derive(Debug, Clone, Copy)]
pub struct Counter {
    pub count: u64,
    pub reset_in: Duration,
}

/// Key-value store with TTL and compare-and-swap semantics.
///
/// Refresh-token rotation and rate-limit counters rely on the conditional
/// write being atomic: two concurrent swaps against the same key must see
/// exactly one winner.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn put(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError>;

    /// Atomically replace the value if it matches `expected`.
    ///
    /// `ttl: None` preserves the key's remaining TTL.
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Expected<'_>,
        replacement: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, StoreError>;

    /// Increment a fixed-window counter, creating it with `window` TTL.
    async fn increment(&self, key: &str, window: Duration) -> Result<Counter, StoreError>;

    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    async fn health_check(&self) -> Result<(), StoreError>;
}

// ---------------------------------------------------------------------------
// In-memory implementation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct MemoryEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl MemoryEntry {
    fn is_expired(&self) -> bool {
        matches!(self.expires_at, Some(at) if at <= Instant::now())
    }
}

/// In-memory store with lazy TTL expiry. Per-key atomicity comes from the
/// map's entry locking, which is all compare-and-swap needs.
#[derive(Default)]
pub struct MemoryStore {
    entries: DashMap<String, MemoryEntry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        match self.entries.get(key) {
            Some(entry) if !entry.is_expired() => Ok(Some(entry.value.clone())),
            _ => Ok(None),
        }
    }

    async fn put(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        self.entries.insert(
            key.to_string(),
            MemoryEntry {
                value: value.to_string(),
                expires_at: ttl.map(|d| Instant::now() + d),
            },
        );
        Ok(())
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Expected<'_>,
        replacement: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, StoreError> {
        use dashmap::mapref::entry::Entry;

        // The entry guard holds the shard lock for the whole compare+write.
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let live = !occupied.get().is_expired();
                let matches = match (&expected, live) {
                    (Expected::Absent, false) => true,
                    (Expected::Absent, true) => false,
                    (Expected::Value(v), true) => occupied.get().value == *v,
                    (Expected::Value(_), false) => false,
                };
                if !matches {
                    return Ok(false);
                }
                let expires_at = match ttl {
                    Some(d) => Some(Instant::now() + d),
                    None if live => occupied.get().expires_at,
                    None => None,
                };
                occupied.insert(MemoryEntry {
                    value: replacement.to_string(),
                    expires_at,
                });
                Ok(true)
            }
            Entry::Vacant(vacant) => {
                if !matches!(expected, Expected::Absent) {
                    return Ok(false);
                }
                vacant.insert(MemoryEntry {
                    value: replacement.to_string(),
                    expires_at: ttl.map(|d| Instant::now() + d),
                });
                Ok(true)
            }
        }
    }

    async fn increment(&self, key: &str, window: Duration) -> Result<Counter, StoreError> {
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| MemoryEntry {
                value: "0".to_string(),
                expires_at: Some(Instant::now() + window),
            });

        if entry.is_expired() {
            entry.value = "0".to_string();
            entry.expires_at = Some(Instant::now() + window);
        }

        let count: u64 = entry.value.parse().unwrap_or(0) + 1;
        entry.value = count.to_string();
        let reset_in = entry
            .expires_at
            .map(|at| at.saturating_duration_since(Instant::now()))
            .unwrap_or(window);

        Ok(Counter { count, reset_in })
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.entries.remove(key);
        Ok(())
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Redis implementation
// ---------------------------------------------------------------------------

/// Conditional write as a server-side script so the read-compare-write is
/// one atomic step.
const CAS_SCRIPT: &str = r#"
local current = redis.call('GET', KEYS[1])
if ARGV[1] == 'nx' then
    if current then return 0 end
else
    if current ~= ARGV[2] then return 0 end
end
local ttl_ms = tonumber(ARGV[4])
if ttl_ms > 0 then
    redis.call('SET', KEYS[1], ARGV[3], 'PX', ttl_ms)
elseif current then
    redis.call('SET', KEYS[1], ARGV[3], 'KEEPTTL')
else
    redis.call('SET', KEYS[1], ARGV[3])
end
return 1
"#;

const INCR_SCRIPT: &str = r#"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
local ttl = redis.call('PTTL', KEYS[1])
if ttl < 0 then
    ttl = tonumber(ARGV[1])
    redis.call('PEXPIRE', KEYS[1], ttl)
end
return {count, ttl}
"#;

pub struct RedisStore {
    manager: ConnectionManager,
    cas: Script,
    incr: Script,
}

impl RedisStore {
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        tracing::info!(url = %url, "Connecting to Redis");
        let client =
            Client::open(url).map_err(|e| StoreError::Unavailable(anyhow::anyhow!(e)))?;

        // ConnectionManager reconnects automatically
        let manager = client.get_connection_manager().await.map_err(|e| {
            tracing::error!(error = %e, "Failed to get Redis connection manager");
            StoreError::Unavailable(anyhow::anyhow!(e))
        })?;

        Ok(Self {
            manager,
            cas: Script::new(CAS_SCRIPT),
            incr: Script::new(INCR_SCRIPT),
        })
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.manager.clone();
        redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::Unavailable(anyhow::anyhow!(e)))
    }

    async fn put(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        let mut conn = self.manager.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(ttl.as_millis() as u64);
        }
        cmd.query_async(&mut conn)
            .await
            .map_err(|e| StoreError::Unavailable(anyhow::anyhow!(e)))
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Expected<'_>,
        replacement: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, StoreError> {
        let mut conn = self.manager.clone();
        let (mode, expected_value) = match expected {
            Expected::Absent => ("nx", ""),
            Expected::Value(v) => ("eq", v),
        };
        let ttl_ms = ttl.map(|d| d.as_millis() as u64).unwrap_or(0);

        let swapped: i64 = self
            .cas
            .key(key)
            .arg(mode)
            .arg(expected_value)
            .arg(replacement)
            .arg(ttl_ms)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| StoreError::Unavailable(anyhow::anyhow!(e)))?;

        Ok(swapped == 1)
    }

    async fn increment(&self, key: &str, window: Duration) -> Result<Counter, StoreError> {
        let mut conn = self.manager.clone();
        let reply: Vec<i64> = self
            .incr
            .key(key)
            .arg(window.as_millis() as u64)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| StoreError::Unavailable(anyhow::anyhow!(e)))?;

        match reply.as_slice() {
            [count, ttl_ms] => Ok(Counter {
                count: (*count).max(0) as u64,
                reset_in: Duration::from_millis((*ttl_ms).max(0) as u64),
            }),
            other => Err(StoreError::Corrupt(anyhow::anyhow!(
                "unexpected increment reply: {:?}",
                other
            ))),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.manager.clone();
        redis::cmd("DEL")
            .arg(key)
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| StoreError::Unavailable(anyhow::anyhow!(e)))
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        let mut conn = self.manager.clone();
        redis::cmd("PING")
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| StoreError::Unavailable(anyhow::anyhow!(e)))
    }
}
