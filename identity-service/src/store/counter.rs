use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::Script;
use service_core::redis::SharedRedis;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{lock_poisoned, StoreError};
use crate::clock::Clock;

/// Counter value and the time left in its window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterState {
    pub count: u64,
    pub ttl: Duration,
}

/// Fixed-window counters shared by every replica.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Increments `key` and reports the new count in one atomic step. The
    /// first hit of a window sets the key to expire after `window`.
    async fn increment(&self, key: &str, window: Duration) -> Result<CounterState, StoreError>;

    async fn peek(&self, key: &str) -> Result<Option<CounterState>, StoreError>;

    /// Drops the counter so the next hit opens a fresh window.
    async fn reset(&self, key: &str) -> Result<(), StoreError>;
}

// KEYS[1] counter; ARGV[1] window ms
const INCREMENT_SCRIPT: &str = r"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
  redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
local ttl = redis.call('PTTL', KEYS[1])
if ttl < 0 then
  redis.call('PEXPIRE', KEYS[1], ARGV[1])
  ttl = tonumber(ARGV[1])
end
return {count, ttl}
";

pub struct RedisCounterStore {
    redis: Arc<SharedRedis>,
    increment: Script,
}

impl RedisCounterStore {
    pub fn new(redis: Arc<SharedRedis>) -> Self {
        Self {
            redis,
            increment: Script::new(INCREMENT_SCRIPT),
        }
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn increment(&self, key: &str, window: Duration) -> Result<CounterState, StoreError> {
        let mut conn = self.redis.connection().await?;
        let (count, ttl_ms): (i64, i64) = self
            .increment
            .key(key)
            .arg(millis(window))
            .invoke_async(&mut conn)
            .await?;

        Ok(CounterState {
            count: u64::try_from(count).unwrap_or(0),
            ttl: Duration::from_millis(u64::try_from(ttl_ms).unwrap_or(0)),
        })
    }

    async fn peek(&self, key: &str) -> Result<Option<CounterState>, StoreError> {
        let mut conn = self.redis.connection().await?;
        let (count, ttl_ms): (Option<u64>, i64) = redis::pipe()
            .cmd("GET")
            .arg(key)
            .cmd("PTTL")
            .arg(key)
            .query_async(&mut conn)
            .await?;

        Ok(count.map(|count| CounterState {
            count,
            ttl: Duration::from_millis(u64::try_from(ttl_ms).unwrap_or(0)),
        }))
    }

    async fn reset(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.redis.connection().await?;
        redis::cmd("DEL").arg(key).query_async::<_, i64>(&mut conn).await?;
        Ok(())
    }
}

struct Window {
    count: u64,
    expires_at: DateTime<Utc>,
}

// Expired windows are swept once per this many increments.
const PRUNE_EVERY: u64 = 256;

/// Process-local counters for tests and single-instance development.
pub struct MemoryCounterStore {
    windows: Mutex<HashMap<String, Window>>,
    increments: AtomicU64,
    clock: Arc<dyn Clock>,
}

impl MemoryCounterStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            increments: AtomicU64::new(0),
            clock,
        }
    }
}

fn remaining(now: DateTime<Utc>, expires_at: DateTime<Utc>) -> Duration {
    (expires_at - now).to_std().unwrap_or(Duration::ZERO)
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn increment(&self, key: &str, window: Duration) -> Result<CounterState, StoreError> {
        let now = self.clock.now();
        let span = chrono::Duration::from_std(window)
            .map_err(|e| StoreError::Corrupt(format!("window out of range: {}", e)))?;
        let mut windows = self.windows.lock().map_err(lock_poisoned)?;

        if self.increments.fetch_add(1, Ordering::Relaxed) % PRUNE_EVERY == PRUNE_EVERY - 1 {
            windows.retain(|_, w| w.expires_at > now);
        }

        let entry = windows.entry(key.to_string()).or_insert(Window {
            count: 0,
            expires_at: now + span,
        });
        if entry.expires_at <= now {
            entry.count = 0;
            entry.expires_at = now + span;
        }
        entry.count += 1;

        Ok(CounterState {
            count: entry.count,
            ttl: remaining(now, entry.expires_at),
        })
    }

    async fn peek(&self, key: &str) -> Result<Option<CounterState>, StoreError> {
        let now = self.clock.now();
        let windows = self.windows.lock().map_err(lock_poisoned)?;
        Ok(windows
            .get(key)
            .filter(|w| w.expires_at > now)
            .map(|w| CounterState {
                count: w.count,
                ttl: remaining(now, w.expires_at),
            }))
    }

    async fn reset(&self, key: &str) -> Result<(), StoreError> {
        self.windows.lock().map_err(lock_poisoned)?.remove(key);
        Ok(())
    }
}
