//! Shared counter store backed by Redis.
//!
//! Every counter is a Redis integer with a server-side millisecond TTL. The
//! TTL is attached only when the key is first created, so concurrent
//! increments from other instances never push each other's windows out.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{Client, Script};
use tracing::{info, trace};

use super::clock::{Clock, SystemClock};
use super::store::{CounterEntry, CounterStore, StoreError};

/// Default namespace for counter keys.
pub const DEFAULT_KEY_PREFIX: &str = "tiergate:";

/// Increment a counter and attach its window TTL on creation.
///
/// Returns `{count, pttl}` so the caller never needs a second round trip.
const INCREMENT_SCRIPT: &str = r#"
local count = redis.call('INCR', KEYS[1])
local ttl = redis.call('PTTL', KEYS[1])
if ttl < 0 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
    ttl = tonumber(ARGV[1])
end
return {count, ttl}
"#;

/// A counter store shared by every instance pointing at the same Redis.
pub struct RedisStore {
    /// Multiplexed connection, cloned per command
    conn: MultiplexedConnection,
    /// Prefix applied to every key
    key_prefix: String,
    /// Cached increment script
    increment_script: Script,
    /// Local clock used to turn remaining TTLs into absolute reset times
    clock: Arc<dyn Clock>,
}

impl RedisStore {
    /// Connect to Redis at `url`.
    pub async fn connect(url: &str, key_prefix: impl Into<String>) -> Result<Self, StoreError> {
        let client = Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        let key_prefix = key_prefix.into();

        info!(key_prefix = %key_prefix, "Connected to Redis counter store");

        Ok(Self::with_connection(conn, key_prefix))
    }

    /// Wrap an existing connection.
    pub fn with_connection(conn: MultiplexedConnection, key_prefix: impl Into<String>) -> Self {
        Self {
            conn,
            key_prefix: key_prefix.into(),
            increment_script: Script::new(INCREMENT_SCRIPT),
            clock: Arc::new(SystemClock),
        }
    }

    /// The prefix applied to every key.
    pub fn key_prefix(&self) -> &str {
        &self.key_prefix
    }

    fn namespaced(&self, key: &str) -> String {
        namespaced_key(&self.key_prefix, key)
    }
}

fn namespaced_key(prefix: &str, key: &str) -> String {
    format!("{}{}", prefix, key)
}

#[async_trait]
impl CounterStore for RedisStore {
    async fn increment(&self, key: &str, window: Duration) -> Result<CounterEntry, StoreError> {
        let key = self.namespaced(key);
        let window_ms = window.as_millis() as u64;
        let mut conn = self.conn.clone();

        let (count, ttl_ms): (u64, i64) = self
            .increment_script
            .key(&key)
            .arg(window_ms)
            .invoke_async(&mut conn)
            .await?;

        if ttl_ms < 0 {
            return Err(StoreError::Unavailable(format!(
                "counter {} has no expiry after increment",
                key
            )));
        }

        trace!(key = %key, count = count, ttl_ms = ttl_ms, "Incremented Redis counter");

        Ok(CounterEntry {
            count,
            reset_at_ms: self.clock.now_ms().saturating_add(ttl_ms as u64),
        })
    }

    async fn read(&self, key: &str) -> Result<Option<CounterEntry>, StoreError> {
        let key = self.namespaced(key);
        let mut conn = self.conn.clone();

        let (count, ttl_ms): (Option<u64>, i64) = redis::pipe()
            .atomic()
            .get(&key)
            .pttl(&key)
            .query_async(&mut conn)
            .await?;

        // PTTL is -2 for a missing key and -1 for a key without expiry.
        Ok(match count {
            Some(count) if ttl_ms > 0 => Some(CounterEntry {
                count,
                reset_at_ms: self.clock.now_ms().saturating_add(ttl_ms as u64),
            }),
            _ => None,
        })
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}
