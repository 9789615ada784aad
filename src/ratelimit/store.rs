//! Counter store trait for abstracting in-process and shared backends.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// A live counter for one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterEntry {
    /// Requests counted in the current window
    pub count: u64,
    /// Epoch milliseconds at which the window ends
    pub reset_at_ms: u64,
}

impl CounterEntry {
    /// Whether the window has ended at `now_ms`.
    ///
    /// An entry is still live at exactly `reset_at_ms`.
    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms > self.reset_at_ms
    }
}

/// Errors raised by a counter backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The shared store rejected or failed a command
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// The store returned something the backend cannot interpret
    #[error("Counter store unavailable: {0}")]
    Unavailable(String),
}

/// Trait for counter store implementations.
///
/// This trait abstracts over the in-process `MemoryStore` and the shared
/// `RedisStore` so the tier evaluator can work with either.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomically increment the counter for `key`.
    ///
    /// Starts a fresh window of length `window` when no live entry exists;
    /// otherwise bumps the count and leaves the reset time alone.
    async fn increment(&self, key: &str, window: Duration) -> Result<CounterEntry, StoreError>;

    /// Read the live entry for `key` without mutating it.
    async fn read(&self, key: &str) -> Result<Option<CounterEntry>, StoreError>;

    /// Short backend label for logs.
    fn name(&self) -> &'static str;
}
