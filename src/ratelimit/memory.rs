//! In-process counter store.
//!
//! Counters live in a sharded `DashMap`; the shard lock held by
//! `entry()` makes each read-modify-write atomic per key. State does not
//! cross process boundaries, so this backend only gives correct limits for
//! a single-instance deployment.

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use super::clock::{Clock, SystemClock};
use super::store::{CounterEntry, CounterStore, StoreError};

/// Default interval between sweeps of expired counters.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(300);

/// A counter store backed by process memory.
pub struct MemoryStore {
    /// Counters indexed by their string key
    counters: DashMap<String, CounterEntry>,
    /// Time source for window expiry
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    /// Create a store that uses the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create a store driven by the given clock.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            counters: DashMap::new(),
            clock,
        }
    }

    /// Remove every expired entry. Returns how many were dropped.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now_ms();
        let mut removed = 0;
        self.counters.retain(|_, entry| {
            let live = !entry.is_expired(now);
            if !live {
                removed += 1;
            }
            live
        });
        removed
    }

    /// Start a background task that sweeps every `interval`.
    ///
    /// The task only holds a weak reference, so it ends on its own once the
    /// store is dropped. Must be called from within a tokio runtime.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> SweepHandle {
        let store: Weak<Self> = Arc::downgrade(self);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                ticker.tick().await;

                let Some(store) = store.upgrade() else {
                    break;
                };

                match std::panic::catch_unwind(AssertUnwindSafe(|| store.sweep())) {
                    Ok(removed) => {
                        debug!(
                            removed = removed,
                            live = store.len(),
                            "Swept expired counters"
                        );
                    }
                    Err(_) => {
                        warn!("Counter sweep failed, deferring to next cycle");
                    }
                }
            }
        });

        SweepHandle {
            task: Mutex::new(Some(task)),
        }
    }

    /// Number of stored entries, expired ones included until swept.
    pub fn len(&self) -> usize {
        self.counters.len()
    }

    /// Whether the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    /// Clear all counters.
    pub fn clear(&self) {
        self.counters.clear();
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn increment(&self, key: &str, window: Duration) -> Result<CounterEntry, StoreError> {
        let now = self.clock.now_ms();
        let fresh = CounterEntry {
            count: 0,
            reset_at_ms: now.saturating_add(window.as_millis() as u64),
        };

        let mut entry = self.counters.entry(key.to_string()).or_insert(fresh);
        if entry.is_expired(now) {
            *entry = fresh;
        }
        entry.count += 1;

        Ok(*entry)
    }

    async fn read(&self, key: &str) -> Result<Option<CounterEntry>, StoreError> {
        let now = self.clock.now_ms();
        Ok(self
            .counters
            .get(key)
            .map(|entry| *entry)
            .filter(|entry| !entry.is_expired(now)))
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// Handle to a running sweeper task.
///
/// Dropping the handle stops the task.
pub struct SweepHandle {
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SweepHandle {
    /// Stop the sweeper. Safe to call more than once.
    pub fn shutdown(&self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }

    /// Whether the sweeper task is still running.
    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .map(|task| !task.is_finished())
            .unwrap_or(false)
    }
}

impl Drop for SweepHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
