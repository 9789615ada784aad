//! Single-tier evaluation.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::clock::Clock;
use super::key::CounterKey;
use super::store::{CounterStore, StoreError};

/// One of the three rate limit tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LimitType {
    /// Requests per minute
    Rpm,
    /// Requests per hour
    Rph,
    /// Requests per day
    Daily,
}

impl LimitType {
    /// Tiers in evaluation order.
    pub const ALL: [LimitType; 3] = [LimitType::Rpm, LimitType::Rph, LimitType::Daily];

    /// Get the window length of this tier.
    pub fn window(&self) -> Duration {
        match self {
            LimitType::Rpm => Duration::from_secs(60),
            LimitType::Rph => Duration::from_secs(3600),
            LimitType::Daily => Duration::from_secs(86400),
        }
    }

    /// The wire name used in keys, logs and denial bodies.
    pub fn as_str(&self) -> &'static str {
        match self {
            LimitType::Rpm => "rpm",
            LimitType::Rph => "rph",
            LimitType::Daily => "daily",
        }
    }
}

impl std::fmt::Display for LimitType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of evaluating one tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierVerdict {
    /// Whether this tier admits the request
    pub allowed: bool,
    /// Requests left in the current window
    pub remaining: u64,
    /// The tier's threshold
    pub limit: u64,
    /// Seconds until the window resets, set on denial
    pub retry_after_seconds: Option<u64>,
    /// Epoch milliseconds at which the window resets
    pub reset_at_ms: Option<u64>,
}

/// Evaluates one tier against a counter store.
///
/// The counter is incremented before the threshold check, so the request
/// that crosses the limit is both counted and denied. Concurrent requests
/// can push the stored count past the limit by the number in flight.
#[derive(Clone)]
pub struct TierEvaluator {
    store: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
}

impl TierEvaluator {
    /// Create an evaluator over the given store.
    pub fn new(store: Arc<dyn CounterStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Count one request for `credential` on `tier` and judge it against `limit`.
    pub async fn evaluate(
        &self,
        credential: &str,
        tier: LimitType,
        limit: u64,
    ) -> Result<TierVerdict, StoreError> {
        let key = CounterKey::new(credential, tier);
        let entry = self
            .store
            .increment(&key.to_string_key(), tier.window())
            .await?;

        trace!(
            key = %key,
            count = entry.count,
            limit = limit,
            "Evaluated tier"
        );

        if entry.count > limit {
            let now = self.clock.now_ms();
            let retry_after = entry.reset_at_ms.saturating_sub(now).div_ceil(1000);

            debug!(
                key = %key,
                count = entry.count,
                limit = limit,
                retry_after_seconds = retry_after,
                "Tier limit exceeded"
            );

            return Ok(TierVerdict {
                allowed: false,
                remaining: 0,
                limit,
                retry_after_seconds: Some(retry_after),
                reset_at_ms: Some(entry.reset_at_ms),
            });
        }

        Ok(TierVerdict {
            allowed: true,
            remaining: limit.saturating_sub(entry.count),
            limit,
            retry_after_seconds: None,
            reset_at_ms: Some(entry.reset_at_ms),
        })
    }

    /// The store this evaluator counts against.
    pub fn store(&self) -> &Arc<dyn CounterStore> {
        &self.store
    }
}
