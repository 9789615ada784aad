//! Core rate limiter implementation.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::clock::{Clock, SystemClock};
use super::key::CounterKey;
use super::store::{CounterStore, StoreError};
use super::tier::{LimitType, TierEvaluator, TierVerdict};
use crate::error::{Result, TiergateError};

/// Thresholds for the three tiers of one credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierLimits {
    /// Maximum requests per minute
    pub rpm: u64,
    /// Maximum requests per hour
    pub rph: u64,
    /// Maximum requests per day
    pub daily: u64,
}

impl TierLimits {
    /// Create validated limits. Every threshold must be positive.
    pub fn new(rpm: u64, rph: u64, daily: u64) -> Result<Self> {
        let limits = Self { rpm, rph, daily };
        limits.validate()?;
        Ok(limits)
    }

    /// Reject zero thresholds.
    pub fn validate(&self) -> Result<()> {
        for tier in LimitType::ALL {
            if self.limit_for(tier) == 0 {
                return Err(TiergateError::Config(format!(
                    "{} threshold must be greater than zero",
                    tier
                )));
            }
        }
        Ok(())
    }

    /// The threshold for a single tier.
    pub fn limit_for(&self, tier: LimitType) -> u64 {
        match tier {
            LimitType::Rpm => self.rpm,
            LimitType::Rph => self.rph,
            LimitType::Daily => self.daily,
        }
    }
}

impl Default for TierLimits {
    fn default() -> Self {
        Self {
            rpm: 60,
            rph: 1000,
            daily: 10000,
        }
    }
}

/// The combined outcome across all tiers for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    /// Whether the request is admitted
    pub allowed: bool,
    /// Tightest remaining quota across the tiers that were evaluated
    pub remaining: u64,
    /// Headline limit; the per-minute threshold unless a tier denied
    pub limit: u64,
    /// Seconds until the denying tier resets
    pub retry_after_seconds: Option<u64>,
    /// Epoch milliseconds at which the reported tier resets
    pub reset_at_ms: Option<u64>,
    /// The tier that denied the request
    pub limit_type: Option<LimitType>,
}

impl Decision {
    fn denied(tier: LimitType, verdict: TierVerdict) -> Self {
        Self {
            allowed: false,
            remaining: 0,
            limit: verdict.limit,
            retry_after_seconds: verdict.retry_after_seconds,
            reset_at_ms: verdict.reset_at_ms,
            limit_type: Some(tier),
        }
    }
}

/// Current consumption of one tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TierUsage {
    /// The tier reported
    pub tier: LimitType,
    /// Threshold for this tier
    pub limit: u64,
    /// Requests counted in the live window
    pub used: u64,
    /// Requests left before denial
    pub remaining: u64,
    /// Epoch milliseconds at which the window resets, if a window is live
    pub reset_at_ms: Option<u64>,
}

/// Current consumption of every tier for one credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Usage {
    /// The credential reported
    pub credential: String,
    /// One entry per tier, minute first
    pub tiers: Vec<TierUsage>,
}

/// The multi-tier rate limiter.
///
/// Holds no state of its own beyond the counter store reference, so one
/// instance is built at startup and shared across every request.
#[derive(Clone)]
pub struct RateLimiter {
    evaluator: TierEvaluator,
}

impl RateLimiter {
    /// Create a rate limiter over `store` using the system clock.
    pub fn new(store: Arc<dyn CounterStore>) -> Self {
        Self::with_clock(store, Arc::new(SystemClock))
    }

    /// Create a rate limiter whose retry-after math uses `clock`.
    pub fn with_clock(store: Arc<dyn CounterStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            evaluator: TierEvaluator::new(store, clock),
        }
    }

    /// Check and consume quota for `credential`.
    ///
    /// Tiers are evaluated minute, hour, day. The first denial ends the
    /// evaluation, so a request denied by the hour tier has already used one
    /// unit of the minute budget and never touches the day counter.
    pub async fn check_limit(
        &self,
        credential: &str,
        limits: &TierLimits,
    ) -> std::result::Result<Decision, StoreError> {
        trace!(
            credential = %credential,
            rpm = limits.rpm,
            rph = limits.rph,
            daily = limits.daily,
            "Checking rate limit"
        );

        // The headline limit stays the per-minute threshold even when another
        // tier has less headroom; callers display a single "limit" figure.
        let mut decision = Decision {
            allowed: true,
            remaining: u64::MAX,
            limit: limits.rpm,
            retry_after_seconds: None,
            reset_at_ms: None,
            limit_type: None,
        };

        for tier in LimitType::ALL {
            let verdict = self
                .evaluator
                .evaluate(credential, tier, limits.limit_for(tier))
                .await?;

            if !verdict.allowed {
                debug!(
                    credential = %credential,
                    tier = %tier,
                    retry_after_seconds = ?verdict.retry_after_seconds,
                    "Rate limit exceeded"
                );
                return Ok(Decision::denied(tier, verdict));
            }

            if verdict.remaining < decision.remaining {
                decision.remaining = verdict.remaining;
                decision.reset_at_ms = verdict.reset_at_ms;
            }
        }

        Ok(decision)
    }

    /// Report consumption for `credential` without counting a request.
    pub async fn usage(
        &self,
        credential: &str,
        limits: &TierLimits,
    ) -> std::result::Result<Usage, StoreError> {
        let store = self.evaluator.store();
        let keys = LimitType::ALL.map(|tier| CounterKey::new(credential, tier).to_string_key());

        let (minute, hour, day) = futures::future::try_join3(
            store.read(&keys[0]),
            store.read(&keys[1]),
            store.read(&keys[2]),
        )
        .await?;

        let tiers = LimitType::ALL
            .into_iter()
            .zip([minute, hour, day])
            .map(|(tier, entry)| {
                let limit = limits.limit_for(tier);
                let used = entry.map(|e| e.count).unwrap_or(0);
                TierUsage {
                    tier,
                    limit,
                    used,
                    remaining: limit.saturating_sub(used),
                    reset_at_ms: entry.map(|e| e.reset_at_ms),
                }
            })
            .collect();

        Ok(Usage {
            credential: credential.to_string(),
            tiers,
        })
    }

    /// Label of the backing store.
    pub fn store_name(&self) -> &'static str {
        self.evaluator.store().name()
    }
}
