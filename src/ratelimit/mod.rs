//! Rate limiting logic and counter state.

mod clock;
mod key;
mod limiter;
mod memory;
mod redis_store;
mod rules;
mod store;
mod tier;

pub use clock::{Clock, ManualClock, SystemClock};
pub use key::CounterKey;
pub use limiter::{Decision, RateLimiter, TierLimits, TierUsage, Usage};
pub use memory::{MemoryStore, SweepHandle, DEFAULT_SWEEP_INTERVAL};
pub use redis_store::{RedisStore, DEFAULT_KEY_PREFIX};
pub use rules::QuotaRules;
pub use store::{CounterEntry, CounterStore, StoreError};
pub use tier::{LimitType, TierEvaluator, TierVerdict};
