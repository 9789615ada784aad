//! HTTP gating middleware.
//!
//! This is the only layer that knows about HTTP. It resolves a credential
//! and its limits, asks the rate limiter for a decision, and turns the
//! decision into quota headers or a 429.

mod gate;
mod resolver;

pub use gate::{
    apply_quota_headers, gate_requests, RateLimitExceeded, RateLimitGate, ResolvedCredential,
    X_RATELIMIT_LIMIT, X_RATELIMIT_REMAINING, X_RATELIMIT_RESET,
};
pub use resolver::{CredentialResolver, HeaderCredential, LimitsResolver, StaticLimits};
