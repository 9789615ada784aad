//! The rate limiting gate in front of a request handler.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{
        header::{HeaderMap, HeaderName, HeaderValue, RETRY_AFTER},
        StatusCode,
    },
    middleware::Next,
    response::{IntoResponse, Json, Response},
};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use tracing::{debug, error, trace, warn};

use super::resolver::{CredentialResolver, LimitsResolver};
use crate::config::FailurePolicy;
use crate::ratelimit::{Decision, LimitType, RateLimiter, TierLimits};

/// Headline (per-minute) threshold.
pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
/// Tightest remaining quota across tiers.
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
/// Epoch seconds at which the reported tier resets.
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// The credential and limits a request was admitted under.
///
/// Inserted into request extensions whenever the request is forwarded,
/// including when a counter store failure is let through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCredential {
    /// The credential the request was counted against
    pub id: String,
    /// The limits resolved for that credential
    pub limits: TierLimits,
}

/// Shared state for [`gate_requests`].
///
/// Built once at startup and cloned into the middleware stack.
#[derive(Clone)]
pub struct RateLimitGate {
    limiter: Arc<RateLimiter>,
    credentials: Arc<dyn CredentialResolver>,
    limits: Arc<dyn LimitsResolver>,
    failure_policy: FailurePolicy,
}

impl RateLimitGate {
    /// Create a gate with the default (fail open) failure policy.
    pub fn new<C, L>(limiter: Arc<RateLimiter>, credentials: C, limits: L) -> Self
    where
        C: CredentialResolver + 'static,
        L: LimitsResolver + 'static,
    {
        Self {
            limiter,
            credentials: Arc::new(credentials),
            limits: Arc::new(limits),
            failure_policy: FailurePolicy::default(),
        }
    }

    /// Set what happens when the counter store fails.
    pub fn with_failure_policy(mut self, failure_policy: FailurePolicy) -> Self {
        self.failure_policy = failure_policy;
        self
    }

    /// The limiter behind this gate.
    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// The configured failure policy.
    pub fn failure_policy(&self) -> FailurePolicy {
        self.failure_policy
    }
}

/// Rate limiting middleware.
///
/// Install with `axum::middleware::from_fn_with_state(gate, gate_requests)`.
/// Requests without a credential pass through untouched. Everything else is
/// counted; denials get a 429 and admitted responses get quota headers.
pub async fn gate_requests(
    State(gate): State<RateLimitGate>,
    request: Request,
    next: Next,
) -> Response {
    let (parts, body) = request.into_parts();

    let Some(credential) = gate.credentials.resolve_credential(&parts).await else {
        trace!(path = %parts.uri.path(), "No credential, skipping rate limit");
        return next.run(Request::from_parts(parts, body)).await;
    };

    let limits = gate.limits.resolve_limits(&credential, &parts).await;
    let mut request = Request::from_parts(parts, body);
    request.extensions_mut().insert(ResolvedCredential {
        id: credential.clone(),
        limits,
    });

    let decision = match gate.limiter.check_limit(&credential, &limits).await {
        Ok(decision) => decision,
        Err(e) => {
            return match gate.failure_policy {
                FailurePolicy::FailOpen => {
                    warn!(
                        credential = %credential,
                        store = gate.limiter.store_name(),
                        error = %e,
                        "Counter store failed, admitting request"
                    );
                    next.run(request).await
                }
                FailurePolicy::FailClosed => {
                    error!(
                        credential = %credential,
                        store = gate.limiter.store_name(),
                        error = %e,
                        "Counter store failed, rejecting request"
                    );
                    unavailable_response()
                }
            };
        }
    };

    if !decision.allowed {
        debug!(
            credential = %credential,
            limit_type = ?decision.limit_type,
            "Rejecting rate limited request"
        );
        return rate_limited_response(&decision);
    }

    let mut response = next.run(request).await;
    apply_quota_headers(response.headers_mut(), &decision);
    response
}

/// Set `X-RateLimit-*` headers from a decision.
pub fn apply_quota_headers(headers: &mut HeaderMap, decision: &Decision) {
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(decision.limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(decision.remaining));
    if let Some(reset_at_ms) = decision.reset_at_ms {
        headers.insert(X_RATELIMIT_RESET, HeaderValue::from(reset_at_ms.div_ceil(1000)));
    }
}

/// JSON body of a 429 response.
#[derive(Debug, Serialize)]
pub struct RateLimitExceeded {
    /// Machine-readable error code, always `rate_limit_exceeded`
    pub error: &'static str,
    /// Human-readable explanation
    pub message: String,
    /// The tier that denied the request
    pub limit_type: Option<LimitType>,
    /// Threshold of the denying tier
    pub limit: u64,
    /// Always zero on denial
    pub remaining: u64,
    /// Seconds until the denying tier resets
    pub retry_after_seconds: u64,
    /// RFC 3339 reset time of the denying tier
    pub reset_at: Option<String>,
}

impl RateLimitExceeded {
    /// Build the body for a denied decision.
    pub fn from_decision(decision: &Decision) -> Self {
        let retry_after_seconds = decision.retry_after_seconds.unwrap_or(0);
        let tier = decision
            .limit_type
            .map(|t| t.as_str())
            .unwrap_or("unknown");

        Self {
            error: "rate_limit_exceeded",
            message: format!(
                "Rate limit exceeded for {} tier, retry after {} seconds",
                tier, retry_after_seconds
            ),
            limit_type: decision.limit_type,
            limit: decision.limit,
            remaining: 0,
            retry_after_seconds,
            reset_at: decision.reset_at_ms.and_then(format_reset_at),
        }
    }
}

fn format_reset_at(reset_at_ms: u64) -> Option<String> {
    DateTime::<Utc>::from_timestamp_millis(i64::try_from(reset_at_ms).ok()?)
        .map(|at| at.to_rfc3339_opts(SecondsFormat::Millis, true))
}

fn rate_limited_response(decision: &Decision) -> Response {
    let body = RateLimitExceeded::from_decision(decision);
    let retry_after = body.retry_after_seconds;

    let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
    let headers = response.headers_mut();
    apply_quota_headers(headers, decision);
    headers.insert(RETRY_AFTER, HeaderValue::from(retry_after));
    response
}

fn unavailable_response() -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(serde_json::json!({
            "error": "rate_limiter_unavailable",
            "message": "Rate limiting is temporarily unavailable",
        })),
    )
        .into_response()
}
