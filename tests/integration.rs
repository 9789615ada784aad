use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use tiergate::config::{FailurePolicy, RateLimitingConfig};
use tiergate::middleware::{X_RATELIMIT_LIMIT, X_RATELIMIT_REMAINING};
use tiergate::ratelimit::{
    CounterEntry, CounterStore, LimitType, ManualClock, MemoryStore, QuotaRules, RateLimiter,
    StoreError, TierLimits,
};
use tiergate::server::{build_gate, router};
use tower::ServiceExt;

const MINUTE: Duration = Duration::from_secs(60);

fn limiter_at(now_ms: u64) -> (Arc<ManualClock>, RateLimiter) {
    let clock = Arc::new(ManualClock::new(now_ms));
    let store = Arc::new(MemoryStore::with_clock(clock.clone()));
    (clock.clone(), RateLimiter::with_clock(store, clock))
}

#[tokio::test]
async fn test_remaining_sequence_until_denial() {
    let (_clock, limiter) = limiter_at(0);
    let limits = TierLimits::new(5, 1000, 10000).unwrap();

    for expected in [4, 3, 2, 1, 0] {
        let decision = limiter.check_limit("cred", &limits).await.unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.remaining, expected);
    }

    let sixth = limiter.check_limit("cred", &limits).await.unwrap();
    assert!(!sixth.allowed);
    assert_eq!(sixth.remaining, 0);
    assert_eq!(sixth.limit_type, Some(LimitType::Rpm));
}

#[tokio::test]
async fn test_daily_cap_denies_second_request() {
    let (_clock, limiter) = limiter_at(0);
    let limits = TierLimits::new(1000, 1000, 1).unwrap();

    let first = limiter.check_limit("fresh", &limits).await.unwrap();
    assert!(first.allowed);

    let second = limiter.check_limit("fresh", &limits).await.unwrap();
    assert!(!second.allowed);
    assert_eq!(second.limit_type, Some(LimitType::Daily));
    assert_eq!(second.limit, 1);
}

#[tokio::test]
async fn test_minute_window_recovers_after_reset() {
    let (clock, limiter) = limiter_at(0);
    let limits = TierLimits::new(2, 1000, 10000).unwrap();

    limiter.check_limit("cred", &limits).await.unwrap();
    limiter.check_limit("cred", &limits).await.unwrap();
    assert!(!limiter.check_limit("cred", &limits).await.unwrap().allowed);

    clock.set(61_000);
    let decision = limiter.check_limit("cred", &limits).await.unwrap();
    assert!(decision.allowed);
    assert_eq!(decision.remaining, 1);
}

#[tokio::test]
async fn test_memory_store_rollover() {
    let clock = Arc::new(ManualClock::new(0));
    let store = MemoryStore::with_clock(clock.clone());

    let first = store.increment("cred1:rpm", MINUTE).await.unwrap();
    assert_eq!(
        first,
        CounterEntry {
            count: 1,
            reset_at_ms: 60_000
        }
    );

    clock.set(61_000);
    let second = store.increment("cred1:rpm", MINUTE).await.unwrap();
    assert_eq!(
        second,
        CounterEntry {
            count: 1,
            reset_at_ms: 121_000
        }
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_checks_admit_exactly_the_limit() {
    let limiter = Arc::new(RateLimiter::new(Arc::new(MemoryStore::new())));
    let limits = TierLimits::new(25, 1000, 10000).unwrap();

    let tasks: Vec<_> = (0..100)
        .map(|_| {
            let limiter = limiter.clone();
            tokio::spawn(async move { limiter.check_limit("shared", &limits).await.unwrap() })
        })
        .collect();

    let mut admitted = 0;
    for task in tasks {
        if task.await.unwrap().allowed {
            admitted += 1;
        }
    }

    assert_eq!(admitted, 25);
}

fn gated_app() -> axum::Router {
    let config = RateLimitingConfig {
        default_limits: TierLimits::new(3, 100, 1000).unwrap(),
        ..RateLimitingConfig::default()
    };
    let gate = build_gate(&config, Arc::new(MemoryStore::new())).unwrap();
    router(gate)
}

fn get(uri: &str, key: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri(uri);
    if let Some(key) = key {
        builder = builder.header("x-api-key", key);
    }
    builder.body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_health_is_never_limited() {
    let app = gated_app();

    for _ in 0..10 {
        let response = app.clone().oneshot(get("/health", Some("k"))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get(X_RATELIMIT_LIMIT).is_none());
    }
}

#[tokio::test]
async fn test_gated_ping_until_limited() {
    let app = gated_app();

    for expected in ["2", "1", "0"] {
        let response = app.clone().oneshot(get("/v1/ping", Some("k"))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[X_RATELIMIT_LIMIT], "3");
        assert_eq!(response.headers()[X_RATELIMIT_REMAINING], expected);
    }

    let response = app.oneshot(get("/v1/ping", Some("k"))).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_ping_without_credential_is_forwarded() {
    let app = gated_app();

    let response = app.oneshot(get("/v1/ping", None)).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().get(X_RATELIMIT_REMAINING).is_none());
}

#[tokio::test]
async fn test_quota_endpoint_reports_usage() {
    let app = gated_app();

    app.clone().oneshot(get("/v1/ping", Some("k"))).await.unwrap();
    let response = app.oneshot(get("/v1/quota", Some("k"))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();

    assert_eq!(body["credential"], "k");
    assert_eq!(body["tiers"][0]["tier"], "rpm");
    // The ping and the quota request itself were both counted.
    assert_eq!(body["tiers"][0]["used"], 2);
    assert_eq!(body["tiers"][0]["remaining"], 1);
    assert_eq!(body["tiers"][2]["limit"], 1000);
}

#[tokio::test]
async fn test_quota_endpoint_without_credential() {
    let app = gated_app();

    let response = app.oneshot(get("/v1/quota", None)).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_rules_override_per_credential() {
    let rules = QuotaRules::from_yaml(
        r#"
default:
  rpm: 1
  rph: 10
  daily: 100
credentials:
  premium:
    rpm: 3
    rph: 30
    daily: 300
"#,
    )
    .unwrap();
    let (_clock, limiter) = limiter_at(0);

    let basic = rules.limits_for("basic");
    let premium = rules.limits_for("premium");

    assert!(limiter.check_limit("basic", &basic).await.unwrap().allowed);
    assert!(!limiter.check_limit("basic", &basic).await.unwrap().allowed);

    for _ in 0..3 {
        assert!(limiter.check_limit("premium", &premium).await.unwrap().allowed);
    }
    assert!(!limiter.check_limit("premium", &premium).await.unwrap().allowed);
}

struct UnreachableStore;

#[async_trait]
impl CounterStore for UnreachableStore {
    async fn increment(&self, _key: &str, _window: Duration) -> Result<CounterEntry, StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }

    async fn read(&self, _key: &str) -> Result<Option<CounterEntry>, StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }

    fn name(&self) -> &'static str {
        "unreachable"
    }
}

#[tokio::test]
async fn test_quota_endpoint_when_store_is_down_and_failing_open() {
    let config = RateLimitingConfig {
        failure_policy: FailurePolicy::FailOpen,
        ..RateLimitingConfig::default()
    };
    let app = router(build_gate(&config, Arc::new(UnreachableStore)).unwrap());

    let response = app.oneshot(get("/v1/quota", Some("k"))).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["error"], "rate_limiter_unavailable");
}
