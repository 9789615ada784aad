//! HTTP service wiring.
//!
//! Builds the counter backend, the gate and a small API behind it. Routes:
//!
//! - `GET /health`: liveness, never rate limited
//! - `GET /v1/ping`: trivial gated endpoint
//! - `GET /v1/quota`: the caller's current consumption per tier (gated)

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use tracing::{error, info, warn};

use crate::config::{RateLimitingConfig, StoreBackend};
use crate::error::{Result, TiergateError};
use crate::middleware::{gate_requests, HeaderCredential, RateLimitGate, ResolvedCredential};
use crate::ratelimit::{CounterStore, MemoryStore, QuotaRules, RateLimiter, RedisStore, SweepHandle};

/// The counter store chosen by configuration.
pub struct Backend {
    /// The store shared by every request
    pub store: Arc<dyn CounterStore>,
    /// Sweeper of the in-memory store, if one is running
    pub sweeper: Option<SweepHandle>,
}

impl Backend {
    /// Stop background work owned by the backend.
    pub fn shutdown(&self) {
        if let Some(sweeper) = &self.sweeper {
            sweeper.shutdown();
        }
    }
}

/// Build the configured counter store.
///
/// Must be called from within a tokio runtime.
pub async fn build_backend(config: &RateLimitingConfig) -> Result<Backend> {
    match config.backend {
        StoreBackend::Memory => {
            let store = Arc::new(MemoryStore::new());
            let sweeper = store.spawn_sweeper(config.sweep_interval());
            info!(
                sweep_interval_secs = config.sweep_interval_secs,
                "Using in-memory counter store"
            );
            warn!("In-memory counters are not shared between instances");
            Ok(Backend {
                store,
                sweeper: Some(sweeper),
            })
        }
        StoreBackend::Redis => {
            let url = config.redis_url.as_deref().ok_or_else(|| {
                TiergateError::Config("redis backend requires rate_limiting.redis_url".to_string())
            })?;
            let store = RedisStore::connect(url, config.key_prefix.clone()).await?;
            Ok(Backend {
                store: Arc::new(store),
                sweeper: None,
            })
        }
    }
}

/// Build the gate from configuration.
pub fn build_gate(config: &RateLimitingConfig, store: Arc<dyn CounterStore>) -> Result<RateLimitGate> {
    let rules = match &config.rules_path {
        Some(path) => QuotaRules::from_file(path)?,
        None => QuotaRules::new(config.default_limits),
    };
    info!(
        overrides = rules.credentials.len(),
        default_rpm = rules.default.rpm,
        default_rph = rules.default.rph,
        default_daily = rules.default.daily,
        "Quota rules loaded"
    );

    let credentials = HeaderCredential::new(&config.credential_header)?;
    let limiter = Arc::new(RateLimiter::new(store));

    Ok(RateLimitGate::new(limiter, credentials, rules).with_failure_policy(config.failure_policy))
}

/// The service router with the gate applied to `/v1`.
pub fn router(gate: RateLimitGate) -> Router {
    let limiter = gate.limiter().clone();

    let api = Router::new()
        .route("/v1/ping", get(ping))
        .route("/v1/quota", get(quota))
        .with_state(limiter)
        .layer(axum::middleware::from_fn_with_state(gate, gate_requests));

    Router::new()
        .route("/health", get(|| async { "OK" }))
        .merge(api)
}

async fn ping() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn quota(State(limiter): State<Arc<RateLimiter>>, request: Request) -> Response {
    let Some(resolved) = request.extensions().get::<ResolvedCredential>() else {
        return (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({ "error": "missing_credential" })),
        )
            .into_response();
    };

    match limiter.usage(&resolved.id, &resolved.limits).await {
        Ok(usage) => Json(usage).into_response(),
        Err(e) => {
            error!(credential = %resolved.id, error = %e, "Failed to read usage");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({ "error": "rate_limiter_unavailable" })),
            )
                .into_response()
        }
    }
}

/// HTTP server for the gated API.
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    /// The application router
    router: Router,
}

impl HttpServer {
    /// Create a new server.
    pub fn new(addr: SocketAddr, router: Router) -> Self {
        Self { addr, router }
    }

    /// Serve until `signal` resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = tokio::net::TcpListener::bind(self.addr).await?;

        info!(addr = %self.addr, "Starting HTTP server");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(signal)
            .await
            .map_err(|e| {
                error!(error = %e, "HTTP server failed");
                TiergateError::Io(e)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_backend_starts_sweeper() {
        let backend = build_backend(&RateLimitingConfig::default()).await.unwrap();

        assert_eq!(backend.store.name(), "memory");
        assert!(backend.sweeper.as_ref().unwrap().is_running());

        backend.shutdown();
        assert!(!backend.sweeper.as_ref().unwrap().is_running());
    }

    #[tokio::test]
    async fn test_redis_backend_requires_url() {
        let config = RateLimitingConfig {
            backend: StoreBackend::Redis,
            ..RateLimitingConfig::default()
        };

        assert!(build_backend(&config).await.is_err());
    }

    #[tokio::test]
    async fn test_build_gate_rejects_missing_rules_file() {
        let config = RateLimitingConfig {
            rules_path: Some("/nonexistent/tiergate-rules.yaml".to_string()),
            ..RateLimitingConfig::default()
        };

        let result = build_gate(&config, Arc::new(MemoryStore::new()));
        assert!(matches!(result, Err(TiergateError::Io(_))));
    }
}
