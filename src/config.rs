//! Configuration management for Tiergate.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

use crate::error::{Result, TiergateError};
use crate::ratelimit::{TierLimits, DEFAULT_KEY_PREFIX};

/// Prefix for environment variable overrides, e.g.
/// `TIERGATE__RATE_LIMITING__BACKEND=redis`.
pub const ENV_PREFIX: &str = "TIERGATE";

/// Main configuration for the Tiergate service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TiergateConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_http_addr")]
    pub http_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
        }
    }
}

fn default_http_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

/// Which counter backend to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    /// In-process counters; single instance only
    #[default]
    Memory,
    /// Shared Redis counters; safe across instances
    Redis,
}

/// What the gate does when the counter store fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Forward the request and log the failure
    #[default]
    FailOpen,
    /// Reject the request with 503
    FailClosed,
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Counter backend
    #[serde(default)]
    pub backend: StoreBackend,

    /// Redis connection URL, required for the redis backend
    #[serde(default)]
    pub redis_url: Option<String>,

    /// Namespace for Redis keys
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Seconds between sweeps of expired in-memory counters
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Behavior when the counter store is unreachable
    #[serde(default)]
    pub failure_policy: FailurePolicy,

    /// Request header carrying the credential
    #[serde(default = "default_credential_header")]
    pub credential_header: String,

    /// Path to per-credential quota rules
    #[serde(default)]
    pub rules_path: Option<String>,

    /// Limits for credentials without a rule
    #[serde(default)]
    pub default_limits: TierLimits,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            redis_url: None,
            key_prefix: default_key_prefix(),
            sweep_interval_secs: default_sweep_interval(),
            failure_policy: FailurePolicy::default(),
            credential_header: default_credential_header(),
            rules_path: None,
            default_limits: TierLimits::default(),
        }
    }
}

fn default_key_prefix() -> String {
    DEFAULT_KEY_PREFIX.to_string()
}

fn default_sweep_interval() -> u64 {
    300
}

fn default_credential_header() -> String {
    "x-api-key".to_string()
}

impl RateLimitingConfig {
    /// Interval between in-memory sweeps.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl TiergateConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: TiergateConfig = serde_yaml::from_str(&contents)
            .map_err(|e| TiergateError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from an optional file, then apply environment
    /// overrides (`TIERGATE__SECTION__FIELD`).
    pub fn load(path: Option<&str>) -> Result<Self> {
        // Seeded so a partial `default_limits` from any source keeps the
        // remaining thresholds.
        let defaults = TierLimits::default();
        let mut builder = config::Config::builder()
            .set_default("rate_limiting.default_limits.rpm", defaults.rpm)?
            .set_default("rate_limiting.default_limits.rph", defaults.rph)?
            .set_default("rate_limiting.default_limits.daily", defaults.daily)?;

        if let Some(path) = path {
            builder = builder.add_source(
                config::File::with_name(path)
                    .format(config::FileFormat::Yaml)
                    .required(true),
            );
        }

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: TiergateConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints serde cannot express.
    pub fn validate(&self) -> Result<()> {
        let rl = &self.rate_limiting;

        if rl.backend == StoreBackend::Redis && rl.redis_url.is_none() {
            return Err(TiergateError::Config(
                "redis backend requires rate_limiting.redis_url".to_string(),
            ));
        }

        if rl.sweep_interval_secs == 0 {
            return Err(TiergateError::Config(
                "rate_limiting.sweep_interval_secs must be greater than zero".to_string(),
            ));
        }

        if rl.credential_header.trim().is_empty() {
            return Err(TiergateError::Config(
                "rate_limiting.credential_header must not be empty".to_string(),
            ));
        }

        rl.default_limits.validate()
    }
}
