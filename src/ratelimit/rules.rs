//! Per-credential quota rules.
//!
//! Rules are a YAML document with a default set of tier limits and optional
//! overrides keyed by credential:
//!
//! ```yaml
//! default:
//!   rpm: 60
//!   rph: 1000
//!   daily: 10000
//! credentials:
//!   key_premium:
//!     rpm: 600
//!     rph: 20000
//!     daily: 200000
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

use super::limiter::TierLimits;
use crate::error::{Result, TiergateError};

/// Tier limits for every known credential plus a fallback.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuotaRules {
    /// Limits applied to credentials without an override
    #[serde(default)]
    pub default: TierLimits,
    /// Map of credential to its limits
    #[serde(default)]
    pub credentials: HashMap<String, TierLimits>,
}

impl QuotaRules {
    /// Rules that apply `default` to every credential.
    pub fn new(default: TierLimits) -> Self {
        Self {
            default,
            credentials: HashMap::new(),
        }
    }

    /// Add or replace the override for one credential.
    pub fn with_credential(mut self, credential: impl Into<String>, limits: TierLimits) -> Self {
        self.credentials.insert(credential.into(), limits);
        self
    }

    /// Load rules from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading quota rules");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load rules from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let rules: QuotaRules = serde_yaml::from_str(yaml)
            .map_err(|e| TiergateError::Config(format!("Failed to parse quota rules: {}", e)))?;
        rules.validate()?;
        Ok(rules)
    }

    /// Reject any zero threshold, naming the offending credential.
    pub fn validate(&self) -> Result<()> {
        self.default
            .validate()
            .map_err(|e| TiergateError::Config(format!("default: {}", e)))?;

        for (credential, limits) in &self.credentials {
            limits
                .validate()
                .map_err(|e| TiergateError::Config(format!("credential {}: {}", credential, e)))?;
        }
        Ok(())
    }

    /// The limits that apply to `credential`.
    pub fn limits_for(&self, credential: &str) -> TierLimits {
        self.credentials
            .get(credential)
            .copied()
            .unwrap_or(self.default)
    }
}
