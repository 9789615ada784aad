//! Counter key generation.

use super::tier::LimitType;

/// A key that uniquely identifies one tier counter for one credential.
///
/// The string form is `{credential}:{tier}`, e.g. `cred1:rpm`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CounterKey {
    /// The credential the counter is scoped to
    pub credential: String,
    /// The tier this counter tracks
    pub tier: LimitType,
}

impl CounterKey {
    /// Create a new counter key.
    pub fn new(credential: &str, tier: LimitType) -> Self {
        Self {
            credential: credential.to_string(),
            tier,
        }
    }

    /// Convert the key to the string stored in a counter backend.
    pub fn to_string_key(&self) -> String {
        format!("{}:{}", self.credential, self.tier.as_str())
    }
}

impl std::fmt::Display for CounterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_string_key())
    }
}
