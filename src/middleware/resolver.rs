//! Credential and limit lookups injected into the gate.

use async_trait::async_trait;
use axum::http::header::{HeaderName, AUTHORIZATION};
use axum::http::request::Parts;

use crate::error::{Result, TiergateError};
use crate::ratelimit::{QuotaRules, TierLimits};

/// Finds the credential a request should be counted against.
///
/// Returning `None` exempts the request from rate limiting.
#[async_trait]
pub trait CredentialResolver: Send + Sync {
    async fn resolve_credential(&self, parts: &Parts) -> Option<String>;
}

/// Finds the tier limits for a resolved credential.
#[async_trait]
pub trait LimitsResolver: Send + Sync {
    async fn resolve_limits(&self, credential: &str, parts: &Parts) -> TierLimits;
}

#[async_trait]
impl<F> CredentialResolver for F
where
    F: Fn(&Parts) -> Option<String> + Send + Sync,
{
    async fn resolve_credential(&self, parts: &Parts) -> Option<String> {
        self(parts)
    }
}

#[async_trait]
impl<F> LimitsResolver for F
where
    F: Fn(&str, &Parts) -> TierLimits + Send + Sync,
{
    async fn resolve_limits(&self, credential: &str, parts: &Parts) -> TierLimits {
        self(credential, parts)
    }
}

/// Reads the credential from a request header.
#[derive(Debug, Clone)]
pub struct HeaderCredential {
    header: HeaderName,
    strip_bearer: bool,
}

impl HeaderCredential {
    /// Use the value of `header` as the credential.
    pub fn new(header: &str) -> Result<Self> {
        let header = HeaderName::try_from(header.trim())
            .map_err(|e| TiergateError::Config(format!("invalid credential header {:?}: {}", header, e)))?;
        let strip_bearer = header == AUTHORIZATION;
        Ok(Self {
            header,
            strip_bearer,
        })
    }

    /// Strip a leading `Bearer ` scheme from the header value.
    ///
    /// Enabled automatically for the `Authorization` header.
    pub fn strip_bearer(mut self, strip: bool) -> Self {
        self.strip_bearer = strip;
        self
    }

    /// The header being read.
    pub fn header(&self) -> &HeaderName {
        &self.header
    }
}

#[async_trait]
impl CredentialResolver for HeaderCredential {
    async fn resolve_credential(&self, parts: &Parts) -> Option<String> {
        let value = parts.headers.get(&self.header)?.to_str().ok()?.trim();

        let value = if self.strip_bearer {
            match value.get(..7) {
                Some(scheme) if scheme.eq_ignore_ascii_case("bearer ") => value[7..].trim(),
                _ => value,
            }
        } else {
            value
        };

        if value.is_empty() {
            None
        } else {
            Some(value.to_string())
        }
    }
}

/// The same limits for every credential.
#[derive(Debug, Clone, Copy)]
pub struct StaticLimits(pub TierLimits);

#[async_trait]
impl LimitsResolver for StaticLimits {
    async fn resolve_limits(&self, _credential: &str, _parts: &Parts) -> TierLimits {
        self.0
    }
}

#[async_trait]
impl LimitsResolver for QuotaRules {
    async fn resolve_limits(&self, credential: &str, _parts: &Parts) -> TierLimits {
        self.limits_for(credential)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn parts_with(name: &str, value: &str) -> Parts {
        let (parts, _) = Request::builder()
            .header(name, value)
            .body(())
            .unwrap()
            .into_parts();
        parts
    }

    fn empty_parts() -> Parts {
        Request::builder().body(()).unwrap().into_parts().0
    }

    #[tokio::test]
    async fn test_header_credential() {
        let resolver = HeaderCredential::new("x-api-key").unwrap();

        let parts = parts_with("x-api-key", " key_123 ");
        assert_eq!(resolver.resolve_credential(&parts).await, Some("key_123".to_string()));

        assert_eq!(resolver.resolve_credential(&empty_parts()).await, None);
        assert_eq!(resolver.resolve_credential(&parts_with("x-api-key", "  ")).await, None);
    }

    #[tokio::test]
    async fn test_authorization_header_strips_bearer() {
        let resolver = HeaderCredential::new("Authorization").unwrap();

        let parts = parts_with("authorization", "Bearer tok_abc");
        assert_eq!(resolver.resolve_credential(&parts).await, Some("tok_abc".to_string()));

        let parts = parts_with("authorization", "bearer   ");
        assert_eq!(resolver.resolve_credential(&parts).await, None);
    }

    #[tokio::test]
    async fn test_bearer_left_alone_for_custom_header() {
        let resolver = HeaderCredential::new("x-api-key").unwrap();
        let parts = parts_with("x-api-key", "Bearer tok_abc");

        assert_eq!(
            resolver.resolve_credential(&parts).await,
            Some("Bearer tok_abc".to_string())
        );
    }

    #[test]
    fn test_invalid_header_name_rejected() {
        assert!(HeaderCredential::new("bad header").is_err());
    }

    #[tokio::test]
    async fn test_closure_resolvers() {
        let credentials = |parts: &Parts| parts.uri.query().map(|q| q.to_string());
        let limits = |_: &str, _: &Parts| TierLimits::new(1, 2, 3).unwrap();

        let (parts, _) = Request::builder()
            .uri("/path?abc")
            .body(())
            .unwrap()
            .into_parts();

        assert_eq!(credentials.resolve_credential(&parts).await, Some("abc".to_string()));
        assert_eq!(limits.resolve_limits("abc", &parts).await.rph, 2);
    }

    #[tokio::test]
    async fn test_quota_rules_resolver() {
        let rules = QuotaRules::new(TierLimits::default())
            .with_credential("vip", TierLimits::new(100, 200, 300).unwrap());

        let limits = rules.resolve_limits("vip", &empty_parts()).await;
        assert_eq!(limits.rpm, 100);

        let limits = rules.resolve_limits("other", &empty_parts()).await;
        assert_eq!(limits, TierLimits::default());
    }
}
