//! Bearer-token authentication for the registry challenge/token handshake.
//!
//! A registry answering 401 with a `WWW-Authenticate: Bearer` header names a
//! token service; the client fetches a token there and retries. Tokens are
//! cached per `(API URL, repository)` so repeated calls reuse them instead
//! of re-authenticating.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Deserialize;

/// A parsed `WWW-Authenticate: Bearer` challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BearerChallenge {
    /// Token service URL.
    pub realm: String,

    /// Service identifier to pass along.
    pub service: Option<String>,

    /// Scope the token must cover.
    pub scope: Option<String>,
}

impl BearerChallenge {
    /// Parses the header value, returning `None` for non-bearer challenges.
    #[must_use]
    pub fn parse(header: &str) -> Option<Self> {
        let params = header.trim().strip_prefix("Bearer ")?;

        let mut realm = None;
        let mut service = None;
        let mut scope = None;
        for part in params.split(',') {
            let (key, value) = part.trim().split_once('=')?;
            let value = value.trim_matches('"').to_string();
            match key.trim() {
                "realm" => realm = Some(value),
                "service" => service = Some(value),
                "scope" => scope = Some(value),
                _ => {}
            }
        }

        Some(Self {
            realm: realm?,
            service,
            scope,
        })
    }
}

/// A bearer token obtained from a registry token service.
#[derive(Debug, Clone)]
pub struct BearerToken {
    /// The token value.
    pub token: String,

    /// Advertised lifetime in seconds, when the service reports one.
    pub expires_in: Option<u64>,

    /// Issue timestamp, when the service reports one.
    pub issued_at: Option<DateTime<Utc>>,
}

/// Token service response body.
///
/// Docker-style services return `token`, OAuth2-style ones `access_token`.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    /// Docker-style token field.
    #[serde(default)]
    pub token: Option<String>,

    /// OAuth2-style token field.
    #[serde(default)]
    pub access_token: Option<String>,

    /// Advertised lifetime in seconds.
    #[serde(default)]
    pub expires_in: Option<u64>,

    /// Issue timestamp.
    #[serde(default)]
    pub issued_at: Option<DateTime<Utc>>,
}

impl TokenResponse {
    /// Extracts the token value, whichever field carries it.
    #[must_use]
    pub fn into_token(self) -> Option<BearerToken> {
        let token = self.token.or(self.access_token)?;
        if token.is_empty() {
            return None;
        }
        Some(BearerToken {
            token,
            expires_in: self.expires_in,
            issued_at: self.issued_at,
        })
    }
}

/// Cache of bearer tokens per `(API URL, repository)`.
#[derive(Debug, Default)]
pub struct TokenCache {
    tokens: RwLock<HashMap<(String, String), BearerToken>>,
}

impl TokenCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached token for a repository, if any.
    #[must_use]
    pub fn get(&self, api_url: &str, repository: &str) -> Option<BearerToken> {
        self.tokens
            .read()
            .get(&(api_url.to_string(), repository.to_string()))
            .cloned()
    }

    /// Stores a token for a repository.
    pub fn put(&self, api_url: &str, repository: &str, token: BearerToken) {
        self.tokens
            .write()
            .insert((api_url.to_string(), repository.to_string()), token);
    }

    /// Drops every cached token.
    pub fn clear(&self) {
        self.tokens.write().clear();
    }

    /// Number of cached tokens.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tokens.read().len()
    }

    /// Returns true if no tokens are cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tokens.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_challenge() {
        let challenge = BearerChallenge::parse(
            r#"Bearer realm="https://auth.docker.io/token",service="registry.docker.io",scope="repository:library/nginx:pull""#,
        )
        .unwrap();

        assert_eq!(challenge.realm, "https://auth.docker.io/token");
        assert_eq!(challenge.service.as_deref(), Some("registry.docker.io"));
        assert_eq!(
            challenge.scope.as_deref(),
            Some("repository:library/nginx:pull")
        );
    }

    #[test]
    fn test_parse_realm_only() {
        let challenge =
            BearerChallenge::parse(r#"Bearer realm="https://auth.example.com/token""#).unwrap();
        assert!(challenge.service.is_none());
        assert!(challenge.scope.is_none());
    }

    #[test]
    fn test_parse_rejects_basic_challenge() {
        assert!(BearerChallenge::parse(r#"Basic realm="registry""#).is_none());
        assert!(BearerChallenge::parse("Bearer service=\"x\"").is_none());
    }

    #[test]
    fn test_token_response_field_fallback() {
        let docker: TokenResponse =
            serde_json::from_str(r#"{"token":"abc","expires_in":300}"#).unwrap();
        let token = docker.into_token().unwrap();
        assert_eq!(token.token, "abc");
        assert_eq!(token.expires_in, Some(300));

        let oauth: TokenResponse = serde_json::from_str(r#"{"access_token":"xyz"}"#).unwrap();
        assert_eq!(oauth.into_token().unwrap().token, "xyz");

        let empty: TokenResponse = serde_json::from_str(r"{}").unwrap();
        assert!(empty.into_token().is_none());
    }

    #[test]
    fn test_token_cache_keyed_by_repository() {
        let cache = TokenCache::new();
        cache.put(
            "https://ghcr.io",
            "org/app",
            BearerToken {
                token: "abc".to_string(),
                expires_in: None,
                issued_at: None,
            },
        );

        assert_eq!(cache.get("https://ghcr.io", "org/app").unwrap().token, "abc");
        assert!(cache.get("https://ghcr.io", "org/other").is_none());
        assert!(cache.get("https://quay.io", "org/app").is_none());

        cache.clear();
        assert!(cache.is_empty());
    }
}
