//! Registry endpoints and the process-wide endpoint registry.
//!
//! An endpoint is long-lived: it carries the API URL, credential source,
//! throttling state and tag cache for one registry prefix. Endpoints are
//! looked up by longest matching prefix against `registry/image` keys;
//! unknown registry hosts are inferred as HTTPS endpoints and registered on
//! first use. Endpoints are never removed during the process lifetime, only
//! the credentials inside them expire and refresh.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};

use crate::credentials::{CredentialSource, Credentials, SecretStore};
use crate::error::{RegistryError, Result};
use crate::limiter::{InflightGate, RateLimiter, DEFAULT_INFLIGHT_LIMIT};
use crate::tagcache::TagCache;

/// How a registry orders its tag-list responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TagSortMode {
    /// No ordering guarantee.
    #[default]
    Unsorted,

    /// Newest tags first; normalized back to push order by the client.
    LatestFirst,

    /// Oldest tags first.
    LatestLast,
}

impl TagSortMode {
    /// Parses a configuration value: `none`, `latest-first`, `latest-last`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::ConfigError`] for unknown modes.
    pub fn parse(input: &str) -> Result<Self> {
        match input {
            "" | "none" => Ok(Self::Unsorted),
            "latest-first" => Ok(Self::LatestFirst),
            "latest-last" => Ok(Self::LatestLast),
            other => Err(RegistryError::ConfigError {
                message: format!("unknown tag sort mode '{other}'"),
            }),
        }
    }
}

/// Static configuration for one registry endpoint.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    /// Human-readable registry name, used in logs and metrics.
    pub name: String,

    /// Prefix this endpoint serves (`ghcr.io`, `foo.bar/team`).
    pub prefix: String,

    /// Registry API base URL.
    pub api_url: String,

    /// Where credentials come from.
    pub credentials: CredentialSource,

    /// Whether TLS certificate verification is disabled.
    pub insecure: bool,

    /// Namespace prepended to bare repository names.
    pub default_namespace: Option<String>,

    /// Requests per second; zero means unlimited.
    pub limit: u32,

    /// Cap on concurrent requests.
    pub inflight_limit: usize,

    /// How long resolved credentials stay fresh; `None` means forever.
    pub creds_expire: Option<Duration>,

    /// Tag-list ordering the registry guarantees.
    pub tag_sort_mode: TagSortMode,

    /// Whether the engine should ping the endpoint before first use.
    pub ping: bool,

    /// Whether this endpoint serves images without a registry host.
    pub is_default: bool,
}

impl EndpointConfig {
    /// Creates a configuration with defaults beyond the identifying fields.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        prefix: impl Into<String>,
        api_url: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            prefix: prefix.into(),
            api_url: api_url.into(),
            credentials: CredentialSource::Anonymous,
            insecure: false,
            default_namespace: None,
            limit: 0,
            inflight_limit: DEFAULT_INFLIGHT_LIMIT,
            creds_expire: None,
            tag_sort_mode: TagSortMode::Unsorted,
            ping: false,
            is_default: false,
        }
    }

    /// Infers an HTTPS endpoint for an unknown registry host.
    #[must_use]
    pub fn infer(host: &str) -> Self {
        Self::new(host, host, format!("https://{host}"))
    }

    /// Sets the credential source.
    #[must_use]
    pub fn with_credentials(mut self, credentials: CredentialSource) -> Self {
        self.credentials = credentials;
        self
    }

    /// Sets the request rate limit in requests per second.
    #[must_use]
    pub const fn with_limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }

    /// Sets the credential expiry window.
    #[must_use]
    pub const fn with_creds_expire(mut self, expire: Duration) -> Self {
        self.creds_expire = Some(expire);
        self
    }

    /// Sets the tag sort mode.
    #[must_use]
    pub const fn with_tag_sort_mode(mut self, mode: TagSortMode) -> Self {
        self.tag_sort_mode = mode;
        self
    }

    /// Marks this endpoint as the default for images without a registry.
    #[must_use]
    pub const fn as_default(mut self) -> Self {
        self.is_default = true;
        self
    }
}

#[derive(Debug, Default)]
struct CredentialState {
    credentials: Option<Credentials>,
    updated_at: Option<Instant>,
}

/// A long-lived registry endpoint.
#[derive(Debug)]
pub struct RegistryEndpoint {
    /// Human-readable registry name.
    pub name: String,

    /// Prefix this endpoint serves.
    pub prefix: String,

    /// Registry API base URL.
    pub api_url: String,

    /// Whether TLS certificate verification is disabled.
    pub insecure: bool,

    /// Namespace prepended to bare repository names.
    pub default_namespace: Option<String>,

    /// Tag-list ordering the registry guarantees.
    pub tag_sort_mode: TagSortMode,

    /// Whether the engine should ping the endpoint before first use.
    pub ping: bool,

    credential_source: RwLock<CredentialSource>,
    creds_expire: Option<Duration>,
    creds: Mutex<CredentialState>,
    refresh_lock: tokio::sync::Mutex<()>,
    limiter: RateLimiter,
    inflight: InflightGate,
    tag_cache: TagCache,
    is_default: AtomicBool,
}

impl RegistryEndpoint {
    fn from_config(config: EndpointConfig) -> Self {
        let limiter = RateLimiter::per_second(config.limit);
        let inflight = InflightGate::new(config.inflight_limit, config.name.clone());
        Self {
            name: config.name,
            prefix: config.prefix,
            api_url: config.api_url,
            insecure: config.insecure,
            default_namespace: config.default_namespace,
            tag_sort_mode: config.tag_sort_mode,
            ping: config.ping,
            credential_source: RwLock::new(config.credentials),
            creds_expire: config.creds_expire,
            creds: Mutex::new(CredentialState::default()),
            refresh_lock: tokio::sync::Mutex::new(()),
            limiter,
            inflight,
            tag_cache: TagCache::new(),
            is_default: AtomicBool::new(config.is_default),
        }
    }

    /// Per-endpoint rate limiter.
    #[must_use]
    pub const fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Per-endpoint in-flight gate.
    #[must_use]
    pub const fn inflight(&self) -> &InflightGate {
        &self.inflight
    }

    /// Per-endpoint resolved-tag cache.
    #[must_use]
    pub const fn tag_cache(&self) -> &TagCache {
        &self.tag_cache
    }

    /// Whether this endpoint serves images without a registry host.
    #[must_use]
    pub fn is_default(&self) -> bool {
        self.is_default.load(Ordering::SeqCst)
    }

    /// Host portion of the API URL, used to select pull-secret entries.
    #[must_use]
    pub fn api_host(&self) -> String {
        url::Url::parse(&self.api_url)
            .ok()
            .and_then(|u| {
                u.host_str().map(|host| match u.port() {
                    Some(port) => format!("{host}:{port}"),
                    None => host.to_string(),
                })
            })
            .unwrap_or_else(|| self.api_url.clone())
    }

    /// Where this endpoint's credentials come from.
    #[must_use]
    pub fn credential_source(&self) -> CredentialSource {
        self.credential_source.read().clone()
    }

    /// Currently cached credentials, if any have been resolved.
    #[must_use]
    pub fn credentials(&self) -> Option<Credentials> {
        self.creds.lock().credentials.clone()
    }

    fn credentials_expired(&self) -> bool {
        let state = self.creds.lock();
        match (state.updated_at, self.creds_expire) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(updated), Some(expire)) => updated.elapsed() >= expire,
        }
    }

    /// Refreshes credentials from their source when the cached ones have
    /// expired; a no-op otherwise.
    ///
    /// Concurrent callers during an expiry window are collapsed onto one
    /// resolution: the refresh runs under a per-endpoint async lock with the
    /// expiry re-checked after acquisition.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::CredentialResolution`] when the source
    /// cannot be read; the previously cached credentials are kept.
    pub async fn refresh_credentials(&self, store: &dyn SecretStore) -> Result<()> {
        if !self.credentials_expired() {
            return Ok(());
        }

        let _guard = self.refresh_lock.lock().await;
        if !self.credentials_expired() {
            return Ok(());
        }

        let source = self.credential_source();
        let resolved = source.resolve(store, &self.api_host()).await?;
        let mut state = self.creds.lock();
        state.credentials = resolved;
        state.updated_at = Some(Instant::now());
        tracing::debug!(registry = %self.name, source = %source, "refreshed registry credentials");
        Ok(())
    }
}

/// Process-wide table of registry endpoints, keyed by prefix.
///
/// An explicit owned component: tests construct isolated instances instead
/// of sharing package-level state.
#[derive(Debug, Default)]
pub struct EndpointRegistry {
    endpoints: RwLock<HashMap<String, Arc<RegistryEndpoint>>>,
}

impl EndpointRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an endpoint, replacing any existing one for the prefix.
    ///
    /// At most one endpoint is the default at a time: registering a new
    /// default clears the flag on every other endpoint.
    pub fn add_endpoint(&self, config: EndpointConfig) -> Arc<RegistryEndpoint> {
        let mut endpoints = self.endpoints.write();
        if config.is_default {
            for endpoint in endpoints.values() {
                endpoint.is_default.store(false, Ordering::SeqCst);
            }
        }
        let prefix = config.prefix.clone();
        let endpoint = Arc::new(RegistryEndpoint::from_config(config));
        endpoints.insert(prefix, endpoint.clone());
        endpoint
    }

    /// Returns the endpoint whose prefix matches the image key best.
    ///
    /// Exact and longest-prefix matches (at `/` boundaries) win; an unknown
    /// registry host is inferred as `https://<host>` and registered; a key
    /// without a registry host falls back to the default endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NoEndpoint`] when the key names no registry
    /// and no default endpoint is configured.
    pub fn get_endpoint(&self, image_key: &str) -> Result<Arc<RegistryEndpoint>> {
        {
            let endpoints = self.endpoints.read();
            let mut best: Option<&Arc<RegistryEndpoint>> = None;
            for (prefix, endpoint) in endpoints.iter() {
                if prefix_matches(prefix, image_key)
                    && best.is_none_or(|b| prefix.len() > b.prefix.len())
                {
                    best = Some(endpoint);
                }
            }
            if let Some(endpoint) = best {
                return Ok(endpoint.clone());
            }
        }

        let Some(host) = registry_host(image_key) else {
            return self
                .default_endpoint()
                .ok_or_else(|| RegistryError::NoEndpoint {
                    image: image_key.to_string(),
                });
        };

        let mut endpoints = self.endpoints.write();
        if let Some(existing) = endpoints.get(host) {
            return Ok(existing.clone());
        }
        let endpoint = Arc::new(RegistryEndpoint::from_config(EndpointConfig::infer(host)));
        tracing::info!(prefix = host, "inferred new registry endpoint");
        endpoints.insert(host.to_string(), endpoint.clone());
        Ok(endpoint)
    }

    /// Returns the current default endpoint, if one is configured.
    #[must_use]
    pub fn default_endpoint(&self) -> Option<Arc<RegistryEndpoint>> {
        self.endpoints
            .read()
            .values()
            .find(|endpoint| endpoint.is_default())
            .cloned()
    }

    /// Makes the endpoint registered for `prefix` the default.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NoEndpoint`] when no endpoint is registered
    /// for the prefix.
    pub fn set_default(&self, prefix: &str) -> Result<()> {
        let endpoints = self.endpoints.write();
        let target = endpoints
            .get(prefix)
            .ok_or_else(|| RegistryError::NoEndpoint {
                image: prefix.to_string(),
            })?
            .clone();
        for endpoint in endpoints.values() {
            endpoint.is_default.store(false, Ordering::SeqCst);
        }
        target.is_default.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Replaces the credential source of the endpoint registered for
    /// `prefix` and marks its cached credentials as expired, so the next
    /// refresh resolves the new source.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NoEndpoint`] when no endpoint is registered
    /// for the prefix.
    pub fn set_credentials(&self, prefix: &str, source: CredentialSource) -> Result<()> {
        let endpoints = self.endpoints.read();
        let endpoint = endpoints
            .get(prefix)
            .ok_or_else(|| RegistryError::NoEndpoint {
                image: prefix.to_string(),
            })?;
        *endpoint.credential_source.write() = source;
        endpoint.creds.lock().updated_at = None;
        Ok(())
    }

    /// Number of registered endpoints.
    #[must_use]
    pub fn len(&self) -> usize {
        self.endpoints.read().len()
    }

    /// Returns true if no endpoints are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.endpoints.read().is_empty()
    }

    /// Registered prefixes, unsorted.
    #[must_use]
    pub fn prefixes(&self) -> Vec<String> {
        self.endpoints.read().keys().cloned().collect()
    }
}

/// A prefix matches at `/` boundaries only, so `foo.bar/prefix1` never
/// captures `foo.bar/prefix12/image`.
fn prefix_matches(prefix: &str, image_key: &str) -> bool {
    let trimmed = prefix.trim_end_matches('/');
    image_key == trimmed
        || image_key
            .strip_prefix(trimmed)
            .is_some_and(|rest| rest.starts_with('/'))
}

/// First path segment of the key when it names a registry host.
fn registry_host(image_key: &str) -> Option<&str> {
    let first = image_key.split('/').next().unwrap_or(image_key);
    (first == "localhost" || first.contains('.') || first.contains(':')).then_some(first)
}
