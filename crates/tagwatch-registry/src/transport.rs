//! Shared HTTP transports, cached per endpoint.
//!
//! Transports are keyed by `(API URL, insecure flag)` so repeated requests
//! against the same registry reuse pooled TCP/TLS connections. A janitor
//! task sweeps transports that have sat idle past a threshold; dropping the
//! last reference to a transport closes its pooled connections.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};

use crate::error::{RegistryError, Result};

/// Default idle time after which the janitor drops a transport.
pub const DEFAULT_MAX_IDLE: Duration = Duration::from_secs(300);

/// Default janitor sweep interval.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// A tuned HTTP client shared by every request to one registry endpoint.
#[derive(Debug)]
pub struct SharedTransport {
    client: reqwest::Client,
    api_url: String,
    insecure: bool,
    last_used: Mutex<Instant>,
}

impl SharedTransport {
    fn new(api_url: &str, insecure: bool) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(10)
            .connect_timeout(Duration::from_secs(10))
            .user_agent(concat!("tagwatch/", env!("CARGO_PKG_VERSION")));

        if insecure {
            builder = builder.danger_accept_invalid_certs(true);
        }

        let client = builder.build().map_err(|e| RegistryError::ConnectionFailed {
            url: api_url.to_string(),
            source: e,
        })?;

        Ok(Self {
            client,
            api_url: api_url.to_string(),
            insecure,
            last_used: Mutex::new(Instant::now()),
        })
    }

    /// Returns the HTTP client, marking the transport as recently used.
    pub fn client(&self) -> &reqwest::Client {
        *self.last_used.lock() = Instant::now();
        &self.client
    }

    /// Registry API URL this transport targets.
    #[must_use]
    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Whether certificate verification is disabled.
    #[must_use]
    pub const fn insecure(&self) -> bool {
        self.insecure
    }

    /// How long the transport has been idle.
    #[must_use]
    pub fn idle_for(&self) -> Duration {
        self.last_used.lock().elapsed()
    }
}

/// Process-wide cache of shared transports.
#[derive(Debug, Default)]
pub struct TransportCache {
    transports: RwLock<HashMap<(String, bool), Arc<SharedTransport>>>,
}

impl TransportCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the transport for an endpoint, creating it on first use.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::ConnectionFailed`] when the HTTP client
    /// cannot be constructed.
    pub fn get(&self, api_url: &str, insecure: bool) -> Result<Arc<SharedTransport>> {
        let key = (api_url.to_string(), insecure);
        if let Some(transport) = self.transports.read().get(&key) {
            return Ok(transport.clone());
        }

        let mut transports = self.transports.write();
        if let Some(transport) = transports.get(&key) {
            return Ok(transport.clone());
        }
        let transport = Arc::new(SharedTransport::new(api_url, insecure)?);
        transports.insert(key, transport.clone());
        tracing::debug!(api_url, insecure, "created shared transport");
        Ok(transport)
    }

    /// Number of cached transports.
    #[must_use]
    pub fn len(&self) -> usize {
        self.transports.read().len()
    }

    /// Returns true if no transports are cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.transports.read().is_empty()
    }

    /// Drops every cached transport, closing idle pooled connections.
    pub fn clear(&self) {
        self.transports.write().clear();
    }

    /// Drops transports idle past `max_idle`; returns how many were removed.
    pub fn sweep(&self, max_idle: Duration) -> usize {
        let mut transports = self.transports.write();
        let before = transports.len();
        transports.retain(|_, transport| transport.idle_for() <= max_idle);
        before - transports.len()
    }

    /// Starts the periodic janitor for this cache.
    ///
    /// The task holds only a weak reference: dropping the cache stops the
    /// janitor on its next tick.
    pub fn start_janitor(
        self: &Arc<Self>,
        interval: Duration,
        max_idle: Duration,
    ) -> tokio::task::JoinHandle<()> {
        let cache = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(cache) = cache.upgrade() else { break };
                let removed = cache.sweep(max_idle);
                if removed > 0 {
                    tracing::debug!(removed, "swept idle registry transports");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transports_are_reused_per_key() {
        let cache = TransportCache::new();
        let first = cache.get("https://registry.example.com", false).unwrap();
        let second = cache.get("https://registry.example.com", false).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_insecure_flag_is_part_of_the_key() {
        let cache = TransportCache::new();
        let secure = cache.get("https://registry.example.com", false).unwrap();
        let insecure = cache.get("https://registry.example.com", true).unwrap();
        assert!(!Arc::ptr_eq(&secure, &insecure));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_clear_empties_the_cache() {
        let cache = TransportCache::new();
        cache.get("https://a.example.com", false).unwrap();
        cache.get("https://b.example.com", false).unwrap();
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_sweep_removes_only_idle_transports() {
        let cache = TransportCache::new();
        let busy = cache.get("https://busy.example.com", false).unwrap();
        cache.get("https://idle.example.com", false).unwrap();

        std::thread::sleep(Duration::from_millis(30));
        let _ = busy.client();

        let removed = cache.sweep(Duration::from_millis(20));
        assert_eq!(removed, 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_janitor_stops_when_cache_dropped() {
        let cache = Arc::new(TransportCache::new());
        let janitor = cache.start_janitor(Duration::from_millis(5), Duration::from_secs(60));

        drop(cache);
        tokio::time::timeout(Duration::from_millis(200), janitor)
            .await
            .expect("janitor should exit after the cache is dropped")
            .unwrap();
    }
}
