//! The registry context: one explicit handle over all shared registry
//! state.
//!
//! Collaborators receive a [`RegistryContext`] instead of reaching for
//! process-wide globals, so tests construct isolated instances and a
//! configuration reload swaps state in one place.

use std::sync::Arc;

use tagwatch_core::ContainerImage;

use crate::auth::TokenCache;
use crate::client::{FlightGroups, RegistryClient};
use crate::credentials::SecretStore;
use crate::endpoint::EndpointRegistry;
use crate::error::Result;
use crate::exhaustion::PortExhaustionDetector;
use crate::retry::RetryPolicy;
use crate::transport::TransportCache;

/// Shared registry state: endpoints, transports, caches, single-flight
/// groups and the port-exhaustion detector.
pub struct RegistryContext {
    endpoints: Arc<EndpointRegistry>,
    transports: Arc<TransportCache>,
    detector: Arc<PortExhaustionDetector>,
    flights: Arc<FlightGroups>,
    tokens: Arc<TokenCache>,
    secret_store: Arc<dyn SecretStore>,
    retry: RetryPolicy,
    token_retry: RetryPolicy,
}

impl RegistryContext {
    /// Creates a context with default policies and empty state.
    #[must_use]
    pub fn new(secret_store: Arc<dyn SecretStore>) -> Self {
        Self {
            endpoints: Arc::new(EndpointRegistry::new()),
            transports: Arc::new(TransportCache::new()),
            detector: Arc::new(PortExhaustionDetector::new()),
            flights: Arc::new(FlightGroups::default()),
            tokens: Arc::new(TokenCache::new()),
            secret_store,
            retry: RetryPolicy::data_fetch(),
            token_retry: RetryPolicy::token_fetch(),
        }
    }

    /// Overrides the data-fetch retry policy for clients built here.
    #[must_use]
    pub const fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Overrides the token-fetch retry policy for clients built here.
    #[must_use]
    pub const fn with_token_retry(mut self, retry: RetryPolicy) -> Self {
        self.token_retry = retry;
        self
    }

    /// Overrides the port-exhaustion detector (tests use tight windows).
    #[must_use]
    pub fn with_detector(mut self, detector: PortExhaustionDetector) -> Self {
        self.detector = Arc::new(detector);
        self
    }

    /// The endpoint registry.
    #[must_use]
    pub fn endpoints(&self) -> &EndpointRegistry {
        &self.endpoints
    }

    /// The shared transport cache.
    #[must_use]
    pub const fn transports(&self) -> &Arc<TransportCache> {
        &self.transports
    }

    /// The port-exhaustion detector.
    #[must_use]
    pub fn detector(&self) -> &PortExhaustionDetector {
        &self.detector
    }

    /// Health signal for liveness probes: true when outbound dials have
    /// been failing with `EADDRNOTAVAIL` beyond the detector's threshold.
    #[must_use]
    pub fn is_port_exhaustion_degraded(&self) -> bool {
        self.detector.is_degraded()
    }

    /// Builds a client for the image's repository.
    ///
    /// Resolves the endpoint by longest-prefix match, refreshes its
    /// credentials when expired and attaches the shared transport.
    ///
    /// # Errors
    ///
    /// Returns a [`crate::RegistryError`] when no endpoint can be resolved,
    /// credentials fail to refresh, or the transport cannot be built.
    pub async fn client_for(&self, image: &ContainerImage) -> Result<RegistryClient> {
        let endpoint = self.endpoints.get_endpoint(&image.endpoint_key())?;
        endpoint
            .refresh_credentials(self.secret_store.as_ref())
            .await?;
        let transport = self.transports.get(&endpoint.api_url, endpoint.insecure)?;
        Ok(RegistryClient::new_repository(
            endpoint,
            transport,
            self.flights.clone(),
            self.tokens.clone(),
            self.detector.clone(),
            &image.name,
        )
        .with_retry(self.retry)
        .with_token_retry(self.token_retry))
    }

    /// Starts the periodic sweep of idle transports.
    ///
    /// The janitor stops on its own once the transport cache is dropped.
    pub fn start_transport_janitor(
        &self,
        interval: std::time::Duration,
        max_idle: std::time::Duration,
    ) -> tokio::task::JoinHandle<()> {
        self.transports.start_janitor(interval, max_idle)
    }

    /// Clears transports and cached tokens, e.g. on configuration reload.
    /// Endpoints stay registered; their tag caches are left intact.
    pub fn clear_caches(&self) {
        self.transports.clear();
        self.tokens.clear();
    }
}

impl std::fmt::Debug for RegistryContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryContext")
            .field("endpoints", &self.endpoints.len())
            .field("transports", &self.transports.len())
            .field("degraded", &self.detector.is_degraded())
            .finish_non_exhaustive()
    }
}
