//! Per-repository registry client.
//!
//! A client is short-lived: one is constructed per `(endpoint, repository)`
//! resolution and owns no state beyond references to the endpoint, its
//! shared transport and the process-wide single-flight groups. Every
//! outbound request passes through the endpoint's rate limiter and in-flight
//! gate; tag-list, manifest and bearer-token fetches are deduplicated so
//! concurrent resolutions of the same repository share one network call.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt};
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, WWW_AUTHENTICATE};
use reqwest::StatusCode;

use tagwatch_core::ManifestOptions;

use crate::auth::{BearerChallenge, BearerToken, TokenCache, TokenResponse};
use crate::endpoint::{RegistryEndpoint, TagSortMode};
use crate::error::{RegistryError, Result};
use crate::exhaustion::PortExhaustionDetector;
use crate::manifest::{
    compute_digest, FetchedManifest, ImageConfig, ManifestKind, MediaType, SchemaV1Manifest,
    SchemaV2Manifest, TagInfo, TagList, V1Compatibility,
};
use crate::metrics;
use crate::retry::RetryPolicy;
use crate::singleflight::{FlightGroup, FlightKey};
use crate::transport::SharedTransport;

/// The process-wide single-flight groups shared by every client.
#[derive(Debug, Default)]
pub struct FlightGroups {
    /// Tag-list fetches.
    pub tags: FlightGroup<Vec<String>>,

    /// Manifest fetches.
    pub manifests: FlightGroup<FetchedManifest>,

    /// Bearer-token fetches.
    pub tokens: FlightGroup<BearerToken>,
}

/// Client for one repository on one registry endpoint.
#[derive(Debug, Clone)]
pub struct RegistryClient {
    endpoint: Arc<RegistryEndpoint>,
    transport: Arc<SharedTransport>,
    flights: Arc<FlightGroups>,
    tokens: Arc<TokenCache>,
    detector: Arc<PortExhaustionDetector>,
    repository: String,
    retry: RetryPolicy,
    token_retry: RetryPolicy,
}

impl RegistryClient {
    /// Creates a client for a repository.
    ///
    /// A bare repository name (no `/`) is qualified with the endpoint's
    /// default namespace when one is configured.
    #[must_use]
    pub fn new_repository(
        endpoint: Arc<RegistryEndpoint>,
        transport: Arc<SharedTransport>,
        flights: Arc<FlightGroups>,
        tokens: Arc<TokenCache>,
        detector: Arc<PortExhaustionDetector>,
        name: &str,
    ) -> Self {
        let repository = match &endpoint.default_namespace {
            Some(namespace) if !name.contains('/') => format!("{namespace}/{name}"),
            _ => name.to_string(),
        };
        Self {
            endpoint,
            transport,
            flights,
            tokens,
            detector,
            repository,
            retry: RetryPolicy::data_fetch(),
            token_retry: RetryPolicy::token_fetch(),
        }
    }

    /// Overrides the data-fetch retry policy.
    #[must_use]
    pub const fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Overrides the token-fetch retry policy.
    #[must_use]
    pub const fn with_token_retry(mut self, retry: RetryPolicy) -> Self {
        self.token_retry = retry;
        self
    }

    /// The endpoint this client talks to.
    #[must_use]
    pub const fn endpoint(&self) -> &Arc<RegistryEndpoint> {
        &self.endpoint
    }

    /// Fully qualified repository name.
    #[must_use]
    pub fn repository(&self) -> &str {
        &self.repository
    }

    /// Stable key identifying this repository across clients, used for
    /// cycle-level memoization.
    #[must_use]
    pub fn cache_key(&self) -> String {
        format!("{}/{}", self.endpoint.api_url, self.repository)
    }

    /// Checks that the registry's API endpoint is reachable.
    ///
    /// Any HTTP response counts as reachable; registries commonly answer the
    /// base endpoint with 401 until a token is presented.
    ///
    /// # Errors
    ///
    /// Returns a transport-level [`RegistryError`] when no response arrives.
    pub async fn ping(&self) -> Result<()> {
        let url = format!("{}/v2/", self.endpoint.api_url);
        self.issue(&url, None, self.cached_auth()).await.map(|_| ())
    }

    /// Lists the repository's tags.
    ///
    /// Concurrent callers for the same repository share one fetch. A 404
    /// yields an empty list. Registries declaring `latest-first` ordering
    /// are normalized back to ascending push order.
    ///
    /// # Errors
    ///
    /// Returns the leader's error after bounded retries.
    pub async fn tags(&self) -> Result<Vec<String>> {
        let key = FlightKey::Tags {
            registry: self.endpoint.api_url.clone(),
            repository: self.repository.clone(),
        };
        let leader = self.clone();
        self.flights
            .tags
            .run(key, async move { leader.fetch_tags().await })
            .await
            .map_err(RegistryError::from_shared)
    }

    /// Fetches the manifest behind a tag.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::ManifestNotFound`] for unknown tags.
    pub async fn manifest_for_tag(&self, tag: &str) -> Result<FetchedManifest> {
        self.manifest(tag).await
    }

    /// Fetches the manifest behind a digest.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::ManifestNotFound`] for unknown digests.
    pub async fn manifest_for_digest(&self, digest: &str) -> Result<FetchedManifest> {
        self.manifest(digest).await
    }

    /// Resolves creation metadata for a manifest.
    ///
    /// Single manifests yield their config's creation time; manifest lists
    /// recurse into every platform-matching reference and keep the most
    /// recent creation timestamp, so multi-arch images compare by their
    /// most recently pushed architecture. A manifest that matches none of
    /// the requested platforms yields `Ok(None)` and the caller skips it.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InvalidManifest`] for malformed payloads
    /// and transport errors for failed child fetches.
    pub fn tag_metadata<'a>(
        &'a self,
        manifest: &'a FetchedManifest,
        options: &'a ManifestOptions,
    ) -> BoxFuture<'a, Result<Option<TagInfo>>> {
        async move {
            match &manifest.kind {
                ManifestKind::SchemaV1(v1) => self.schema1_metadata(manifest, v1, options),
                ManifestKind::SchemaV2(v2) => self.schema2_metadata(manifest, v2, options).await,
                ManifestKind::List(list) => {
                    let mut newest: Option<DateTime<Utc>> = None;
                    for reference in &list.manifests {
                        if let Some(platform) = &reference.platform {
                            if !options.wants_platform(
                                &platform.os,
                                &platform.architecture,
                                platform.variant.as_deref(),
                            ) {
                                continue;
                            }
                        }
                        let child = self.manifest_for_digest(&reference.digest).await?;
                        if let Some(info) = self.tag_metadata(&child, options).await? {
                            newest = Some(
                                newest.map_or(info.created_at, |current| {
                                    current.max(info.created_at)
                                }),
                            );
                        }
                    }
                    Ok(newest.map(|created_at| TagInfo {
                        digest: manifest.digest.clone(),
                        created_at,
                    }))
                }
            }
        }
        .boxed()
    }

    fn schema1_metadata(
        &self,
        manifest: &FetchedManifest,
        v1: &SchemaV1Manifest,
        options: &ManifestOptions,
    ) -> Result<Option<TagInfo>> {
        let first = v1
            .history
            .first()
            .ok_or_else(|| RegistryError::InvalidManifest {
                reference: manifest.digest.clone(),
                message: "schema1 manifest has an empty history".to_string(),
            })?;
        let compat: V1Compatibility = serde_json::from_str(&first.v1_compatibility)?;

        let os = compat.os.as_deref().unwrap_or("linux");
        let arch = compat
            .architecture
            .as_deref()
            .or(v1.architecture.as_deref())
            .unwrap_or_default();
        if !options.wants_platform(os, arch, None) {
            return Ok(None);
        }

        Ok(Some(TagInfo {
            digest: manifest.digest.clone(),
            created_at: compat.created.unwrap_or(DateTime::UNIX_EPOCH),
        }))
    }

    async fn schema2_metadata(
        &self,
        manifest: &FetchedManifest,
        v2: &SchemaV2Manifest,
        options: &ManifestOptions,
    ) -> Result<Option<TagInfo>> {
        let body = self.fetch_blob(&v2.config.digest).await?;
        let config: ImageConfig = serde_json::from_slice(&body)?;

        let os = config.os.as_deref().unwrap_or_default();
        let arch = config.architecture.as_deref().unwrap_or_default();
        if !options.wants_platform(os, arch, config.variant.as_deref()) {
            return Ok(None);
        }

        Ok(Some(TagInfo {
            digest: manifest.digest.clone(),
            created_at: config.created.unwrap_or(DateTime::UNIX_EPOCH),
        }))
    }

    async fn manifest(&self, reference: &str) -> Result<FetchedManifest> {
        let key = FlightKey::Manifest {
            registry: self.endpoint.api_url.clone(),
            repository: self.repository.clone(),
            reference: reference.to_string(),
        };
        let leader = self.clone();
        let leader_reference = reference.to_string();
        self.flights
            .manifests
            .run(key, async move {
                leader.fetch_manifest(&leader_reference).await
            })
            .await
            .map_err(RegistryError::from_shared)
    }

    async fn fetch_tags(&self) -> Result<Vec<String>> {
        let tags = self
            .retry
            .run("list tags", || {
                let client = self.clone();
                async move {
                    let url = format!(
                        "{}/v2/{}/tags/list",
                        client.endpoint.api_url, client.repository
                    );
                    let response = client.authorized_get(&url, None).await?;
                    if response.status() == StatusCode::NOT_FOUND {
                        return Ok(Vec::new());
                    }
                    if !response.status().is_success() {
                        return Err(RegistryError::HttpError {
                            status: response.status().as_u16(),
                            message: response.text().await.unwrap_or_default(),
                        });
                    }
                    let list: TagList = response.json().await?;
                    Ok(list.tags)
                }
            })
            .await?;

        Ok(match self.endpoint.tag_sort_mode {
            TagSortMode::LatestFirst => tags.into_iter().rev().collect(),
            TagSortMode::Unsorted | TagSortMode::LatestLast => tags,
        })
    }

    async fn fetch_manifest(&self, reference: &str) -> Result<FetchedManifest> {
        self.retry
            .run("fetch manifest", || {
                let client = self.clone();
                let reference = reference.to_string();
                async move {
                    let url = format!(
                        "{}/v2/{}/manifests/{}",
                        client.endpoint.api_url, client.repository, reference
                    );
                    let response = client
                        .authorized_get(&url, Some(MediaType::MANIFEST_ACCEPT))
                        .await?;
                    if response.status() == StatusCode::NOT_FOUND {
                        return Err(RegistryError::ManifestNotFound {
                            repository: client.repository.clone(),
                            reference: reference.clone(),
                        });
                    }
                    if !response.status().is_success() {
                        return Err(RegistryError::HttpError {
                            status: response.status().as_u16(),
                            message: response.text().await.unwrap_or_default(),
                        });
                    }

                    let media_type = response
                        .headers()
                        .get(CONTENT_TYPE)
                        .and_then(|v| v.to_str().ok())
                        .map(|v| v.split(';').next().unwrap_or(v).trim().to_string());
                    let header_digest = response
                        .headers()
                        .get("docker-content-digest")
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string);
                    let body = response.bytes().await?;
                    let digest = header_digest.unwrap_or_else(|| compute_digest(&body));
                    FetchedManifest::parse(media_type.as_deref(), digest, &reference, &body)
                }
            })
            .await
    }

    async fn fetch_blob(&self, digest: &str) -> Result<Vec<u8>> {
        self.retry
            .run("fetch blob", || {
                let client = self.clone();
                let digest = digest.to_string();
                async move {
                    let url = format!(
                        "{}/v2/{}/blobs/{}",
                        client.endpoint.api_url, client.repository, digest
                    );
                    let response = client.authorized_get(&url, None).await?;
                    if !response.status().is_success() {
                        return Err(RegistryError::HttpError {
                            status: response.status().as_u16(),
                            message: response.text().await.unwrap_or_default(),
                        });
                    }
                    Ok(response.bytes().await?.to_vec())
                }
            })
            .await
    }

    /// Issues a request with cached auth, performing the bearer handshake
    /// once when the registry answers with a challenge.
    async fn authorized_get(&self, url: &str, accept: Option<&str>) -> Result<reqwest::Response> {
        let response = self.issue(url, accept, self.cached_auth()).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        let Some(challenge) = response
            .headers()
            .get(WWW_AUTHENTICATE)
            .and_then(|v| v.to_str().ok())
            .and_then(BearerChallenge::parse)
        else {
            // No bearer challenge to answer; surface the 401 as-is.
            return Ok(response);
        };

        let token = self.obtain_token(&challenge).await?;
        self.issue(url, accept, Some(format!("Bearer {}", token.token)))
            .await
    }

    fn cached_auth(&self) -> Option<String> {
        if let Some(token) = self.tokens.get(&self.endpoint.api_url, &self.repository) {
            return Some(format!("Bearer {}", token.token));
        }
        self.endpoint
            .credentials()
            .map(|credentials| credentials.basic_auth())
    }

    async fn obtain_token(&self, challenge: &BearerChallenge) -> Result<BearerToken> {
        let key = FlightKey::Token {
            registry: self.endpoint.api_url.clone(),
            service: challenge.service.clone().unwrap_or_default(),
            scope: challenge.scope.clone().unwrap_or_default(),
        };
        let leader = self.clone();
        let leader_challenge = challenge.clone();
        let token = self
            .flights
            .tokens
            .run(key, async move {
                leader.fetch_token(&leader_challenge).await
            })
            .await
            .map_err(RegistryError::from_shared)?;
        self.tokens
            .put(&self.endpoint.api_url, &self.repository, token.clone());
        Ok(token)
    }

    async fn fetch_token(&self, challenge: &BearerChallenge) -> Result<BearerToken> {
        self.token_retry
            .run("fetch bearer token", || {
                let client = self.clone();
                let challenge = challenge.clone();
                async move { client.fetch_token_once(&challenge).await }
            })
            .await
    }

    async fn fetch_token_once(&self, challenge: &BearerChallenge) -> Result<BearerToken> {
        let mut url = url::Url::parse(&challenge.realm).map_err(|e| {
            RegistryError::AuthenticationFailed {
                message: format!("invalid token realm '{}': {e}", challenge.realm),
            }
        })?;
        {
            let mut query = url.query_pairs_mut();
            if let Some(service) = &challenge.service {
                query.append_pair("service", service);
            }
            if let Some(scope) = &challenge.scope {
                query.append_pair("scope", scope);
            }
        }

        let auth = self
            .endpoint
            .credentials()
            .map(|credentials| credentials.basic_auth());
        let started = Instant::now();
        let outcome = self.token_request(url.as_str(), auth).await;
        metrics::TOKEN_FETCH_DURATION
            .with_label_values(&[&self.endpoint.name])
            .observe(started.elapsed().as_secs_f64());
        match &outcome {
            Ok(token) => {
                metrics::TOKEN_FETCHES
                    .with_label_values(&[&self.endpoint.name, "success"])
                    .inc();
                if let Some(ttl) = token.expires_in {
                    metrics::TOKEN_TTL
                        .with_label_values(&[&self.endpoint.name])
                        .observe(ttl as f64);
                }
            }
            Err(error) => {
                metrics::TOKEN_FETCHES
                    .with_label_values(&[&self.endpoint.name, error.class()])
                    .inc();
            }
        }
        outcome
    }

    async fn token_request(&self, url: &str, auth: Option<String>) -> Result<BearerToken> {
        let response = self.issue(url, None, auth).await?;
        if !response.status().is_success() {
            return Err(RegistryError::HttpError {
                status: response.status().as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }
        let body: TokenResponse = response.json().await?;
        body.into_token()
            .ok_or_else(|| RegistryError::AuthenticationFailed {
                message: "token service returned no token".to_string(),
            })
    }

    /// Sends one request through the endpoint's limiter and in-flight gate.
    async fn issue(
        &self,
        url: &str,
        accept: Option<&str>,
        auth: Option<String>,
    ) -> Result<reqwest::Response> {
        let waited = self.endpoint.limiter().take().await;
        if waited > Duration::ZERO {
            metrics::RATE_LIMIT_WAITS
                .with_label_values(&[&self.endpoint.name])
                .inc();
        }
        let _permit = self.endpoint.inflight().acquire().await?;

        let mut request = self.transport.client().get(url).header(ACCEPT, accept.unwrap_or("*/*"));
        if let Some(auth) = auth {
            request = request.header(AUTHORIZATION, auth);
        }

        let started = Instant::now();
        let result = request.send().await;
        metrics::REQUEST_DURATION
            .with_label_values(&[&self.endpoint.name])
            .observe(started.elapsed().as_secs_f64());
        match result {
            Ok(response) => {
                metrics::REQUESTS_TOTAL
                    .with_label_values(&[&self.endpoint.name, response.status().as_str()])
                    .inc();
                Ok(response)
            }
            Err(error) => {
                metrics::REQUESTS_TOTAL
                    .with_label_values(&[&self.endpoint.name, "error"])
                    .inc();
                self.detector.record(&error);
                Err(error.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::{EndpointConfig, EndpointRegistry};
    use crate::transport::TransportCache;

    fn client_for(config: EndpointConfig, name: &str) -> RegistryClient {
        let registry = EndpointRegistry::new();
        let endpoint = registry.add_endpoint(config);
        let transports = TransportCache::new();
        let transport = transports.get(&endpoint.api_url, endpoint.insecure).unwrap();
        RegistryClient::new_repository(
            endpoint,
            transport,
            Arc::new(FlightGroups::default()),
            Arc::new(TokenCache::new()),
            Arc::new(PortExhaustionDetector::new()),
            name,
        )
    }

    #[test]
    fn test_default_namespace_qualifies_bare_names() {
        let mut config = EndpointConfig::new("hub", "docker.io", "https://registry-1.docker.io");
        config.default_namespace = Some("library".to_string());

        let client = client_for(config, "nginx");
        assert_eq!(client.repository(), "library/nginx");
    }

    #[test]
    fn test_default_namespace_leaves_qualified_names() {
        let mut config = EndpointConfig::new("hub", "docker.io", "https://registry-1.docker.io");
        config.default_namespace = Some("library".to_string());

        let client = client_for(config, "org/app");
        assert_eq!(client.repository(), "org/app");
    }

    #[test]
    fn test_cache_key_includes_registry_and_repository() {
        let client = client_for(EndpointConfig::new("ghcr", "ghcr.io", "https://ghcr.io"), "org/app");
        assert_eq!(client.cache_key(), "https://ghcr.io/org/app");
    }
}
