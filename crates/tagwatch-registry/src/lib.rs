//! # Tagwatch Registry
//!
//! Registry access layer for Tagwatch: talks to arbitrary container
//! registries safely under concurrency and bounds the blast radius of that
//! work.
//!
//! - **Endpoints**: a process-wide table of registry endpoints with
//!   longest-prefix lookup, credential caching and per-endpoint throttling.
//! - **Transports**: shared, janitor-swept HTTP clients per
//!   `(API URL, TLS mode)` so connections are reused.
//! - **Client**: a per-repository façade over tags, manifests and tag
//!   metadata, with bearer-token handshakes, bounded retries and
//!   single-flight deduplication of identical in-flight work.
//! - **Health**: a sliding-window detector for ephemeral-port exhaustion,
//!   surfaced as a boolean for liveness probes.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tagwatch_core::ContainerImage;
//! use tagwatch_registry::{EndpointConfig, RegistryContext, StaticSecretStore};
//!
//! # async fn run() -> Result<(), tagwatch_registry::RegistryError> {
//! let context = RegistryContext::new(Arc::new(StaticSecretStore::new()));
//! context
//!     .endpoints()
//!     .add_endpoint(EndpointConfig::new("ghcr", "ghcr.io", "https://ghcr.io"));
//!
//! let image = ContainerImage::parse("ghcr.io/org/app").unwrap();
//! let client = context.client_for(&image).await?;
//! let tags = client.tags().await?;
//! # Ok(())
//! # }
//! ```

mod auth;
mod client;
mod config;
mod context;
mod credentials;
mod endpoint;
mod error;
mod exhaustion;
mod limiter;
mod manifest;
pub mod metrics;
mod retry;
mod singleflight;
mod tagcache;
mod transport;

pub use auth::{BearerChallenge, BearerToken, TokenCache, TokenResponse};
pub use client::{FlightGroups, RegistryClient};
pub use config::{load_registries, parse_duration, RegistryList, RegistryRecord};
pub use context::RegistryContext;
pub use credentials::{CredentialSource, Credentials, SecretStore, StaticSecretStore};
pub use endpoint::{EndpointConfig, EndpointRegistry, RegistryEndpoint, TagSortMode};
pub use error::{RegistryError, Result};
pub use exhaustion::{PortExhaustionDetector, DEFAULT_THRESHOLD, DEFAULT_WINDOW};
pub use limiter::{InflightGate, InflightPermit, RateLimiter, DEFAULT_INFLIGHT_LIMIT};
pub use manifest::{
    compute_digest, BlobReference, FetchedManifest, ImageConfig, ManifestKind, ManifestList,
    ManifestPlatform, ManifestReference, MediaType, SchemaV1History, SchemaV1Manifest,
    SchemaV2Manifest, TagInfo, TagList, V1Compatibility,
};
pub use retry::RetryPolicy;
pub use singleflight::{FlightGroup, FlightKey, FlightResult};
pub use tagcache::TagCache;
pub use transport::{SharedTransport, TransportCache, DEFAULT_MAX_IDLE, DEFAULT_SWEEP_INTERVAL};
