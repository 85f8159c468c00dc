//! Registry manifest payloads and resolved tag metadata.
//!
//! The client fetches manifests in any of the formats registries still
//! serve: Docker schema1 (history blob), Docker schema2 / OCI single
//! manifests (config blob reference) and multi-platform manifest lists /
//! OCI indexes. [`FetchedManifest`] keeps the canonical digest alongside the
//! parsed payload so list digests survive re-serialization.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::error::RegistryError;

/// Media type constants for the manifest formats the client understands.
pub struct MediaType;

impl MediaType {
    /// Docker schema1 signed manifest.
    pub const DOCKER_V1_SIGNED: &'static str =
        "application/vnd.docker.distribution.manifest.v1+prettyjws";

    /// Docker schema1 manifest.
    pub const DOCKER_V1: &'static str = "application/vnd.docker.distribution.manifest.v1+json";

    /// Docker schema2 manifest.
    pub const DOCKER_V2: &'static str = "application/vnd.docker.distribution.manifest.v2+json";

    /// Docker schema2 manifest list.
    pub const DOCKER_LIST: &'static str =
        "application/vnd.docker.distribution.manifest.list.v2+json";

    /// OCI image manifest.
    pub const OCI_MANIFEST: &'static str = "application/vnd.oci.image.manifest.v1+json";

    /// OCI image index.
    pub const OCI_INDEX: &'static str = "application/vnd.oci.image.index.v1+json";

    /// Accept header value offering every supported manifest format.
    pub const MANIFEST_ACCEPT: &'static str =
        "application/vnd.docker.distribution.manifest.v2+json, \
         application/vnd.docker.distribution.manifest.list.v2+json, \
         application/vnd.oci.image.manifest.v1+json, \
         application/vnd.oci.image.index.v1+json, \
         application/vnd.docker.distribution.manifest.v1+prettyjws, \
         application/vnd.docker.distribution.manifest.v1+json";
}

/// Tag list response from the `/v2/<repo>/tags/list` endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct TagList {
    /// Repository name as reported by the registry.
    #[serde(default)]
    pub name: String,

    /// Available tags.
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Docker schema1 manifest: platform inline, creation time in the history.
#[derive(Debug, Clone, Deserialize)]
pub struct SchemaV1Manifest {
    /// Architecture the image was built for.
    #[serde(default)]
    pub architecture: Option<String>,

    /// Per-layer history entries, most recent first.
    #[serde(default)]
    pub history: Vec<SchemaV1History>,
}

/// One schema1 history entry wrapping a serialized v1 image config.
#[derive(Debug, Clone, Deserialize)]
pub struct SchemaV1History {
    /// JSON-encoded v1 compatibility blob.
    #[serde(rename = "v1Compatibility")]
    pub v1_compatibility: String,
}

/// The fields of a v1 compatibility blob the engine cares about.
#[derive(Debug, Clone, Deserialize)]
pub struct V1Compatibility {
    /// Creation timestamp of the layer.
    #[serde(default)]
    pub created: Option<DateTime<Utc>>,

    /// Operating system.
    #[serde(default)]
    pub os: Option<String>,

    /// CPU architecture.
    #[serde(default)]
    pub architecture: Option<String>,
}

/// Reference to a blob within a schema2/OCI manifest.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlobReference {
    /// Media type of the referenced blob.
    #[serde(default)]
    pub media_type: Option<String>,

    /// Blob digest.
    pub digest: String,

    /// Blob size in bytes.
    #[serde(default)]
    pub size: u64,
}

/// Docker schema2 / OCI single-platform manifest.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaV2Manifest {
    /// Manifest media type, when embedded in the payload.
    #[serde(default)]
    pub media_type: Option<String>,

    /// Reference to the image config blob.
    pub config: BlobReference,
}

/// Platform descriptor within a manifest list entry.
#[derive(Debug, Clone, Deserialize)]
pub struct ManifestPlatform {
    /// Operating system.
    pub os: String,

    /// CPU architecture.
    pub architecture: String,

    /// Optional architecture variant.
    #[serde(default)]
    pub variant: Option<String>,
}

/// One platform-specific reference within a manifest list or index.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestReference {
    /// Media type of the referenced manifest.
    #[serde(default)]
    pub media_type: Option<String>,

    /// Digest of the referenced manifest.
    pub digest: String,

    /// Platform the referenced manifest targets.
    #[serde(default)]
    pub platform: Option<ManifestPlatform>,
}

/// Docker manifest list / OCI image index.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestList {
    /// List media type, when embedded in the payload.
    #[serde(default)]
    pub media_type: Option<String>,

    /// Platform-specific manifest references.
    #[serde(default)]
    pub manifests: Vec<ManifestReference>,
}

/// Image config blob referenced by a schema2/OCI manifest.
#[derive(Debug, Clone, Deserialize)]
pub struct ImageConfig {
    /// Creation timestamp of the image.
    #[serde(default)]
    pub created: Option<DateTime<Utc>>,

    /// Operating system.
    #[serde(default)]
    pub os: Option<String>,

    /// CPU architecture.
    #[serde(default)]
    pub architecture: Option<String>,

    /// Optional architecture variant.
    #[serde(default)]
    pub variant: Option<String>,
}

/// Parsed manifest payload, discriminated by wire format.
#[derive(Debug, Clone)]
pub enum ManifestKind {
    /// Docker schema1.
    SchemaV1(SchemaV1Manifest),

    /// Docker schema2 or OCI image manifest.
    SchemaV2(SchemaV2Manifest),

    /// Docker manifest list or OCI image index.
    List(ManifestList),
}

/// A manifest fetched from a registry, with its canonical digest.
#[derive(Debug, Clone)]
pub struct FetchedManifest {
    /// Media type the registry reported (or the payload embedded).
    pub media_type: String,

    /// Canonical digest: the `Docker-Content-Digest` header when present,
    /// else the sha256 of the raw body.
    pub digest: String,

    /// Parsed payload.
    pub kind: ManifestKind,
}

impl FetchedManifest {
    /// Parses a raw manifest body.
    ///
    /// The media type is taken from the `Content-Type` header when given,
    /// falling back to the `mediaType` field of the payload, falling back to
    /// structural sniffing (a `manifests` array is a list, a `config`
    /// reference is schema2, an `fsLayers`/`history` pair is schema1).
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnsupportedManifest`] for unknown media
    /// types and [`RegistryError::InvalidManifest`] for undecodable bodies.
    pub fn parse(
        header_media_type: Option<&str>,
        digest: String,
        reference: &str,
        body: &[u8],
    ) -> Result<Self, RegistryError> {
        let value: serde_json::Value =
            serde_json::from_slice(body).map_err(|e| RegistryError::InvalidManifest {
                reference: reference.to_string(),
                message: e.to_string(),
            })?;

        let media_type = header_media_type
            .map(str::to_string)
            .or_else(|| value.get("mediaType").and_then(|m| m.as_str()).map(str::to_string))
            .unwrap_or_else(|| Self::sniff_media_type(&value).to_string());

        let invalid = |e: serde_json::Error| RegistryError::InvalidManifest {
            reference: reference.to_string(),
            message: e.to_string(),
        };

        let kind = match media_type.as_str() {
            MediaType::DOCKER_LIST | MediaType::OCI_INDEX => {
                ManifestKind::List(serde_json::from_value(value).map_err(invalid)?)
            }
            MediaType::DOCKER_V2 | MediaType::OCI_MANIFEST => {
                ManifestKind::SchemaV2(serde_json::from_value(value).map_err(invalid)?)
            }
            MediaType::DOCKER_V1 | MediaType::DOCKER_V1_SIGNED => {
                ManifestKind::SchemaV1(serde_json::from_value(value).map_err(invalid)?)
            }
            other => {
                return Err(RegistryError::UnsupportedManifest {
                    media_type: other.to_string(),
                })
            }
        };

        Ok(Self {
            media_type,
            digest,
            kind,
        })
    }

    fn sniff_media_type(value: &serde_json::Value) -> &'static str {
        if value.get("manifests").is_some() {
            MediaType::DOCKER_LIST
        } else if value.get("config").is_some() {
            MediaType::DOCKER_V2
        } else {
            MediaType::DOCKER_V1
        }
    }

    /// Returns true if this is a multi-platform list or index.
    #[must_use]
    pub const fn is_list(&self) -> bool {
        matches!(self.kind, ManifestKind::List(_))
    }
}

/// Resolved tag metadata: the manifest digest and creation timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagInfo {
    /// Canonical manifest digest (`sha256:...`).
    pub digest: String,

    /// Creation timestamp of the image behind the tag.
    pub created_at: DateTime<Utc>,
}

/// Computes the sha256 digest of a manifest body.
#[must_use]
pub fn compute_digest(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("sha256:{}", hex::encode(hasher.finalize()))
}
