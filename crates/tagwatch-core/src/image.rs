//! Container image reference parsing.
//!
//! References follow the usual `[registry/]repository[:tag][@digest]` form.
//! The first path component is treated as a registry host only when it
//! contains a dot or a port, or is `localhost`, the same heuristic that
//! container tooling applies.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// A parsed container image reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerImage {
    /// Registry host (e.g. `ghcr.io`), when the reference names one.
    pub registry_url: Option<String>,

    /// Repository name without the registry part (e.g. `org/app`).
    pub name: String,

    /// Tag component, when present.
    pub tag_name: Option<String>,

    /// Digest component, when present (`sha256:...`).
    pub digest: Option<String>,
}

impl ContainerImage {
    /// Parses an image reference string.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidImageReference`] when the repository part
    /// is empty.
    pub fn parse(reference: &str) -> Result<Self, CoreError> {
        let invalid = |reason: &str| CoreError::InvalidImageReference {
            reference: reference.to_string(),
            reason: reason.to_string(),
        };

        let (rest, digest) = match reference.split_once('@') {
            Some((rest, digest)) if !digest.is_empty() => (rest, Some(digest.to_string())),
            Some(_) => return Err(invalid("empty digest")),
            None => (reference, None),
        };

        // Only a colon after the last slash separates a tag; earlier colons
        // belong to a registry port.
        let (rest, tag_name) = match rest.rsplit_once(':') {
            Some((head, tag)) if !tag.contains('/') => {
                if tag.is_empty() {
                    return Err(invalid("empty tag"));
                }
                (head, Some(tag.to_string()))
            }
            _ => (rest, None),
        };

        let (registry_url, name) = match rest.split_once('/') {
            Some((first, remainder)) if is_registry_host(first) => {
                (Some(first.to_string()), remainder.to_string())
            }
            _ => (None, rest.to_string()),
        };

        if name.is_empty() {
            return Err(invalid("empty repository name"));
        }

        Ok(Self {
            registry_url,
            name,
            tag_name,
            digest,
        })
    }

    /// Key used for endpoint lookup: `registry/name`, or just the name when
    /// no registry is part of the reference.
    #[must_use]
    pub fn endpoint_key(&self) -> String {
        match &self.registry_url {
            Some(registry) => format!("{registry}/{}", self.name),
            None => self.name.clone(),
        }
    }
}

impl std::fmt::Display for ContainerImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(registry) = &self.registry_url {
            write!(f, "{registry}/")?;
        }
        write!(f, "{}", self.name)?;
        if let Some(tag) = &self.tag_name {
            write!(f, ":{tag}")?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{digest}")?;
        }
        Ok(())
    }
}

fn is_registry_host(segment: &str) -> bool {
    segment == "localhost" || segment.contains('.') || segment.contains(':')
}
