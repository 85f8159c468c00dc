//! Manifest inspection options: requested platforms and metadata needs.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// A target platform in `os/arch[/variant]` form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Platform {
    /// Operating system (e.g. `linux`).
    pub os: String,

    /// CPU architecture (e.g. `amd64`, `arm64`).
    pub arch: String,

    /// Optional architecture variant (e.g. `v8`).
    pub variant: Option<String>,
}

impl Platform {
    /// Parses an `os/arch[/variant]` string.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidPlatform`] when the string does not have
    /// two or three non-empty components.
    pub fn parse(input: &str) -> Result<Self, CoreError> {
        let parts: Vec<&str> = input.split('/').collect();
        let invalid = || CoreError::InvalidPlatform {
            platform: input.to_string(),
        };

        match parts.as_slice() {
            [os, arch] if !os.is_empty() && !arch.is_empty() => Ok(Self {
                os: (*os).to_string(),
                arch: (*arch).to_string(),
                variant: None,
            }),
            [os, arch, variant] if !os.is_empty() && !arch.is_empty() && !variant.is_empty() => {
                Ok(Self {
                    os: (*os).to_string(),
                    arch: (*arch).to_string(),
                    variant: Some((*variant).to_string()),
                })
            }
            _ => Err(invalid()),
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.os, self.arch)?;
        if let Some(variant) = &self.variant {
            write!(f, "/{variant}")?;
        }
        Ok(())
    }
}

/// Options controlling which manifests are inspected and how.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManifestOptions {
    /// Requested platform set. Empty means no restriction.
    pub platforms: Vec<Platform>,

    /// Whether manifest metadata (creation time, platform) must be fetched.
    pub metadata_required: bool,
}

impl ManifestOptions {
    /// Creates options with no platform restriction.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a requested platform.
    #[must_use]
    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platforms.push(platform);
        self
    }

    /// Marks manifest metadata as required.
    #[must_use]
    pub const fn with_metadata(mut self) -> Self {
        self.metadata_required = true;
        self
    }

    /// Returns true if a manifest for the given platform is wanted.
    ///
    /// An empty platform set matches everything. A request or manifest
    /// without a variant matches any variant of the same `os/arch`.
    #[must_use]
    pub fn wants_platform(&self, os: &str, arch: &str, variant: Option<&str>) -> bool {
        if self.platforms.is_empty() {
            return true;
        }
        self.platforms.iter().any(|p| {
            p.os == os
                && p.arch == arch
                && match (&p.variant, variant) {
                    (Some(requested), Some(actual)) => requested == actual,
                    _ => true,
                }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_parse() {
        let p = Platform::parse("linux/amd64").unwrap();
        assert_eq!(p.os, "linux");
        assert_eq!(p.arch, "amd64");
        assert!(p.variant.is_none());

        let p = Platform::parse("linux/arm64/v8").unwrap();
        assert_eq!(p.variant.as_deref(), Some("v8"));
    }

    #[test]
    fn test_platform_parse_invalid() {
        assert!(Platform::parse("linux").is_err());
        assert!(Platform::parse("linux/").is_err());
        assert!(Platform::parse("a/b/c/d").is_err());
    }

    #[test]
    fn test_wants_platform_empty_set_matches_all() {
        let opts = ManifestOptions::new();
        assert!(opts.wants_platform("linux", "amd64", None));
        assert!(opts.wants_platform("windows", "arm64", Some("v8")));
    }

    #[test]
    fn test_wants_platform_exact_match() {
        let opts = ManifestOptions::new().with_platform(Platform::parse("linux/amd64").unwrap());
        assert!(opts.wants_platform("linux", "amd64", None));
        assert!(!opts.wants_platform("linux", "arm64", None));
    }

    #[test]
    fn test_wants_platform_variant_relaxed() {
        let opts = ManifestOptions::new().with_platform(Platform::parse("linux/arm64").unwrap());
        // Request without variant accepts any variant.
        assert!(opts.wants_platform("linux", "arm64", Some("v8")));

        let opts = Platform::parse("linux/arm64/v8")
            .map(|p| ManifestOptions::new().with_platform(p))
            .unwrap();
        // Manifest without variant is accepted by a variant-ed request.
        assert!(opts.wants_platform("linux", "arm64", None));
        assert!(!opts.wants_platform("linux", "arm64", Some("v7")));
    }

    #[test]
    fn test_platform_display() {
        assert_eq!(Platform::parse("linux/amd64").unwrap().to_string(), "linux/amd64");
        assert_eq!(
            Platform::parse("linux/arm64/v8").unwrap().to_string(),
            "linux/arm64/v8"
        );
    }
}
