//! Declarative per-image update policy, as provided by collaborators.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::image::ContainerImage;
use crate::options::{ManifestOptions, Platform};
use crate::strategy::{TagMatch, UpdateStrategy, VersionConstraint};

/// The declarative policy describing how one image is tracked.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImagePolicy {
    /// The tracked image reference.
    pub image: ContainerImage,

    /// Requested platforms in `os/arch[/variant]` form.
    #[serde(default)]
    pub platforms: Vec<String>,

    /// Update strategy.
    #[serde(default)]
    pub strategy: UpdateStrategy,

    /// Allow-list match expression (`any` or `regexp:<re>`).
    #[serde(default)]
    pub allow_tags: Option<String>,

    /// Glob patterns for tags that must never be considered.
    #[serde(default)]
    pub ignore_tags: Vec<String>,

    /// Strategy-dependent constraint (semver range, calver layout, or the
    /// tracked tag for the digest strategy).
    #[serde(default)]
    pub constraint: String,

    /// Name of the pull secret to use, when credentials come from one.
    #[serde(default)]
    pub pull_secret: Option<String>,
}

impl ImagePolicy {
    /// Creates a policy for an image with defaults otherwise.
    #[must_use]
    pub fn new(image: ContainerImage) -> Self {
        Self {
            image,
            platforms: Vec::new(),
            strategy: UpdateStrategy::default(),
            allow_tags: None,
            ignore_tags: Vec::new(),
            constraint: String::new(),
            pull_secret: None,
        }
    }

    /// Sets the update strategy.
    #[must_use]
    pub const fn with_strategy(mut self, strategy: UpdateStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Sets the constraint string.
    #[must_use]
    pub fn with_constraint(mut self, constraint: impl Into<String>) -> Self {
        self.constraint = constraint.into();
        self
    }

    /// Builds the resolved [`VersionConstraint`] for this policy.
    ///
    /// # Errors
    ///
    /// Returns a [`CoreError`] when the allow-list expression or a platform
    /// string fails to parse.
    pub fn to_constraint(&self) -> Result<VersionConstraint, CoreError> {
        let match_tag = match &self.allow_tags {
            Some(expression) => TagMatch::parse(expression)?,
            None => TagMatch::Any,
        };

        let mut options = ManifestOptions::new();
        for platform in &self.platforms {
            options = options.with_platform(Platform::parse(platform)?);
        }
        if self.strategy.needs_metadata() {
            options = options.with_metadata();
        }

        Ok(VersionConstraint::new(self.strategy)
            .with_constraint(self.constraint.clone())
            .with_match(match_tag)
            .with_ignore_list(self.ignore_tags.clone())
            .with_options(options))
    }
}
