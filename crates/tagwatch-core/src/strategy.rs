//! Update strategies and constraint-driven tag resolution.
//!
//! A [`VersionConstraint`] carries everything needed to pick the newest
//! allowed tag for one image: the strategy, an optional range or layout in
//! `constraint`, an allow-list matcher and an ignore glob list. Resolution is
//! a pure function of its inputs; "nothing eligible" is `Ok(None)`, never an
//! error.

use serde::{Deserialize, Serialize};

use crate::calver::CalverLayout;
use crate::error::CoreError;
use crate::options::ManifestOptions;
use crate::tag::{ImageTag, ImageTagList};
use crate::version::{SemVersion, VersionRange};

/// How candidate tags are ranked and filtered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UpdateStrategy {
    /// Highest semantic version wins; `constraint` may hold a range.
    #[default]
    SemVer,

    /// Most recently built image wins; requires per-tag creation metadata.
    NewestBuild,

    /// Lexically greatest tag wins.
    Alphabetical,

    /// Track the digest behind the single tag named by `constraint`.
    Digest,

    /// Calendar versions matching the layout in `constraint`; lexical rank.
    CalVer,
}

impl UpdateStrategy {
    /// Whether per-tag manifest metadata must be fetched for this strategy.
    #[must_use]
    pub const fn needs_metadata(self) -> bool {
        matches!(self, Self::NewestBuild | Self::Digest)
    }

    /// Whether `constraint` must be non-empty for this strategy.
    #[must_use]
    pub const fn needs_version_constraint(self) -> bool {
        matches!(self, Self::Digest | Self::CalVer)
    }

    /// Whether only the tag literally named by `constraint` is of interest.
    #[must_use]
    pub const fn wants_only_constraint_tag(self) -> bool {
        matches!(self, Self::Digest)
    }

    /// Whether resolved tag metadata may be cached across cycles.
    ///
    /// The digest strategy is never cacheable: the digest behind the tag is
    /// the very thing being compared.
    #[must_use]
    pub const fn is_cacheable(self) -> bool {
        !matches!(self, Self::Digest)
    }

    /// Strategy name as used in policies and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SemVer => "semver",
            Self::NewestBuild => "newest-build",
            Self::Alphabetical => "alphabetical",
            Self::Digest => "digest",
            Self::CalVer => "calver",
        }
    }
}

impl std::fmt::Display for UpdateStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Tag allow-list matcher, replacing the source's function-typed matcher.
#[derive(Debug, Clone, Default)]
pub enum TagMatch {
    /// Every tag is allowed.
    #[default]
    Any,

    /// No tag is allowed.
    None,

    /// Tags matching the regular expression are allowed.
    Regexp(regex::Regex),
}

impl TagMatch {
    /// Parses a match expression: `any`, or `regexp:<re>`.
    ///
    /// Unknown options degrade to [`TagMatch::None`] with a warning so a
    /// typo in a policy cannot silently admit every tag.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidMatchExpression`] when the regular
    /// expression fails to compile.
    pub fn parse(expression: &str) -> Result<Self, CoreError> {
        if expression.is_empty() || expression == "any" {
            return Ok(Self::Any);
        }
        if let Some(pattern) = expression.strip_prefix("regexp:") {
            let re = regex::Regex::new(pattern).map_err(|e| CoreError::InvalidMatchExpression {
                expression: expression.to_string(),
                reason: e.to_string(),
            })?;
            return Ok(Self::Regexp(re));
        }

        tracing::warn!(expression, "unknown tag match option, matching no tags");
        Ok(Self::None)
    }

    /// Returns true if the tag name passes the matcher.
    #[must_use]
    pub fn matches(&self, tag: &str) -> bool {
        match self {
            Self::Any => true,
            Self::None => false,
            Self::Regexp(re) => re.is_match(tag),
        }
    }
}

/// The per-image update policy used to resolve the newest allowed tag.
#[derive(Debug, Clone, Default)]
pub struct VersionConstraint {
    /// Strategy-dependent constraint: a semver range, a calver layout, or
    /// the tracked tag name for the digest strategy.
    pub constraint: String,

    /// Ranking and filtering strategy.
    pub strategy: UpdateStrategy,

    /// Allow-list matcher applied to every tag name.
    pub match_tag: TagMatch,

    /// Glob patterns for tags that must never be considered.
    pub ignore_list: Vec<String>,

    /// Manifest inspection options.
    pub options: ManifestOptions,
}

impl VersionConstraint {
    /// Creates a constraint with the given strategy and defaults otherwise.
    #[must_use]
    pub fn new(strategy: UpdateStrategy) -> Self {
        Self {
            strategy,
            ..Self::default()
        }
    }

    /// Sets the constraint string.
    #[must_use]
    pub fn with_constraint(mut self, constraint: impl Into<String>) -> Self {
        self.constraint = constraint.into();
        self
    }

    /// Sets the allow-list matcher.
    #[must_use]
    pub fn with_match(mut self, match_tag: TagMatch) -> Self {
        self.match_tag = match_tag;
        self
    }

    /// Sets the ignore glob list.
    #[must_use]
    pub fn with_ignore_list(mut self, ignore_list: Vec<String>) -> Self {
        self.ignore_list = ignore_list;
        self
    }

    /// Sets the manifest options.
    #[must_use]
    pub fn with_options(mut self, options: ManifestOptions) -> Self {
        self.options = options;
        self
    }

    /// Returns true if the tag name matches an ignore glob.
    ///
    /// Invalid globs are warned about and treated as non-matching, so one
    /// broken pattern cannot mask an update.
    #[must_use]
    pub fn is_tag_ignored(&self, tag: &str) -> bool {
        self.ignore_list.iter().any(|pattern| {
            match glob::Pattern::new(pattern) {
                Ok(compiled) => compiled.matches(tag),
                Err(e) => {
                    tracing::warn!(pattern, error = %e, "invalid ignore glob, skipping");
                    false
                }
            }
        })
    }

    /// Resolves the newest allowed tag from the list.
    ///
    /// Returns `Ok(None)` when the list is empty or no tag survives
    /// filtering; "no eligible update" is not an error.
    ///
    /// # Errors
    ///
    /// Returns a [`CoreError`] for configuration problems only: an invalid
    /// semver range, an invalid calver layout, or a missing constraint for a
    /// strategy that requires one.
    pub fn resolve(
        &self,
        image_name: &str,
        tags: &ImageTagList,
    ) -> Result<Option<ImageTag>, CoreError> {
        if self.strategy.needs_version_constraint() && self.constraint.is_empty() {
            return Err(CoreError::MissingConstraint {
                strategy: self.strategy.to_string(),
            });
        }

        // Configuration parsing fails fast, before any tag is looked at.
        let range = match self.strategy {
            UpdateStrategy::SemVer if !self.constraint.is_empty() => {
                Some(VersionRange::parse(&self.constraint)?)
            }
            _ => None,
        };
        let layout = match self.strategy {
            UpdateStrategy::CalVer => Some(CalverLayout::parse(&self.constraint)?),
            _ => None,
        };

        if tags.is_empty() {
            return Ok(None);
        }

        let sorted = match self.strategy {
            UpdateStrategy::SemVer | UpdateStrategy::Digest => tags.sorted_by_semver(),
            UpdateStrategy::Alphabetical | UpdateStrategy::CalVer => tags.sorted_alphabetically(),
            UpdateStrategy::NewestBuild => tags.sorted_by_date(),
        };

        let mut newest = None;
        for tag in sorted {
            if !self.match_tag.matches(&tag.name) || self.is_tag_ignored(&tag.name) {
                continue;
            }

            let eligible = match self.strategy {
                UpdateStrategy::Digest => tag.name == self.constraint,
                UpdateStrategy::SemVer => match SemVersion::parse(&tag.name) {
                    Some(version) => range.as_ref().is_none_or(|r| r.matches(&version)),
                    None => false,
                },
                UpdateStrategy::CalVer => layout
                    .as_ref()
                    .is_some_and(|layout| layout.matches(&tag.name)),
                UpdateStrategy::Alphabetical | UpdateStrategy::NewestBuild => true,
            };

            if eligible {
                // Ascending sort: the last eligible candidate is the newest.
                newest = Some(tag);
            }
        }

        if newest.is_none() {
            tracing::debug!(image = image_name, strategy = %self.strategy, "no eligible tag");
        }
        Ok(newest)
    }
}
