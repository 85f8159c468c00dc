//! Tag value types and sortable tag collections.
//!
//! An [`ImageTag`] is immutable once constructed; an [`ImageTagList`] keeps
//! tags unique by name and is safe for concurrent add/read within one
//! resolution pass.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::version::SemVersion;

/// A single registry tag with optional resolved metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageTag {
    /// Tag name as listed by the registry.
    pub name: String,

    /// Manifest digest, when metadata has been resolved.
    pub digest: Option<String>,

    /// Creation timestamp of the image behind the tag.
    pub created_at: DateTime<Utc>,
}

impl ImageTag {
    /// Creates a tag with no resolved metadata.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            digest: None,
            created_at: DateTime::UNIX_EPOCH,
        }
    }

    /// Creates a tag with resolved digest and creation time.
    #[must_use]
    pub fn with_metadata(
        name: impl Into<String>,
        digest: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            name: name.into(),
            digest: Some(digest.into()),
            created_at,
        }
    }
}

impl PartialEq for ImageTag {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for ImageTag {}

impl std::fmt::Display for ImageTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// A collection of tags, unique by name.
///
/// Adds are idempotent upserts. The sort views return ascending snapshots;
/// the highest-ranked candidate is the last element.
#[derive(Debug, Default)]
pub struct ImageTagList {
    tags: RwLock<HashMap<String, ImageTag>>,
}

impl ImageTagList {
    /// Creates an empty list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a tag by name.
    pub fn add(&self, tag: ImageTag) {
        self.tags.write().insert(tag.name.clone(), tag);
    }

    /// Returns true if a tag with the given name is present.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.tags.read().contains_key(name)
    }

    /// Returns the tag with the given name, if present.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<ImageTag> {
        self.tags.read().get(name).cloned()
    }

    /// Number of tags in the list.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tags.read().len()
    }

    /// Returns true if the list holds no tags.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tags.read().is_empty()
    }

    /// Returns all tag names, unsorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.tags.read().keys().cloned().collect()
    }

    /// Ascending lexical sort view.
    #[must_use]
    pub fn sorted_alphabetically(&self) -> Vec<ImageTag> {
        let mut tags: Vec<ImageTag> = self.tags.read().values().cloned().collect();
        tags.sort_by(|a, b| a.name.cmp(&b.name));
        tags
    }

    /// Ascending semver-aware sort view.
    ///
    /// Tags that do not parse as semantic versions sort before all parseable
    /// ones (by name); strategies that filter on semver skip them anyway,
    /// while the digest strategy only cares about membership.
    #[must_use]
    pub fn sorted_by_semver(&self) -> Vec<ImageTag> {
        let mut tags: Vec<(Option<SemVersion>, ImageTag)> = self
            .tags
            .read()
            .values()
            .map(|t| (SemVersion::parse(&t.name), t.clone()))
            .collect();
        tags.sort_by(|(va, a), (vb, b)| match (va, vb) {
            (Some(va), Some(vb)) => va.cmp(vb).then_with(|| a.name.cmp(&b.name)),
            (Some(_), None) => std::cmp::Ordering::Greater,
            (None, Some(_)) => std::cmp::Ordering::Less,
            (None, None) => a.name.cmp(&b.name),
        });
        tags.into_iter().map(|(_, t)| t).collect()
    }

    /// Ascending creation-time sort view, name-tiebroken for determinism.
    #[must_use]
    pub fn sorted_by_date(&self) -> Vec<ImageTag> {
        let mut tags: Vec<ImageTag> = self.tags.read().values().cloned().collect();
        tags.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.name.cmp(&b.name))
        });
        tags
    }
}
