//! Process-lifetime cache of resolved tag metadata.
//!
//! Registries do not historically retag, so entries never expire; the cache
//! lives as long as the endpoint that owns it. `clear()` exists for tests
//! and configuration reloads.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::manifest::TagInfo;

/// Map from `(image, tag)` to resolved manifest metadata.
#[derive(Debug, Default)]
pub struct TagCache {
    entries: RwLock<HashMap<(String, String), TagInfo>>,
}

impl TagCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached metadata for a tag, if present.
    #[must_use]
    pub fn get(&self, image: &str, tag: &str) -> Option<TagInfo> {
        self.entries
            .read()
            .get(&(image.to_string(), tag.to_string()))
            .cloned()
    }

    /// Stores metadata for a tag, replacing any previous entry.
    pub fn put(&self, image: &str, tag: &str, info: TagInfo) {
        self.entries
            .write()
            .insert((image.to_string(), tag.to_string()), info);
    }

    /// Number of cached entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns true if the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Drops every entry.
    pub fn clear(&self) {
        self.entries.write().clear();
    }
}
