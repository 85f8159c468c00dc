//! Shared per-cycle iteration state.
//!
//! One [`SyncIterationState`] is created at the start of every cycle and
//! passed to each application's processing call, then discarded. It carries
//! the cycle-level tag-list memo (an image shared by two applications is
//! fetched once per cycle), the per-endpoint ping memo, and instrumentation
//! counters the concurrency tests read.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// Mutable state shared by every application processed in one cycle.
#[derive(Debug, Default)]
pub struct SyncIterationState {
    tag_lists: Mutex<HashMap<String, Arc<Vec<String>>>>,
    pinged: Mutex<HashSet<String>>,
    active: AtomicUsize,
    peak: AtomicUsize,
    processed: AtomicUsize,
}

impl SyncIterationState {
    /// Creates fresh state for one cycle.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the memoized tag list for a repository key, if any
    /// application already fetched it this cycle.
    #[must_use]
    pub fn cached_tags(&self, key: &str) -> Option<Arc<Vec<String>>> {
        self.tag_lists.lock().get(key).cloned()
    }

    /// Memoizes a fetched tag list for the rest of the cycle.
    pub fn store_tags(&self, key: impl Into<String>, tags: Arc<Vec<String>>) {
        self.tag_lists.lock().insert(key.into(), tags);
    }

    /// Marks an endpoint as contacted; returns true on first contact.
    pub fn first_contact(&self, api_url: &str) -> bool {
        self.pinged.lock().insert(api_url.to_string())
    }

    /// Records one processor entering its critical section.
    pub fn enter(&self) {
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(active, Ordering::SeqCst);
    }

    /// Records one processor leaving its critical section.
    pub fn exit(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
        self.processed.fetch_add(1, Ordering::SeqCst);
    }

    /// Processors currently active.
    #[must_use]
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously active processors observed.
    #[must_use]
    pub fn peak_active(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Applications processed so far this cycle.
    #[must_use]
    pub fn processed(&self) -> usize {
        self.processed.load(Ordering::SeqCst)
    }
}
