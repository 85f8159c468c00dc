//! Sliding-window detector for local ephemeral-port exhaustion.
//!
//! When outbound dials start failing with `EADDRNOTAVAIL` the process cannot
//! fix itself; the detector only records the events and answers a degraded
//! query so an external liveness probe can restart the process.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Default sliding window length.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

/// Default number of events within the window that marks degradation.
pub const DEFAULT_THRESHOLD: usize = 8;

/// Records `EADDRNOTAVAIL` dial failures in a sliding time window.
#[derive(Debug)]
pub struct PortExhaustionDetector {
    window: Duration,
    threshold: usize,
    events: Mutex<VecDeque<Instant>>,
}

impl Default for PortExhaustionDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl PortExhaustionDetector {
    /// Creates a detector with the default window and threshold.
    #[must_use]
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_WINDOW, DEFAULT_THRESHOLD)
    }

    /// Creates a detector with explicit limits.
    #[must_use]
    pub fn with_limits(window: Duration, threshold: usize) -> Self {
        Self {
            window,
            threshold: threshold.max(1),
            events: Mutex::new(VecDeque::new()),
        }
    }

    /// Inspects an error and records an event when it indicates port
    /// exhaustion. Returns true if an event was recorded.
    pub fn record(&self, error: &(dyn std::error::Error + 'static)) -> bool {
        if !is_addr_not_available(error) {
            return false;
        }

        let now = Instant::now();
        let mut events = self.events.lock();
        Self::prune(&mut events, now, self.window);
        events.push_back(now);
        tracing::warn!(
            events_in_window = events.len(),
            threshold = self.threshold,
            "outbound dial failed with EADDRNOTAVAIL"
        );
        true
    }

    /// Returns true if the event count within the window has reached the
    /// threshold. Expired events are pruned first, so the flag clears on its
    /// own once failures stop.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        let mut events = self.events.lock();
        Self::prune(&mut events, Instant::now(), self.window);
        events.len() >= self.threshold
    }

    /// Current number of events within the window.
    #[must_use]
    pub fn event_count(&self) -> usize {
        let mut events = self.events.lock();
        Self::prune(&mut events, Instant::now(), self.window);
        events.len()
    }

    fn prune(events: &mut VecDeque<Instant>, now: Instant, window: Duration) {
        while let Some(oldest) = events.front() {
            if now.duration_since(*oldest) > window {
                events.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Walks the error source chain looking for `EADDRNOTAVAIL`, first by typed
/// inspection, then by substring match on the platform message.
fn is_addr_not_available(error: &(dyn std::error::Error + 'static)) -> bool {
    let mut current: Option<&(dyn std::error::Error + 'static)> = Some(error);
    while let Some(err) = current {
        if let Some(io_err) = err.downcast_ref::<std::io::Error>() {
            if io_err.kind() == std::io::ErrorKind::AddrNotAvailable {
                return true;
            }
        }
        if err
            .to_string()
            .to_ascii_lowercase()
            .contains("cannot assign requested address")
        {
            return true;
        }
        current = err.source();
    }
    false
}
