//! Per-endpoint request throttling: a token-bucket rate limiter and a
//! bounded in-flight gate.
//!
//! The rate limiter spaces requests out over time; the in-flight gate caps
//! how many sockets one endpoint may hold open at once, which is the first
//! line of defense against ephemeral-port exhaustion.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::{RegistryError, Result};
use crate::metrics;

/// Default cap on concurrent requests per endpoint.
pub const DEFAULT_INFLIGHT_LIMIT: usize = 15;

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    capacity: f64,
    refill_per_sec: f64,
    last_refill: Instant,
}

impl Bucket {
    fn refill(&mut self, now: Instant) {
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        self.last_refill = now;
    }
}

/// Token-bucket rate limiter, requests per second.
///
/// An unlimited limiter never waits. `take()` is cancel-safe: dropping the
/// future abandons the wait without consuming a token.
#[derive(Debug)]
pub struct RateLimiter {
    bucket: Option<Mutex<Bucket>>,
}

impl RateLimiter {
    /// Creates a limiter that never throttles.
    #[must_use]
    pub const fn unlimited() -> Self {
        Self { bucket: None }
    }

    /// Creates a limiter allowing `rps` requests per second; zero means
    /// unlimited.
    #[must_use]
    pub fn per_second(rps: u32) -> Self {
        if rps == 0 {
            return Self::unlimited();
        }
        let capacity = f64::from(rps);
        Self {
            bucket: Some(Mutex::new(Bucket {
                tokens: capacity,
                capacity,
                refill_per_sec: capacity,
                last_refill: Instant::now(),
            })),
        }
    }

    /// Returns true if this limiter throttles at all.
    #[must_use]
    pub const fn is_limited(&self) -> bool {
        self.bucket.is_some()
    }

    /// Takes one token, waiting for the bucket to refill when empty.
    ///
    /// Returns how long the caller waited.
    pub async fn take(&self) -> Duration {
        let Some(bucket) = &self.bucket else {
            return Duration::ZERO;
        };

        let started = Instant::now();
        loop {
            let wait = {
                let mut state = bucket.lock();
                state.refill(Instant::now());
                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    None
                } else {
                    Some(Duration::from_secs_f64(
                        (1.0 - state.tokens) / state.refill_per_sec,
                    ))
                }
            };
            match wait {
                None => return started.elapsed(),
                Some(delay) => tokio::time::sleep(delay).await,
            }
        }
    }
}

/// Bounded in-flight request gate for one endpoint.
#[derive(Debug)]
pub struct InflightGate {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    label: String,
}

impl InflightGate {
    /// Creates a gate with the given capacity, labeled for metrics by the
    /// endpoint name.
    #[must_use]
    pub fn new(capacity: usize, label: impl Into<String>) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
            label: label.into(),
        }
    }

    /// Configured capacity.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Permits currently available.
    #[must_use]
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Acquires one in-flight slot, waiting when the endpoint is saturated.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Internal`] if the gate has been closed.
    pub async fn acquire(&self) -> Result<InflightPermit> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| RegistryError::Internal {
                message: "in-flight gate closed".to_string(),
            })?;
        metrics::INFLIGHT_REQUESTS
            .with_label_values(&[&self.label])
            .inc();
        Ok(InflightPermit {
            _permit: permit,
            label: self.label.clone(),
        })
    }
}

/// An acquired in-flight slot; released (and gauged down) on drop.
#[derive(Debug)]
pub struct InflightPermit {
    _permit: OwnedSemaphorePermit,
    label: String,
}

impl Drop for InflightPermit {
    fn drop(&mut self) {
        metrics::INFLIGHT_REQUESTS
            .with_label_values(&[&self.label])
            .dec();
    }
}
