//! Keyed single-flight groups for deduplicating identical in-flight work.
//!
//! Concurrent callers asking for the same logical operation share one
//! execution: the first caller becomes the leader and spawns the work, every
//! later caller joins the leader's shared future. The work runs on a spawned
//! task so it completes even when the leading caller is cancelled, and the
//! map entry is removed when the result lands, on success and error alike.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;

use crate::error::RegistryError;

/// Structured identity of one deduplicatable operation.
///
/// Keys are tuples rather than delimiter-joined strings so a repository name
/// containing a separator can never collide with another key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FlightKey {
    /// A tag-list fetch for one repository.
    Tags {
        /// Registry API URL.
        registry: String,
        /// Repository name.
        repository: String,
    },

    /// A manifest fetch for one repository reference.
    Manifest {
        /// Registry API URL.
        registry: String,
        /// Repository name.
        repository: String,
        /// Tag or digest reference.
        reference: String,
    },

    /// A bearer-token fetch for one auth scope.
    Token {
        /// Registry API URL.
        registry: String,
        /// Token service identifier.
        service: String,
        /// Requested scope.
        scope: String,
    },
}

/// Result of a deduplicated operation; the error is shared by followers.
pub type FlightResult<V> = std::result::Result<V, Arc<RegistryError>>;

type SharedFlight<V> = Shared<BoxFuture<'static, FlightResult<V>>>;

/// A group of in-flight operations deduplicated by [`FlightKey`].
pub struct FlightGroup<V> {
    flights: Arc<Mutex<HashMap<FlightKey, SharedFlight<V>>>>,
}

impl<V> std::fmt::Debug for FlightGroup<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlightGroup")
            .field("in_flight", &self.flights.lock().len())
            .finish()
    }
}

impl<V> Default for FlightGroup<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> FlightGroup<V> {
    /// Creates an empty group.
    #[must_use]
    pub fn new() -> Self {
        Self {
            flights: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Number of operations currently in flight.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.flights.lock().len()
    }
}

impl<V> FlightGroup<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Runs `work` under the key, or joins an identical in-flight run.
    ///
    /// The leader's work is spawned so it survives caller cancellation;
    /// followers receive a shared clone of the leader's result. Errors are
    /// shared behind an [`Arc`] because every follower observes the same
    /// failure.
    ///
    /// # Errors
    ///
    /// Returns the leader's error, shared across all waiting callers.
    pub async fn run<F>(&self, key: FlightKey, work: F) -> FlightResult<V>
    where
        F: Future<Output = Result<V, RegistryError>> + Send + 'static,
    {
        let shared = {
            let mut flights = self.flights.lock();
            if let Some(existing) = flights.get(&key) {
                existing.clone()
            } else {
                let handle = tokio::spawn(work);
                let map = Arc::clone(&self.flights);
                let cleanup_key = key.clone();
                let flight = async move {
                    let result = match handle.await {
                        Ok(inner) => inner.map_err(Arc::new),
                        Err(join_error) => Err(Arc::new(RegistryError::Internal {
                            message: format!("single-flight task failed: {join_error}"),
                        })),
                    };
                    map.lock().remove(&cleanup_key);
                    result
                }
                .boxed()
                .shared();
                flights.insert(key, flight.clone());
                flight
            }
        };

        shared.await
    }
}
