//! The concurrent update-cycle orchestrator.
//!
//! One task per application, bounded by a semaphore sized to the configured
//! concurrency. The first cycle is a cache warm-up and runs with a single
//! permit so a fresh process does not stampede every registry at once;
//! subsequent cycles use the full width.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::application::Application;
use crate::error::{EngineError, Result};
use crate::result::{ApplicationResult, CycleResult};
use crate::state::SyncIterationState;
use crate::updater::ApplicationProcessor;

/// Runs update cycles over many applications with bounded concurrency.
#[derive(Debug)]
pub struct CycleRunner {
    max_concurrency: usize,
    warmed_up: AtomicBool,
}

impl CycleRunner {
    /// Creates a runner processing at most `max_concurrency` applications
    /// at once.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidConfig`] when `max_concurrency` is
    /// zero.
    pub fn new(max_concurrency: usize) -> Result<Self> {
        if max_concurrency == 0 {
            return Err(EngineError::InvalidConfig {
                reason: "max concurrency must be at least 1".to_string(),
            });
        }
        Ok(Self {
            max_concurrency,
            warmed_up: AtomicBool::new(false),
        })
    }

    /// Configured concurrency bound.
    #[must_use]
    pub const fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Whether the warm-up cycle has completed.
    #[must_use]
    pub fn is_warmed_up(&self) -> bool {
        self.warmed_up.load(Ordering::SeqCst)
    }

    /// Runs one cycle over the applications.
    ///
    /// Each application is processed on its own task under a shared
    /// semaphore. A failed permit acquisition skips that application
    /// without touching the aggregate counters; a processing error is
    /// counted against the owning application and never aborts the cycle.
    pub async fn run_cycle(
        &self,
        applications: &[Application],
        processor: Arc<dyn ApplicationProcessor>,
        state: Arc<SyncIterationState>,
    ) -> CycleResult {
        let width = if self.is_warmed_up() {
            self.max_concurrency
        } else {
            tracing::info!("warm-up cycle, processing applications sequentially");
            1
        };
        let semaphore = Arc::new(Semaphore::new(width));

        let mut handles = Vec::with_capacity(applications.len());
        for application in applications.iter().cloned() {
            let semaphore = semaphore.clone();
            let processor = processor.clone();
            let state = state.clone();

            handles.push(tokio::spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    tracing::warn!(
                        application = %application.name,
                        "could not acquire processing slot, skipping"
                    );
                    return None;
                };

                state.enter();
                let outcome = processor.process(&application, &state).await;
                state.exit();

                Some(match outcome {
                    Ok(result) => result,
                    Err(error) => {
                        tracing::error!(
                            application = %application.name,
                            error = %error,
                            "application processing failed"
                        );
                        let mut failed = ApplicationResult::new(&application.name);
                        failed.errors += 1;
                        failed
                    }
                })
            }));
        }

        let mut cycle = CycleResult::default();
        for handle in handles {
            match handle.await {
                Ok(Some(result)) => cycle.absorb(result),
                Ok(None) => cycle.skipped_applications += 1,
                Err(error) => {
                    tracing::error!(error = %error, "application task panicked");
                    cycle.skipped_applications += 1;
                }
            }
        }

        self.warmed_up.store(true, Ordering::SeqCst);
        tracing::info!(
            applications = cycle.applications,
            considered = cycle.considered,
            updated = cycle.updated,
            skipped = cycle.skipped,
            errors = cycle.errors,
            "update cycle complete"
        );
        cycle
    }
}
