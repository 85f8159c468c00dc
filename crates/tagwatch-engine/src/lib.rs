//! # Tagwatch Engine
//!
//! The concurrent orchestrator that runs one update cycle over many
//! applications: each application's images are checked against their
//! registries, the newest allowed tags are resolved, and the discovered
//! updates are handed back for external write-back.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tagwatch_engine::{Application, CycleRunner, ImageUpdater, SyncIterationState};
//! use tagwatch_registry::{RegistryContext, StaticSecretStore};
//!
//! # async fn run() -> Result<(), tagwatch_engine::EngineError> {
//! let context = Arc::new(RegistryContext::new(Arc::new(StaticSecretStore::new())));
//! let runner = CycleRunner::new(10)?;
//! let updater = Arc::new(ImageUpdater::new(context));
//!
//! let applications = vec![Application::new("guestbook")];
//! let state = Arc::new(SyncIterationState::new());
//! let result = runner.run_cycle(&applications, updater, state).await;
//! println!("{} update(s) found", result.updated);
//! # Ok(())
//! # }
//! ```

mod application;
mod error;
mod orchestrator;
mod result;
mod state;
mod updater;

pub use application::Application;
pub use error::{EngineError, Result};
pub use orchestrator::CycleRunner;
pub use result::{ApplicationResult, CycleResult, ImageUpdate};
pub use state::SyncIterationState;
pub use updater::{ApplicationProcessor, ImageUpdater};
