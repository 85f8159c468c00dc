//! Error types for the update-cycle engine.

use thiserror::Error;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors that can occur while running an update cycle.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A policy or constraint was invalid.
    #[error(transparent)]
    Core(#[from] tagwatch_core::CoreError),

    /// A registry operation failed.
    #[error(transparent)]
    Registry(#[from] tagwatch_registry::RegistryError),

    /// The engine was misconfigured.
    #[error("invalid engine configuration: {reason}")]
    InvalidConfig {
        /// Reason for invalidity.
        reason: String,
    },
}
