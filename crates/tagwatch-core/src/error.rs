//! Error types for core tag and version resolution operations.

use thiserror::Error;

/// Errors that can occur while parsing policies or resolving versions.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Version constraint could not be parsed.
    #[error("invalid version constraint '{constraint}': {reason}")]
    InvalidConstraint {
        /// The constraint string.
        constraint: String,
        /// Why it failed to parse.
        reason: String,
    },

    /// Calendar-version layout could not be parsed.
    #[error("invalid calver layout '{layout}': {reason}")]
    InvalidCalverLayout {
        /// The layout string.
        layout: String,
        /// Why it failed to parse.
        reason: String,
    },

    /// Strategy requires a constraint but none was given.
    #[error("update strategy '{strategy}' requires a non-empty constraint")]
    MissingConstraint {
        /// The strategy that needs a constraint.
        strategy: String,
    },

    /// Tag match expression could not be compiled.
    #[error("invalid tag match expression '{expression}': {reason}")]
    InvalidMatchExpression {
        /// The match expression.
        expression: String,
        /// Why it failed to compile.
        reason: String,
    },

    /// Image reference could not be parsed.
    #[error("invalid image reference '{reference}': {reason}")]
    InvalidImageReference {
        /// The image reference string.
        reference: String,
        /// Why it failed to parse.
        reason: String,
    },

    /// Platform string could not be parsed.
    #[error("invalid platform '{platform}': expected os/arch[/variant]")]
    InvalidPlatform {
        /// The platform string.
        platform: String,
    },
}
