//! Error types for registry operations.

use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Result type alias for registry operations.
pub type Result<T> = std::result::Result<T, RegistryError>;

/// Errors that can occur during registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Failed to connect to the registry.
    #[error("failed to connect to registry at {url}: {source}")]
    ConnectionFailed {
        /// Registry URL.
        url: String,
        /// Underlying error.
        #[source]
        source: reqwest::Error,
    },

    /// HTTP error from the registry.
    #[error("HTTP error from registry: {status} - {message}")]
    HttpError {
        /// HTTP status code (0 when no response was received).
        status: u16,
        /// Error message.
        message: String,
    },

    /// An operation exceeded its deadline.
    #[error("operation timed out: {operation}")]
    Timeout {
        /// The operation that timed out.
        operation: String,
    },

    /// Authentication with the registry failed.
    #[error("authentication failed: {message}")]
    AuthenticationFailed {
        /// Error message.
        message: String,
    },

    /// Credential source specification could not be parsed.
    #[error("invalid credential source '{spec}': {reason}")]
    InvalidCredentialSource {
        /// The credential specification string.
        spec: String,
        /// Why it failed to parse.
        reason: String,
    },

    /// Credentials could not be resolved from their source.
    #[error("failed to resolve credentials from {source_kind}: {reason}")]
    CredentialResolution {
        /// The kind of source (environment, secret, script).
        source_kind: String,
        /// Failure reason.
        reason: String,
    },

    /// No endpoint is registered for an image and no default exists.
    #[error("no registry endpoint configured for image '{image}' and no default endpoint set")]
    NoEndpoint {
        /// The image lookup key.
        image: String,
    },

    /// Manifest not found in the registry.
    #[error("manifest not found: {repository}:{reference}")]
    ManifestNotFound {
        /// Repository name.
        repository: String,
        /// Tag or digest reference.
        reference: String,
    },

    /// Manifest payload was malformed.
    #[error("invalid manifest '{reference}': {message}")]
    InvalidManifest {
        /// Tag or digest reference.
        reference: String,
        /// What was wrong with it.
        message: String,
    },

    /// Manifest media type is not supported.
    #[error("unsupported manifest media type: {media_type}")]
    UnsupportedManifest {
        /// The media type string.
        media_type: String,
    },

    /// Response body could not be decoded.
    #[error("invalid registry response: {message}")]
    InvalidResponse {
        /// Error message.
        message: String,
    },

    /// Registry configuration was invalid.
    #[error("invalid registry configuration: {message}")]
    ConfigError {
        /// Error message.
        message: String,
    },

    /// JSON serialization/deserialization error.
    #[error("JSON error: {source}")]
    JsonError {
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },

    /// File I/O error.
    #[error("file I/O error at {path}: {source}")]
    IoError {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A deduplicated in-flight operation failed with the leader's error.
    #[error("{0}")]
    Shared(Arc<RegistryError>),

    /// Internal error.
    #[error("internal error: {message}")]
    Internal {
        /// Error message.
        message: String,
    },
}

impl RegistryError {
    /// Returns true if the operation may be retried.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ConnectionFailed { .. } | Self::Timeout { .. } => true,
            Self::HttpError { status, .. } => matches!(status, 0 | 408 | 429 | 500..=599),
            Self::Shared(inner) => inner.is_retryable(),
            _ => false,
        }
    }

    /// Unwraps a shared single-flight error, cloning out of the `Arc` only
    /// when other followers still hold it.
    #[must_use]
    pub fn from_shared(error: Arc<Self>) -> Self {
        Arc::try_unwrap(error).unwrap_or_else(Self::Shared)
    }

    /// Short error-class label used for metrics.
    #[must_use]
    pub const fn class(&self) -> &'static str {
        match self {
            Self::ConnectionFailed { .. } => "connection",
            Self::HttpError { .. } => "http",
            Self::Timeout { .. } => "timeout",
            Self::AuthenticationFailed { .. } => "auth",
            Self::InvalidCredentialSource { .. } | Self::CredentialResolution { .. } => {
                "credentials"
            }
            Self::NoEndpoint { .. } | Self::ConfigError { .. } => "config",
            Self::ManifestNotFound { .. } => "not_found",
            Self::InvalidManifest { .. }
            | Self::UnsupportedManifest { .. }
            | Self::InvalidResponse { .. }
            | Self::JsonError { .. } => "decode",
            Self::IoError { .. } => "io",
            Self::Shared(_) => "shared",
            Self::Internal { .. } => "internal",
        }
    }
}

impl From<reqwest::Error> for RegistryError {
    fn from(err: reqwest::Error) -> Self {
        let url = err
            .url()
            .map_or_else(|| "unknown".to_string(), ToString::to_string);
        if err.is_timeout() {
            Self::Timeout { operation: url }
        } else if err.is_connect() {
            Self::ConnectionFailed { url, source: err }
        } else if err.is_decode() {
            Self::InvalidResponse {
                message: err.to_string(),
            }
        } else if err.is_status() {
            Self::HttpError {
                status: err.status().map_or(0, |s| s.as_u16()),
                message: err.to_string(),
            }
        } else {
            Self::HttpError {
                status: 0,
                message: err.to_string(),
            }
        }
    }
}

impl From<serde_json::Error> for RegistryError {
    fn from(err: serde_json::Error) -> Self {
        Self::JsonError { source: err }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_no_endpoint() {
        let err = RegistryError::NoEndpoint {
            image: "ghcr.io/org/app".to_string(),
        };
        assert!(err.to_string().contains("ghcr.io/org/app"));
    }

    #[test]
    fn test_http_error_retryability() {
        let transient = RegistryError::HttpError {
            status: 503,
            message: "unavailable".to_string(),
        };
        assert!(transient.is_retryable());

        let permanent = RegistryError::HttpError {
            status: 404,
            message: "not found".to_string(),
        };
        assert!(!permanent.is_retryable());
    }

    #[test]
    fn test_timeout_is_retryable() {
        let err = RegistryError::Timeout {
            operation: "list tags".to_string(),
        };
        assert!(err.is_retryable());
    }

    #[test]
    fn test_config_error_not_retryable() {
        let err = RegistryError::ConfigError {
            message: "bad yaml".to_string(),
        };
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_from_shared_unwraps_sole_owner() {
        let inner = Arc::new(RegistryError::Timeout {
            operation: "x".to_string(),
        });
        let err = RegistryError::from_shared(inner);
        assert!(matches!(err, RegistryError::Timeout { .. }));
    }

    #[test]
    fn test_from_shared_wraps_when_still_shared() {
        let inner = Arc::new(RegistryError::Timeout {
            operation: "x".to_string(),
        });
        let follower = inner.clone();
        let err = RegistryError::from_shared(inner);
        assert!(matches!(err, RegistryError::Shared(_)));
        assert!(err.is_retryable());
        drop(follower);
    }
}
