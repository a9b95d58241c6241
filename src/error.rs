//! Error types shared by the identity bootstrap and the decision callbacks.
//!
//! Variants follow the failure classes the webhook distinguishes: decode,
//! invalid input, crypto, integrity and upstream failures.

use thiserror::Error;

/// Error type for webhook operations
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed PEM material or admission payload
    #[error("Decode error: {0}")]
    Decode(String),

    /// Caller-supplied constraint violation
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Key generation or signing failure
    #[error("Crypto error: {0}")]
    Crypto(String),

    /// Stored identity record is incomplete; delete it to force regeneration
    #[error("Integrity error: {0}")]
    Integrity(String),

    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// Upstream store misbehaved without a Kubernetes error to report
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Filesystem error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Check if this error indicates a not-found condition
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Kube(kube::Error::Api(e)) if e.code == 404)
    }

    /// Check if this error indicates a create lost to an existing object
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Error::Kube(kube::Error::Api(e)) if e.code == 409)
    }

    /// Check if retrying the operation could succeed.
    ///
    /// The webhook never retries internally; this is for callers deciding
    /// whether a restart is worthwhile.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube(e) => {
                matches!(
                    e,
                    kube::Error::Api(api_err) if api_err.code >= 500 || api_err.code == 429
                ) || matches!(e, kube::Error::Service(_))
            }
            Error::UpstreamUnavailable(_) | Error::Io(_) => true,
            Error::Decode(_)
            | Error::InvalidInput(_)
            | Error::Crypto(_)
            | Error::Integrity(_)
            | Error::Serialization(_) => false,
        }
    }
}

/// Result type alias for webhook operations
pub type Result<T> = std::result::Result<T, Error>;
