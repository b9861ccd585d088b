//! Error types for the Aperture evaluation engine
//!
//! Errors are split along the lines that decide what the engine does with them:
//! - [`ProviderError`] and [`PipelineError`] are per-subject failures, wrapped in
//!   [`EvaluationError`] and turned into failed results.
//! - [`ApertureError`] is the crate-level error; its `Configuration` and
//!   `Persistence` variants abort a run instead of being recorded.

use std::time::Duration;
use thiserror::Error;

/// Failure reported by a remote provider call
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    /// HTTP 429 or an equivalent provider-level throttle
    #[error("Rate limit exceeded: {message}")]
    RateLimited {
        /// Advisory wait from `retry-after` (or provider-specific headers)
        retry_after: Option<Duration>,
        message: String,
    },

    /// Provider is temporarily unable to serve (529/503/502/500)
    #[error("Provider overloaded (HTTP {status}): {message}")]
    Overloaded { status: u16, message: String },

    /// Request exceeded the client timeout
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// Credential rejected
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Provider refused the request as malformed or unsupported
    #[error("Invalid request (HTTP {status}): {message}")]
    InvalidRequest { status: u16, message: String },

    /// Response arrived but could not be understood
    #[error("Malformed provider response: {0}")]
    MalformedResponse(String),

    /// Transport failure before a response was received
    #[error("Network error: {0}")]
    Network(String),

    /// Any status the mapping does not recognise
    #[error("Unexpected provider status {status}: {message}")]
    Unexpected { status: u16, message: String },
}

impl ProviderError {
    /// Machine-readable code persisted on failed results
    pub fn code(&self) -> String {
        match self {
            Self::RateLimited { .. } => "rate_limited".to_string(),
            Self::Overloaded { status, .. } => format!("overloaded_{}", status),
            Self::Timeout(_) => "timeout".to_string(),
            Self::Authentication(_) => "authentication_failed".to_string(),
            Self::InvalidRequest { status, .. } => format!("invalid_request_{}", status),
            Self::MalformedResponse(_) => "malformed_response".to_string(),
            Self::Network(_) => "network_error".to_string(),
            Self::Unexpected { status, .. } => format!("http_{}", status),
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            // reqwest does not expose the configured duration on the error
            Self::Timeout(Duration::ZERO)
        } else if err.is_decode() {
            Self::MalformedResponse(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}

/// Failure in the local part of the single-subject pipeline
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    #[error("Artifact not found: {0}")]
    ArtifactNotFound(String),

    #[error("Failed to read artifact: {0}")]
    ArtifactRead(String),

    #[error("Image analysis failed: {0}")]
    Analysis(String),

    #[error("Failed to encode artifact: {0}")]
    Encode(String),
}

impl PipelineError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::ArtifactNotFound(_) => "artifact_not_found",
            Self::ArtifactRead(_) => "artifact_read_failed",
            Self::Analysis(_) => "analysis_failed",
            Self::Encode(_) => "encode_failed",
        }
    }
}

/// Per-subject evaluation failure; always ends up as a failed result
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvaluationError {
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// Run cancelled while waiting to retry; carries the error being retried
    #[error("Cancelled while waiting to retry: {0}")]
    Cancelled(Box<EvaluationError>),
}

impl EvaluationError {
    pub fn code(&self) -> String {
        match self {
            Self::Pipeline(e) => e.code().to_string(),
            Self::Provider(e) => e.code(),
            Self::Cancelled(_) => "cancelled".to_string(),
        }
    }
}

/// Main error type for Aperture operations
#[derive(Error, Debug)]
pub enum ApertureError {
    /// Missing credential, unsupported provider, invalid settings
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A single evaluation failed (only surfaced outside a scheduled run)
    #[error("Evaluation failed: {0}")]
    Evaluation(#[from] EvaluationError),

    /// Store write or read failed; invariant state can no longer be trusted
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Operation not allowed in the engine's current state
    #[error("Invalid operation: {0}")]
    InvalidState(String),

    /// Entity not found in the store
    #[error("Not found: {0}")]
    NotFound(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ApertureError {
    /// True when the error means the store can no longer be trusted
    pub fn is_persistence(&self) -> bool {
        matches!(self, Self::Persistence(_))
    }
}

impl From<rusqlite::Error> for ApertureError {
    fn from(err: rusqlite::Error) -> Self {
        ApertureError::Persistence(err.to_string())
    }
}

impl From<toml::de::Error> for ApertureError {
    fn from(err: toml::de::Error) -> Self {
        ApertureError::Configuration(err.to_string())
    }
}

/// Result type alias for Aperture operations
pub type Result<T> = std::result::Result<T, ApertureError>;
