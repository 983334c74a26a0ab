//! Error types for rampkit.

use thiserror::Error;

/// Main error type for rampkit operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RampError {
    /// Caller input is malformed or out of range.
    #[error("Validation failed: {message}")]
    Validation { message: String },

    /// The proof-generating agent cannot be reached.
    #[error("Agent transport unavailable: {0}")]
    TransportUnavailable(String),

    /// A bounded wait elapsed.
    #[error("Operation timed out after {duration_ms}ms: {message}")]
    Timeout { duration_ms: u64, message: String },

    /// The agent reported an error or returned an unusable proof.
    #[error("Proof generation failed: {message}")]
    ProofGeneration { message: String },

    /// Transport-level failure reaching a remote endpoint.
    #[error("Network error: {0}")]
    Network(String),

    /// The remote endpoint asked us to slow down.
    #[error("Rate limited (status {status})")]
    RateLimited { status: u16 },

    /// Non-success response that retrying will not fix.
    #[error("Request failed with status {status}: {message}")]
    Http { status: u16, message: String },

    /// Resource not found.
    #[error("Resource not found: {resource_type} with id {id}")]
    NotFound { resource_type: String, id: String },

    /// A proof request is already in flight on this instance.
    #[error("A proof request is already in flight")]
    Busy,

    /// The component was disposed while the call was waiting.
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl RampError {
    /// Shorthand for a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        RampError::Validation {
            message: message.into(),
        }
    }

    /// Shorthand for a proof generation error.
    pub fn proof_generation(message: impl Into<String>) -> Self {
        RampError::ProofGeneration {
            message: message.into(),
        }
    }

    /// Shorthand for a not-found error.
    pub fn not_found(resource_type: impl Into<String>, id: impl Into<String>) -> Self {
        RampError::NotFound {
            resource_type: resource_type.into(),
            id: id.into(),
        }
    }

    /// Returns true if retrying the same operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RampError::Network(_) | RampError::RateLimited { .. })
    }
}

/// Convenience Result type for rampkit operations.
pub type Result<T> = std::result::Result<T, RampError>;

impl From<serde_json::Error> for RampError {
    fn from(err: serde_json::Error) -> Self {
        RampError::Serialization(err.to_string())
    }
}
