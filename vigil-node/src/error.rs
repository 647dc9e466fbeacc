use thiserror::Error;

/// Errors that can occur in the vigil engine library
#[derive(Error, Debug)]
pub enum VigilError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Unknown license or reputation key. Never escalates to a
    /// security event by itself.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Malformed token or payload. Logged, rejected, no state change.
    #[error("Validation failure: {0}")]
    Validation(String),

    /// Token outside the freshness window. Distinct from tamper; the
    /// client should simply re-heartbeat.
    #[error("Freshness token expired")]
    TokenExpired,

    /// Confirmed tamper, unauthorized domain, or threshold crossing.
    /// Always paired with a forensic record and a state transition.
    #[error("Security violation: {0}")]
    SecurityViolation(String),

    /// Snapshot tag mismatch or key derivation failure. Fails closed.
    #[error("Crypto failure: {0}")]
    Crypto(String),

    /// Persistence layer unavailable; the whole operation is safe to
    /// retry.
    #[error("Transient storage error: {0}")]
    TransientStorage(String),

    /// Network I/O error
    #[error("Network I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Broadcast gateway error
    #[error("Broadcast error: {0}")]
    Broadcast(String),
}

/// Result type alias using VigilError
pub type Result<T> = std::result::Result<T, VigilError>;

impl From<serde_json::Error> for VigilError {
    fn from(err: serde_json::Error) -> Self {
        VigilError::Serialization(err.to_string())
    }
}

impl VigilError {
    /// Whether the caller may retry the whole operation verbatim.
    pub fn is_retryable(&self) -> bool {
        matches!(self, VigilError::TransientStorage(_))
    }

    /// Whether this error must be recorded and broadcast in addition
    /// to being surfaced to the caller.
    pub fn is_security_relevant(&self) -> bool {
        matches!(
            self,
            VigilError::SecurityViolation(_) | VigilError::Crypto(_)
        )
    }
}
