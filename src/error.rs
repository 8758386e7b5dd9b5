// Error handling module
// Defines the errors surfaced to callers of authenticated requests

use thiserror::Error;

/// Errors returned by authenticated requests
///
/// Session-level failures (missing or rejected refresh credential) never show up
/// here: they end in a teardown and surface only as [`SessionError::NoSession`].
#[derive(Error, Debug)]
pub enum SessionError {
    /// No usable credential pair is stored
    #[error("No active session")]
    NoSession,

    /// The underlying HTTP call could not complete
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Target could not be resolved against the API base URL
    #[error("Invalid request target: {0}")]
    InvalidTarget(String),

    /// Credential could not be encoded as a header value
    #[error("Invalid header value: {0}")]
    InvalidHeader(String),
}

impl SessionError {
    /// True when the caller has to sign in again
    pub fn is_unauthenticated(&self) -> bool {
        matches!(self, SessionError::NoSession)
    }
}

/// Result type alias for session operations
pub type Result<T> = std::result::Result<T, SessionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        assert_eq!(SessionError::NoSession.to_string(), "No active session");

        let err = SessionError::InvalidTarget("::bad".to_string());
        assert_eq!(err.to_string(), "Invalid request target: ::bad");
    }

    #[test]
    fn test_is_unauthenticated() {
        assert!(SessionError::NoSession.is_unauthenticated());
        assert!(!SessionError::InvalidTarget("x".to_string()).is_unauthenticated());
        assert!(!SessionError::InvalidHeader("x".to_string()).is_unauthenticated());
    }
}
