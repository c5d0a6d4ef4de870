//! Crate-wide error type.
//!
//! Every wrapper translates its vendor error into [`Error`] at the call
//! site, logs it, and propagates it with `?`. Callers that only care about
//! the category of failure match on [`Error::kind`].

use std::io;

use thiserror::Error;

/// Convenience alias used by every wrapper operation.
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Host unreachable, DNS failure, handshake or transport error.
    Connection,
    /// Credentials were rejected.
    Authentication,
    /// The identity lacks rights for the operation.
    PermissionDenied,
    /// The target object does not exist.
    NotFound,
    /// The target object already exists.
    Conflict,
    /// The operation itself failed (syntax error, server-side failure).
    Operation,
    /// Local input was malformed.
    InvalidInput,
    /// The session was already closed.
    NotConnected,
    /// Local I/O failure.
    Io,
    /// JSON or TOML (de)serialization failure.
    Serialization,
    /// The user cancelled with Ctrl-C.
    Interrupted,
}

/// Errors returned by connkit components.
#[derive(Debug, Error)]
pub enum Error {
    /// Connection could not be established or was lost.
    #[error("Connection failed: {0}")]
    Connection(String),

    /// Authentication was refused.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Insufficient access rights.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Object not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Object already exists.
    #[error("Already exists: {0}")]
    Conflict(String),

    /// Operation failed on the remote side.
    #[error("Operation failed: {0}")]
    Operation(String),

    /// Malformed local input.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// No open session.
    #[error("Not connected")]
    NotConnected,

    /// Password entry cancelled.
    #[error("CTRL ^C received, closing...")]
    Interrupted,

    /// File I/O error.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing error.
    #[error("Config parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Returns the category of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Connection(_) => ErrorKind::Connection,
            Self::Authentication(_) => ErrorKind::Authentication,
            Self::PermissionDenied(_) => ErrorKind::PermissionDenied,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::Operation(_) => ErrorKind::Operation,
            Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::NotConnected => ErrorKind::NotConnected,
            Self::Interrupted => ErrorKind::Interrupted,
            Self::Io(_) => ErrorKind::Io,
            Self::Json(_) | Self::Toml(_) => ErrorKind::Serialization,
        }
    }

    /// Returns true for credential failures, which the CLI maps to exit code 1.
    #[must_use]
    pub fn is_auth_failure(&self) -> bool {
        self.kind() == ErrorKind::Authentication
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(
            Error::Connection("refused".to_string()).kind(),
            ErrorKind::Connection
        );
        assert_eq!(Error::NotConnected.kind(), ErrorKind::NotConnected);
        let io_err = io::Error::new(io::ErrorKind::NotFound, "gone");
        assert_eq!(Error::from(io_err).kind(), ErrorKind::Io);
    }

    #[test]
    fn test_display_contains_message() {
        let err = Error::PermissionDenied("cn=admin".to_string());
        assert!(err.to_string().contains("cn=admin"));
        assert!(err.to_string().starts_with("Permission denied"));
    }

    #[test]
    fn test_is_auth_failure() {
        assert!(Error::Authentication("bad password".to_string()).is_auth_failure());
        assert!(!Error::Operation("syntax".to_string()).is_auth_failure());
    }

    #[test]
    fn test_prompt_interrupt_keeps_its_kind() {
        let err = Error::from(crate::PromptError::Interrupted);
        assert_eq!(err.kind(), ErrorKind::Interrupted);
        assert!(!err.is_auth_failure());
        assert_eq!(err.to_string(), "CTRL ^C received, closing...");
    }
}
