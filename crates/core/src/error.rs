//! Error types shared across the voice chat crates

use thiserror::Error;

/// Result alias using the core [`Error`]
pub type Result<T> = std::result::Result<T, Error>;

/// Core error taxonomy
///
/// Collaborator failures are recovered close to where they happen. Only
/// [`Error::ConcurrencyViolation`] is allowed to end a session.
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// Network hiccup talking to a remote collaborator; safe to retry
    #[error("Transient I/O error in {component}: {message}")]
    Transient { component: String, message: String },

    /// Collaborator answered but the answer is unusable; retrying won't help
    #[error("{component} error: {message}")]
    Collaborator { component: String, message: String },

    #[error("Role not found: {0}")]
    RoleNotFound(String),

    #[error("Audio decode error: {0}")]
    Decode(String),

    #[error("Playback resource missing: {0}")]
    PlaybackResourceMissing(String),

    /// Internal invariant broken; a programming defect, not a runtime condition
    #[error("Concurrency violation: {0}")]
    ConcurrencyViolation(String),

    #[error("Channel closed")]
    ChannelClosed,

    #[error("Timeout after {0}ms")]
    Timeout(u64),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl Error {
    /// Shorthand for a transient collaborator error
    pub fn transient(component: impl Into<String>, message: impl ToString) -> Self {
        Error::Transient {
            component: component.into(),
            message: message.to_string(),
        }
    }

    /// Shorthand for a permanent collaborator error
    pub fn collaborator(component: impl Into<String>, message: impl ToString) -> Self {
        Error::Collaborator {
            component: component.into(),
            message: message.to_string(),
        }
    }

    /// Whether retrying the failed operation may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Transient { .. } | Error::Timeout(_))
    }

    /// Whether this error must terminate the session
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::ConcurrencyViolation(_))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Collaborator {
            component: "serialization".to_string(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(Error::transient("agent", "connection reset").is_transient());
        assert!(Error::Timeout(5000).is_transient());
        assert!(!Error::RoleNotFound("x".into()).is_transient());
        assert!(!Error::collaborator("tts", "bad voice").is_transient());

        assert!(Error::ConcurrencyViolation("double transition".into()).is_fatal());
        assert!(!Error::Decode("odd frame".into()).is_fatal());
    }

    #[test]
    fn test_error_display() {
        let err = Error::transient("recognition", "socket closed");
        assert_eq!(
            err.to_string(),
            "Transient I/O error in recognition: socket closed"
        );
        assert_eq!(
            Error::RoleNotFound("ghost".into()).to_string(),
            "Role not found: ghost"
        );
    }
}
