//! Conversational agent integration
//!
//! Features:
//! - HTTP application-completion client (DashScope-style apps API)
//! - Session continuity: the service's session id is replayed on the next call
//! - Bounded retry on transient failures

pub mod backend;

pub use backend::{AgentConfig, HttpAgentClient};

use thiserror::Error;

/// Agent errors
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("API error: {0}")]
    Api(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Timeout")]
    Timeout,

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl LlmError {
    /// Whether a retry may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, LlmError::Network(_) | LlmError::Timeout)
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LlmError::Timeout
        } else if err.is_decode() {
            LlmError::InvalidResponse(err.to_string())
        } else {
            LlmError::Network(err.to_string())
        }
    }
}

impl From<LlmError> for voice_chat_core::Error {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::Configuration(msg) => voice_chat_core::Error::Config(msg),
            err if err.is_retryable() => voice_chat_core::Error::transient("agent", err),
            err => voice_chat_core::Error::collaborator("agent", err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let core: voice_chat_core::Error = LlmError::Network("reset".into()).into();
        assert!(core.is_transient());

        let core: voice_chat_core::Error = LlmError::Api("401".into()).into();
        assert!(!core.is_transient());

        let core: voice_chat_core::Error = LlmError::Configuration("no app".into()).into();
        assert!(matches!(core, voice_chat_core::Error::Config(_)));
    }
}
