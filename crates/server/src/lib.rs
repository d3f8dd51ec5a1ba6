//! Voice Chat Server
//!
//! Command surface for a running voice dialogue: REST endpoints for text
//! input, direct speech, clip recognition, role switching, the listening and
//! speech output switches, interrupt and state, plus a WebSocket that streams
//! dialogue events and accepts raw PCM audio.

pub mod http;
pub mod state;
pub mod websocket;

#[cfg(test)]
mod test_support;

pub use http::create_router;
pub use state::AppState;
pub use websocket::WebSocketHandler;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;
use voice_chat_agent::AgentError;

/// Server errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Role not found: {0}")]
    RoleNotFound(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Dialogue unavailable: {0}")]
    Unavailable(String),

    /// Superseded by an interrupt or a newer turn
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<ServerError> for StatusCode {
    fn from(err: ServerError) -> Self {
        match err {
            ServerError::RoleNotFound(_) => StatusCode::NOT_FOUND,
            ServerError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ServerError::Conflict(_) => StatusCode::CONFLICT,
            ServerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<AgentError> for ServerError {
    fn from(err: AgentError) -> Self {
        match err {
            AgentError::EmptyUtterance => ServerError::InvalidRequest(err.to_string()),
            AgentError::ControllerStopped => ServerError::Unavailable(err.to_string()),
            AgentError::Cancelled => ServerError::Conflict(err.to_string()),
            AgentError::Core(voice_chat_core::Error::RoleNotFound(id)) => ServerError::RoleNotFound(id),
            AgentError::Core(voice_chat_core::Error::Transient { .. }) => {
                ServerError::Unavailable(err.to_string())
            }
            other => ServerError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let message = self.to_string();
        let status = StatusCode::from(self);
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), error = %message, "Request failed");
        } else {
            tracing::debug!(status = status.as_u16(), error = %message, "Request rejected");
        }
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_error_status() {
        let status = |err: AgentError| StatusCode::from(ServerError::from(err));

        assert_eq!(status(AgentError::EmptyUtterance), StatusCode::BAD_REQUEST);
        assert_eq!(status(AgentError::ControllerStopped), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(status(AgentError::Cancelled), StatusCode::CONFLICT);
        assert_eq!(
            status(AgentError::Core(voice_chat_core::Error::RoleNotFound("x".into()))),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status(AgentError::Core(voice_chat_core::Error::Config("bad".into()))),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
