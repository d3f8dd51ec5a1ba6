//! Conversational agent trait

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{Result, Role};

/// One utterance sent to the agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentRequest {
    pub utterance_text: String,
    pub role_id: String,
    /// Character the agent should play, when the role defines one
    #[serde(default)]
    pub character_id: Option<String>,
}

impl AgentRequest {
    pub fn new(utterance_text: impl Into<String>, role: &Role) -> Self {
        Self {
            utterance_text: utterance_text.into(),
            role_id: role.id.clone(),
            character_id: role.character_id.clone(),
        }
    }
}

/// Agent answer for one request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentReply {
    pub reply_text: String,
    /// Session the agent filed this exchange under
    #[serde(default)]
    pub session_id: Option<String>,
}

/// Remote conversational agent
///
/// Implementations keep the session id returned by the service and send it
/// on the next call, so consecutive calls share conversational context.
/// Without a stored session id the call starts a fresh conversation.
#[async_trait]
pub trait AgentClient: Send + Sync + 'static {
    /// Send an utterance and wait for the reply
    async fn chat(&self, request: AgentRequest) -> Result<AgentReply>;

    /// Forget the stored session id
    fn reset_session(&self);

    /// Currently stored session id
    fn session_id(&self) -> Option<String>;

    /// Backend name for logging
    fn name(&self) -> &str;
}
