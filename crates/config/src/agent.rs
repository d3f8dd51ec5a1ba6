//! Agent service and turn configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};
use voice_chat_core::RetryPolicy;

use crate::constants::{endpoints, retry, timeouts};

/// Bounded exponential backoff shared by all remote collaborators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Retries after the first attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// First backoff, doubled after every failed attempt (ms)
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,
}

fn default_max_retries() -> u32 {
    retry::MAX_RETRIES
}
fn default_initial_backoff() -> u64 {
    retry::INITIAL_BACKOFF_MS
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff(),
        }
    }
}

impl RetrySettings {
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }
}

impl From<RetrySettings> for RetryPolicy {
    fn from(settings: RetrySettings) -> Self {
        RetryPolicy::new(settings.max_retries, settings.initial_backoff())
    }
}

/// Conversational agent service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSettings {
    /// Application API base URL
    #[serde(default = "default_agent_url")]
    pub url: String,

    /// Bearer token; falls back to `DASHSCOPE_API_KEY`
    #[serde(default = "default_api_key")]
    pub api_key: Option<String>,

    /// Application id on the agent platform
    #[serde(default = "default_app_id")]
    pub app_id: Option<String>,

    /// Single HTTP request timeout (ms)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,

    /// Whole round-trip budget before the fallback reply is used (ms)
    #[serde(default = "default_turn_timeout")]
    pub turn_timeout_ms: u64,

    /// Spoken when the agent fails or times out
    #[serde(default = "default_fallback_reply")]
    pub fallback_reply: String,

    #[serde(default)]
    pub retry: RetrySettings,
}

fn default_agent_url() -> String {
    endpoints::AGENT_DEFAULT.to_string()
}
fn default_api_key() -> Option<String> {
    std::env::var("DASHSCOPE_API_KEY").ok().filter(|k| !k.is_empty())
}
fn default_app_id() -> Option<String> {
    std::env::var("DASHSCOPE_APP_ID").ok().filter(|k| !k.is_empty())
}
fn default_request_timeout() -> u64 {
    timeouts::AGENT_REQUEST_MS
}
fn default_turn_timeout() -> u64 {
    timeouts::TURN_MS
}
fn default_fallback_reply() -> String {
    "抱歉，我现在无法回答，请稍后再试。".to_string()
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            url: default_agent_url(),
            api_key: default_api_key(),
            app_id: default_app_id(),
            request_timeout_ms: default_request_timeout(),
            turn_timeout_ms: default_turn_timeout(),
            fallback_reply: default_fallback_reply(),
            retry: RetrySettings::default(),
        }
    }
}

impl AgentSettings {
    pub fn turn_timeout(&self) -> Duration {
        Duration::from_millis(self.turn_timeout_ms)
    }
}
