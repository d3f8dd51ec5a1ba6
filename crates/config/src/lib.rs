//! Configuration management for the voice chat engine
//!
//! Supports loading configuration from:
//! - YAML/TOML files under `config/` (`default`, then the environment file)
//! - Environment variables (`VOICE_CHAT__` prefix, `__` separator)
//!
//! Every section has serde defaults, so an empty configuration is valid.

pub mod agent;
pub mod constants;
pub mod pipeline;
pub mod roles;
pub mod settings;

pub use agent::{AgentSettings, RetrySettings};
pub use pipeline::{PlaybackSettings, RecognitionSettings, SynthesisSettings, VadSettings};
pub use roles::{default_roles, DEFAULT_ROLE};
pub use settings::{
    load_settings, load_settings_from, ConversationLogConfig, ObservabilityConfig,
    RuntimeEnvironment, ServerConfig, Settings,
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}

impl From<ConfigError> for voice_chat_core::Error {
    fn from(err: ConfigError) -> Self {
        voice_chat_core::Error::Config(err.to_string())
    }
}
