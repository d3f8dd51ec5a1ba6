//! Voice dialogue runtime
//!
//! Features:
//! - Turn-taking state machine (`Idle`, `UserSpeaking`, `AiSpeaking`) running
//!   as a single actor task; all transitions are serialized through its inbox
//! - Barge-in: user speech during playback interrupts it
//! - Single-flight agent dispatch with ordered queuing of later utterances
//! - Timeout-driven fallback reply so every turn returns to `Idle`
//! - Text chat that returns the reply, direct speech, and switches for
//!   listening and spoken output
//! - `VoiceDialogue`: wires ingest, VAD, recognition, playback and the
//!   controller together and owns their tasks

pub mod dialogue;
pub mod turn;

pub use dialogue::{Collaborators, VoiceDialogue};
pub use turn::{
    turn_channel, ChatReply, DialogueEvent, TurnConfig, TurnController, TurnDeps, TurnHandle,
    TurnInbox,
};

use thiserror::Error;

/// Agent errors
#[derive(Error, Debug, Clone)]
pub enum AgentError {
    #[error("Utterance is empty")]
    EmptyUtterance,

    #[error("Turn controller is not running")]
    ControllerStopped,

    /// Dropped by an interrupt or a newer turn before it completed
    #[error("Request was cancelled")]
    Cancelled,

    #[error(transparent)]
    Core(#[from] voice_chat_core::Error),
}

impl From<voice_chat_pipeline::PipelineError> for AgentError {
    fn from(err: voice_chat_pipeline::PipelineError) -> Self {
        AgentError::Core(err.into())
    }
}

impl From<voice_chat_llm::LlmError> for AgentError {
    fn from(err: voice_chat_llm::LlmError) -> Self {
        AgentError::Core(err.into())
    }
}

impl From<voice_chat_persistence::PersistenceError> for AgentError {
    fn from(err: voice_chat_persistence::PersistenceError) -> Self {
        AgentError::Core(err.into())
    }
}

impl From<voice_chat_config::ConfigError> for AgentError {
    fn from(err: voice_chat_config::ConfigError) -> Self {
        AgentError::Core(err.into())
    }
}
