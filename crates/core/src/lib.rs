//! Core traits and types for the voice chat engine
//!
//! This crate provides foundational types used across all other crates:
//! - Collaborator traits (recognition, agent, synthesis, playback, conversation log)
//! - Audio frame types and energy computation
//! - Conversation state, utterances and turn records
//! - Role registry
//! - Error types and the retry policy for remote calls

pub mod audio;
pub mod conversation;
pub mod error;
pub mod retry;
pub mod role;
pub mod traits;
pub mod transcript;

pub use audio::{AudioFrame, AudioRef};
pub use conversation::{ConversationRecord, ConversationState, Utterance};
pub use error::{Error, Result};
pub use retry::RetryPolicy;
pub use role::{Role, RoleRegistry};
pub use transcript::TranscriptEvent;

pub use traits::{
    // Agent
    AgentClient,
    AgentReply,
    AgentRequest,
    // Playback
    AudioSink,
    // Persistence
    ConversationLog,
    // Listener
    NoopListener,
    // Speech
    RecognitionClient,
    SynthesisClient,
    TranscriptStream,
    TurnListener,
};
