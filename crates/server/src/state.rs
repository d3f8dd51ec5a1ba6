//! Application State
//!
//! Shared state across all handlers.

use std::sync::Arc;

use voice_chat_agent::VoiceDialogue;
use voice_chat_config::Settings;

/// Application state
#[derive(Clone)]
pub struct AppState {
    /// Settings the dialogue was started with
    pub config: Arc<Settings>,
    /// The running conversation
    pub dialogue: Arc<VoiceDialogue>,
}

impl AppState {
    pub fn new(config: Settings, dialogue: VoiceDialogue) -> Self {
        Self {
            config: Arc::new(config),
            dialogue: Arc::new(dialogue),
        }
    }

    pub fn dialogue(&self) -> &VoiceDialogue {
        &self.dialogue
    }
}
