//! Conversation types: turn state, utterances and completed-turn records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who currently holds the conversational floor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConversationState {
    /// Nobody is speaking
    #[default]
    Idle,
    /// User is talking, or their utterance is with the agent
    UserSpeaking,
    /// Synthesized reply is queued or playing
    AiSpeaking,
}

impl ConversationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationState::Idle => "idle",
            ConversationState::UserSpeaking => "user_speaking",
            ConversationState::AiSpeaking => "ai_speaking",
        }
    }
}

impl std::fmt::Display for ConversationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One finalized span of user speech converted to text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utterance {
    text: String,
    timestamp: DateTime<Utc>,
}

impl Utterance {
    /// Create an utterance, trimming surrounding whitespace
    ///
    /// Returns `None` for empty or whitespace-only text.
    pub fn new(text: impl AsRef<str>) -> Option<Self> {
        let text = text.as_ref().trim();
        if text.is_empty() {
            return None;
        }
        Some(Self {
            text: text.to_string(),
            timestamp: Utc::now(),
        })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Persisted (input, output) pair for one completed agent round-trip
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationRecord {
    #[serde(default)]
    pub session_id: Option<String>,
    pub role_id: String,
    pub user_input: String,
    pub ai_response: String,
    pub timestamp: DateTime<Utc>,
}

impl ConversationRecord {
    pub fn new(
        role_id: impl Into<String>,
        user_input: impl Into<String>,
        ai_response: impl Into<String>,
        session_id: Option<String>,
    ) -> Self {
        Self {
            session_id,
            role_id: role_id.into(),
            user_input: user_input.into(),
            ai_response: ai_response.into(),
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_serde_names() {
        let json = serde_json::to_string(&ConversationState::UserSpeaking).unwrap();
        assert_eq!(json, "\"user_speaking\"");
        let state: ConversationState = serde_json::from_str("\"ai_speaking\"").unwrap();
        assert_eq!(state, ConversationState::AiSpeaking);
        assert_eq!(ConversationState::default(), ConversationState::Idle);
    }

    #[test]
    fn test_utterance_rejects_blank_text() {
        assert!(Utterance::new("").is_none());
        assert!(Utterance::new("  \n\t ").is_none());

        let utterance = Utterance::new("  你好  ").unwrap();
        assert_eq!(utterance.text(), "你好");
    }

    #[test]
    fn test_record_json_fields() {
        let record = ConversationRecord::new("libai", "hi", "hello", Some("s-1".into()));
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["role_id"], "libai");
        assert_eq!(value["user_input"], "hi");
        assert_eq!(value["ai_response"], "hello");
        assert_eq!(value["session_id"], "s-1");
        assert!(value["timestamp"].is_string());
    }
}
