//! Recognition result events

use serde::{Deserialize, Serialize};

/// One result delivered by the recognition service
///
/// The service sends the cumulative text of the sentence so far, so a later
/// event for the same sentence supersedes the earlier one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptEvent {
    pub text: String,
    #[serde(default)]
    pub is_final: bool,
}

impl TranscriptEvent {
    pub fn partial(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: false,
        }
    }

    pub fn final_result(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: true,
        }
    }
}
