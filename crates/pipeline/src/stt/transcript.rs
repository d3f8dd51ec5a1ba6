//! Running transcript shared between recognition and the VAD

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use voice_chat_core::TranscriptEvent;

#[derive(Debug)]
struct TranscriptState {
    /// Sentences the service marked final
    committed: String,
    /// Latest partial text of the sentence in progress
    pending: String,
    last_update: Option<Instant>,
}

/// Transcript accumulated since the last finalized utterance
///
/// Recognition results replace the pending sentence until it is marked
/// final, at which point it is committed and the next partial starts a new
/// sentence. The VAD takes the whole text when speech ends.
#[derive(Debug, Clone)]
pub struct TranscriptBuffer {
    inner: Arc<Mutex<TranscriptState>>,
}

impl Default for TranscriptBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl TranscriptBuffer {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(TranscriptState {
                committed: String::new(),
                pending: String::new(),
                last_update: None,
            })),
        }
    }

    /// Apply one recognition event
    pub fn apply(&self, event: &TranscriptEvent) {
        let mut state = self.inner.lock();
        if event.is_final {
            state.committed.push_str(&event.text);
            state.pending.clear();
        } else {
            state.pending.clear();
            state.pending.push_str(&event.text);
        }
        state.last_update = Some(Instant::now());
    }

    /// Current text without consuming it
    pub fn text(&self) -> String {
        let state = self.inner.lock();
        format!("{}{}", state.committed, state.pending)
    }

    /// Take the accumulated text, leaving the buffer empty
    pub fn take(&self) -> String {
        let mut state = self.inner.lock();
        let mut text = std::mem::take(&mut state.committed);
        text.push_str(&state.pending);
        state.pending.clear();
        text
    }

    pub fn clear(&self) {
        let mut state = self.inner.lock();
        state.committed.clear();
        state.pending.clear();
    }

    /// When the last event arrived
    pub fn last_update(&self) -> Option<Instant> {
        self.inner.lock().last_update
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partials_replace_each_other() {
        let buffer = TranscriptBuffer::new();
        buffer.apply(&TranscriptEvent::partial("今天"));
        buffer.apply(&TranscriptEvent::partial("今天天气"));
        assert_eq!(buffer.text(), "今天天气");
    }

    #[test]
    fn test_finals_accumulate() {
        let buffer = TranscriptBuffer::new();
        buffer.apply(&TranscriptEvent::final_result("你好。"));
        buffer.apply(&TranscriptEvent::partial("我想"));
        assert_eq!(buffer.text(), "你好。我想");

        buffer.apply(&TranscriptEvent::final_result("我想听故事。"));
        assert_eq!(buffer.text(), "你好。我想听故事。");
        assert!(buffer.last_update().is_some());
    }

    #[test]
    fn test_take_empties_buffer() {
        let buffer = TranscriptBuffer::new();
        buffer.apply(&TranscriptEvent::partial("hello"));
        assert_eq!(buffer.take(), "hello");
        assert_eq!(buffer.take(), "");
    }

    #[test]
    fn test_clones_share_state() {
        let buffer = TranscriptBuffer::new();
        let writer = buffer.clone();
        writer.apply(&TranscriptEvent::partial("shared"));
        assert_eq!(buffer.text(), "shared");
        buffer.clear();
        assert_eq!(writer.text(), "");
    }
}
