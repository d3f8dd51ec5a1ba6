//! Turn notifications

use crate::{ConversationState, Utterance};

/// Callbacks fired by the turn controller
///
/// Handed over at construction time. Callbacks run on the controller task,
/// so implementations should return quickly and never call back into the
/// controller synchronously.
pub trait TurnListener: Send + Sync + 'static {
    /// An utterance was finalized and is about to be sent to the agent
    fn on_utterance_finalized(&self, utterance: &Utterance);

    /// Playback for the turn tagged with `epoch` finished
    fn on_playback_completed(&self, epoch: u64);

    /// State changed from `from` to `to`
    fn on_state_changed(&self, _from: ConversationState, _to: ConversationState) {}
}

/// Listener that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopListener;

impl TurnListener for NoopListener {
    fn on_utterance_finalized(&self, _utterance: &Utterance) {}

    fn on_playback_completed(&self, _epoch: u64) {}
}
