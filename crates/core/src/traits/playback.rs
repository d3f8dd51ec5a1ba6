//! Playback primitive

use crate::{AudioRef, Result};

/// Device-level player for one audio artifact at a time
///
/// The playback loop calls `start`, then polls `is_complete` until it
/// returns true or the item is cancelled with `stop`. None of the methods
/// may block for longer than it takes to hand work to the device.
pub trait AudioSink: Send + Sync + 'static {
    /// Begin playing `audio`, replacing anything still playing
    ///
    /// Fails with `Error::PlaybackResourceMissing` when the artifact is
    /// missing or unreadable.
    fn start(&self, audio: &AudioRef) -> Result<()>;

    /// Whether the item last started has finished (or nothing was started)
    fn is_complete(&self) -> bool;

    /// Stop the current item immediately; no-op when idle
    fn stop(&self);
}
