//! Audio ingestion
//!
//! An [`AudioSource`] yields PCM frames in arrival order. The channel source
//! lets any producer (an HTTP upload, a capture thread, a test) push frames
//! without blocking; frames are dropped when the consumer falls behind.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use voice_chat_core::{AudioFrame, Error, Result};

/// Producer of live audio frames
#[async_trait]
pub trait AudioSource: Send + 'static {
    /// Next frame, or `None` once the source is exhausted
    ///
    /// Must be cancel-safe: consumers race it against control signals.
    async fn next_frame(&mut self) -> Option<AudioFrame>;
}

/// Sending half of a channel-backed source
#[derive(Clone)]
pub struct AudioFrameSender {
    tx: mpsc::Sender<AudioFrame>,
    sequence: Arc<AtomicU64>,
}

impl AudioFrameSender {
    /// Push raw PCM16LE bytes; fails when the buffer is full or the source is gone
    pub fn push(&self, data: impl Into<Arc<[u8]>>) -> Result<()> {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        match self.tx.try_send(AudioFrame::new(data, sequence)) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(frame)) => {
                tracing::warn!(sequence = frame.sequence, "Audio buffer full, dropping frame");
                Err(Error::transient("ingest", "audio buffer full"))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(Error::ChannelClosed),
        }
    }

    /// Split a PCM buffer into frames of `frame_bytes` and push each
    ///
    /// Returns how many frames were accepted.
    pub fn push_chunked(&self, pcm: &[u8], frame_bytes: usize) -> Result<usize> {
        let frame_bytes = frame_bytes.max(2);
        let mut accepted = 0;
        for chunk in pcm.chunks(frame_bytes) {
            self.push(chunk.to_vec())?;
            accepted += 1;
        }
        Ok(accepted)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Receiving half of a channel-backed source
pub struct ChannelAudioSource {
    rx: mpsc::Receiver<AudioFrame>,
}

#[async_trait]
impl AudioSource for ChannelAudioSource {
    async fn next_frame(&mut self) -> Option<AudioFrame> {
        self.rx.recv().await
    }
}

/// Bounded channel source holding at most `capacity` frames
pub fn channel_source(capacity: usize) -> (AudioFrameSender, ChannelAudioSource) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        AudioFrameSender {
            tx,
            sequence: Arc::new(AtomicU64::new(0)),
        },
        ChannelAudioSource { rx },
    )
}
