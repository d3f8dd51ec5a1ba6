//! One-shot recognition of a recorded clip
//!
//! Opens a dedicated connection, streams the clip in frame-sized chunks and
//! collects results until the service goes quiet after a final result or the
//! timeout passes. Independent of the live [`RecognitionSession`](super::RecognitionSession).

use std::time::Duration;

use futures::StreamExt;
use tokio::time::Instant;
use voice_chat_config::constants::audio::FRAME_BYTES;
use voice_chat_config::RecognitionSettings;
use voice_chat_core::{AudioFrame, RecognitionClient, Result};

use super::TranscriptBuffer;

#[derive(Debug, Clone)]
pub struct ClipConfig {
    /// Chunk size the clip is sent in
    pub frame_bytes: usize,
    /// Quiet period after a final result that ends collection
    pub settle: Duration,
    /// Upper bound on waiting for results once the clip is sent
    pub timeout: Duration,
}

impl Default for ClipConfig {
    fn default() -> Self {
        Self::from(&RecognitionSettings::default())
    }
}

impl From<&RecognitionSettings> for ClipConfig {
    fn from(settings: &RecognitionSettings) -> Self {
        Self {
            frame_bytes: FRAME_BYTES,
            settle: Duration::from_millis(settings.clip_settle_ms),
            timeout: Duration::from_millis(settings.clip_timeout_ms),
        }
    }
}

/// Recognize a PCM16LE clip and return its transcript
///
/// Returns whatever was recognized when the wait ends, which may be empty.
/// The connection is closed on every path.
pub async fn recognize_clip(
    client: &dyn RecognitionClient,
    pcm: &[u8],
    config: &ClipConfig,
) -> Result<String> {
    let mut stream = client.connect().await?;
    let result: Result<String> = async {
        for (sequence, chunk) in pcm.chunks(config.frame_bytes.max(2)).enumerate() {
            client
                .send_audio(&AudioFrame::new(chunk.to_vec(), sequence as u64))
                .await?;
        }

        let transcript = TranscriptBuffer::new();
        let deadline = Instant::now() + config.timeout;
        let mut heard_final = false;

        loop {
            let wait_until = if heard_final {
                (Instant::now() + config.settle).min(deadline)
            } else {
                deadline
            };
            match tokio::time::timeout_at(wait_until, stream.next()).await {
                Ok(Some(Ok(event))) => {
                    heard_final |= event.is_final;
                    transcript.apply(&event);
                }
                Ok(Some(Err(e))) => {
                    tracing::warn!(error = %e, "Clip recognition stream error");
                }
                Ok(None) | Err(_) => break,
            }
        }
        Ok(transcript.take())
    }
    .await;

    if let Err(e) = client.close().await {
        tracing::debug!(error = %e, "Error closing clip recognition connection");
    }

    match &result {
        Ok(text) => tracing::info!(bytes = pcm.len(), text = %text, "Clip recognized"),
        Err(e) => tracing::warn!(bytes = pcm.len(), error = %e, "Clip recognition failed"),
    }
    result
}
