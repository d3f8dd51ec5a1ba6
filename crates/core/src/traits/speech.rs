//! Speech processing traits

use crate::{AudioFrame, AudioRef, Result, TranscriptEvent};
use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

/// Stream of recognition results for one connection
pub type TranscriptStream = Pin<Box<dyn Stream<Item = Result<TranscriptEvent>> + Send>>;

/// Streaming speech recognition service
///
/// A client owns at most one live connection. `connect` replaces any
/// previous connection and returns the event stream for the new one; the
/// stream ends when the connection closes.
///
/// # Example
///
/// ```ignore
/// let client: Arc<dyn RecognitionClient> = Arc::new(WsRecognitionClient::new(config));
/// let mut events = client.connect().await?;
/// client.send_audio(&frame).await?;
/// while let Some(event) = events.next().await {
///     println!("heard: {}", event?.text);
/// }
/// ```
#[async_trait]
pub trait RecognitionClient: Send + Sync + 'static {
    /// Open a connection and return its transcript events
    async fn connect(&self) -> Result<TranscriptStream>;

    /// Forward one PCM frame on the live connection
    async fn send_audio(&self, frame: &AudioFrame) -> Result<()>;

    /// Close the live connection, if any
    async fn close(&self) -> Result<()>;

    /// Backend name for logging
    fn name(&self) -> &str;
}

/// Text-to-speech service
#[async_trait]
pub trait SynthesisClient: Send + Sync + 'static {
    /// Synthesize one text segment with the given voice
    ///
    /// # Returns
    /// A reference to a playable artifact (file path or bytes)
    async fn synthesize(&self, text: &str, voice_id: &str) -> Result<AudioRef>;

    /// Backend name for logging
    fn name(&self) -> &str;
}
