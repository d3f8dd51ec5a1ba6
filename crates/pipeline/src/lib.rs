//! Audio pipeline for the voice chat engine
//!
//! Components:
//! - `vad`: energy-based voice activity detection producing speech start/end events
//! - `stt`: transcript accumulation, the recognition session (keepalive and
//!   reconnect) and a streaming WebSocket recognition client
//! - `tts`: reply segmentation and an HTTP synthesis client
//! - `playback`: epoch-guarded playback queue and an external-player sink
//! - `ingest`: audio sources feeding frames into the pipeline

pub mod ingest;
pub mod playback;
pub mod stt;
pub mod tts;
pub mod vad;

pub use ingest::{channel_source, AudioFrameSender, AudioSource, ChannelAudioSource};
pub use playback::{
    CommandSink, PlaybackCallback, PlaybackConfig, PlaybackController, PlaybackItem,
};
pub use stt::{
    recognize_clip, ClipConfig, RecognitionConfig, RecognitionSession, TranscriptBuffer,
    WsRecognitionClient, WsRecognitionConfig,
};
pub use tts::{split_segments, HttpSynthesisClient, SynthesisConfig};
pub use vad::{SpeechSegment, VadConfig, VadEvent, VadState, VoiceActivityDetector};

use thiserror::Error;

/// Pipeline errors
#[derive(Error, Debug, Clone)]
pub enum PipelineError {
    #[error("Recognition error: {0}")]
    Recognition(String),

    #[error("Synthesis error: {0}")]
    Synthesis(String),

    #[error("Playback error: {0}")]
    Playback(String),

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Channel closed")]
    ChannelClosed,
}

impl From<PipelineError> for voice_chat_core::Error {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::Recognition(msg) => voice_chat_core::Error::collaborator("recognition", msg),
            PipelineError::Synthesis(msg) => voice_chat_core::Error::collaborator("synthesis", msg),
            PipelineError::Playback(msg) => voice_chat_core::Error::collaborator("playback", msg),
            PipelineError::Configuration(msg) => voice_chat_core::Error::Config(msg),
            PipelineError::ChannelClosed => voice_chat_core::Error::ChannelClosed,
        }
    }
}
