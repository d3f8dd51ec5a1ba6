//! Audio pipeline configuration: VAD, recognition, synthesis and playback

use serde::{Deserialize, Serialize};

use crate::agent::RetrySettings;
use crate::constants::{audio, endpoints, playback, recognition, synthesis, timeouts, vad};

/// Energy VAD parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VadSettings {
    /// Mean absolute amplitude a frame must exceed to count as voiced
    #[serde(default = "default_silence_threshold")]
    pub silence_threshold: f32,

    /// Consecutive voiced frames that must be exceeded to start speech
    #[serde(default = "default_debounce_frames")]
    pub debounce_frames: u32,

    /// Trailing silence that ends speech (seconds)
    #[serde(default = "default_silence_duration")]
    pub silence_duration_secs: f32,

    /// Duration of one input frame (ms)
    #[serde(default = "default_frame_duration")]
    pub frame_duration_ms: u64,

    /// Bytes of each frame used for the energy estimate
    #[serde(default = "default_max_analysis_bytes")]
    pub max_analysis_bytes: usize,
}

fn default_silence_threshold() -> f32 {
    vad::SILENCE_THRESHOLD
}
fn default_debounce_frames() -> u32 {
    vad::DEBOUNCE_FRAMES
}
fn default_silence_duration() -> f32 {
    vad::SILENCE_DURATION_SECS
}
fn default_frame_duration() -> u64 {
    audio::FRAME_MS
}
fn default_max_analysis_bytes() -> usize {
    audio::MAX_ANALYSIS_BYTES
}

impl Default for VadSettings {
    fn default() -> Self {
        Self {
            silence_threshold: default_silence_threshold(),
            debounce_frames: default_debounce_frames(),
            silence_duration_secs: default_silence_duration(),
            frame_duration_ms: default_frame_duration(),
            max_analysis_bytes: default_max_analysis_bytes(),
        }
    }
}

impl VadSettings {
    /// Silent frames that must be exceeded before speech ends
    ///
    /// Rounded rather than truncated so 0.3s / 50ms is 6 and not 5.
    pub fn silence_frame_limit(&self) -> u32 {
        if self.frame_duration_ms == 0 {
            return 0;
        }
        (self.silence_duration_secs as f64 * 1000.0 / self.frame_duration_ms as f64).round() as u32
    }
}

/// Streaming recognition connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecognitionSettings {
    /// WebSocket endpoint of the recognition service
    #[serde(default = "default_recognition_url")]
    pub url: String,

    /// Bearer token sent on connect
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    /// Silent heartbeat cadence; `None` disables heartbeats
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: Option<u64>,

    #[serde(default = "default_watchdog_interval")]
    pub watchdog_interval_secs: u64,

    /// Reconnect when the service has been silent this long
    #[serde(default = "default_inactivity_timeout")]
    pub inactivity_timeout_secs: u64,

    #[serde(default = "default_max_send_errors")]
    pub max_consecutive_send_errors: u32,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    /// Backoff for reconnect attempts
    #[serde(default)]
    pub reconnect: RetrySettings,

    /// One-shot clip recognition: quiet period after a final result
    #[serde(default = "default_clip_settle")]
    pub clip_settle_ms: u64,

    /// One-shot clip recognition: give up waiting for results after this long
    #[serde(default = "default_clip_timeout")]
    pub clip_timeout_ms: u64,
}

fn default_recognition_url() -> String {
    std::env::var("VOICE_CHAT_ASR_URL").unwrap_or_else(|_| endpoints::RECOGNITION_DEFAULT.to_string())
}
fn default_sample_rate() -> u32 {
    audio::SAMPLE_RATE
}
fn default_heartbeat_interval() -> Option<u64> {
    Some(recognition::HEARTBEAT_INTERVAL_SECS)
}
fn default_watchdog_interval() -> u64 {
    recognition::WATCHDOG_INTERVAL_SECS
}
fn default_inactivity_timeout() -> u64 {
    recognition::INACTIVITY_TIMEOUT_SECS
}
fn default_max_send_errors() -> u32 {
    recognition::MAX_CONSECUTIVE_SEND_ERRORS
}
fn default_connect_timeout() -> u64 {
    timeouts::RECOGNITION_CONNECT_MS
}
fn default_clip_settle() -> u64 {
    recognition::CLIP_SETTLE_MS
}
fn default_clip_timeout() -> u64 {
    recognition::CLIP_TIMEOUT_MS
}

impl Default for RecognitionSettings {
    fn default() -> Self {
        Self {
            url: default_recognition_url(),
            api_key: None,
            sample_rate: default_sample_rate(),
            heartbeat_interval_secs: default_heartbeat_interval(),
            watchdog_interval_secs: default_watchdog_interval(),
            inactivity_timeout_secs: default_inactivity_timeout(),
            max_consecutive_send_errors: default_max_send_errors(),
            connect_timeout_ms: default_connect_timeout(),
            reconnect: RetrySettings::default(),
            clip_settle_ms: default_clip_settle(),
            clip_timeout_ms: default_clip_timeout(),
        }
    }
}

/// Text-to-speech service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisSettings {
    #[serde(default = "default_synthesis_url")]
    pub url: String,

    #[serde(default = "default_synthesis_model")]
    pub model: String,

    #[serde(default = "default_synthesis_timeout")]
    pub request_timeout_ms: u64,

    #[serde(default)]
    pub retry: RetrySettings,
}

fn default_synthesis_url() -> String {
    endpoints::SYNTHESIS_DEFAULT.to_string()
}
fn default_synthesis_model() -> String {
    synthesis::MODEL.to_string()
}
fn default_synthesis_timeout() -> u64 {
    timeouts::SYNTHESIS_MS
}

impl Default for SynthesisSettings {
    fn default() -> Self {
        Self {
            url: default_synthesis_url(),
            model: default_synthesis_model(),
            request_timeout_ms: default_synthesis_timeout(),
            retry: RetrySettings::default(),
        }
    }
}

/// Playback loop and player
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackSettings {
    /// How often the loop polls the sink; bounds interrupt latency
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// A player that has not finished after this long is stopped
    #[serde(default = "default_max_item")]
    pub max_item_ms: u64,

    /// External player invoked with the audio file path appended
    #[serde(default = "default_player_command")]
    pub player_command: Vec<String>,
}

fn default_poll_interval() -> u64 {
    playback::POLL_INTERVAL_MS
}
fn default_max_item() -> u64 {
    playback::MAX_ITEM_MS
}
fn default_player_command() -> Vec<String> {
    ["ffplay", "-nodisp", "-autoexit", "-loglevel", "quiet"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
            max_item_ms: default_max_item(),
            player_command: default_player_command(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vad_defaults() {
        let vad = VadSettings::default();
        assert_eq!(vad.silence_threshold, 500.0);
        assert_eq!(vad.debounce_frames, 3);
        assert_eq!(vad.silence_frame_limit(), 40);
    }

    #[test]
    fn test_silence_frame_limit_rounds() {
        let vad = VadSettings {
            silence_duration_secs: 0.3,
            ..VadSettings::default()
        };
        assert_eq!(vad.silence_frame_limit(), 6);

        let vad = VadSettings {
            silence_duration_secs: 1.0,
            ..VadSettings::default()
        };
        assert_eq!(vad.silence_frame_limit(), 20);
    }

    #[test]
    fn test_heartbeat_can_be_disabled() {
        let settings: RecognitionSettings =
            serde_yaml::from_str("url: ws://asr\nheartbeat_interval_secs: null\n").unwrap();
        assert_eq!(settings.url, "ws://asr");
        assert!(settings.heartbeat_interval_secs.is_none());
        assert_eq!(settings.inactivity_timeout_secs, 60);
    }

    #[test]
    fn test_player_command_default() {
        let playback = PlaybackSettings::default();
        assert_eq!(playback.player_command[0], "ffplay");
        assert!(playback.poll_interval_ms <= 500);
    }
}
