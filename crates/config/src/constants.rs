//! Centralized constants for the voice chat engine
//!
//! Default values used across the workspace. Settings fall back to these,
//! so the numbers live in exactly one place.

/// Audio framing
pub mod audio {
    /// Input sample rate (Hz), 16-bit mono PCM
    pub const SAMPLE_RATE: u32 = 16000;

    /// Duration of one ingest frame (ms)
    pub const FRAME_MS: u64 = 50;

    /// Bytes in one 50ms frame at 16kHz PCM16
    pub const FRAME_BYTES: usize = 1600;

    /// Energy is computed over at most this many bytes of a frame
    pub const MAX_ANALYSIS_BYTES: usize = 1600;
}

/// Energy VAD defaults
pub mod vad {
    /// Mean absolute amplitude above which a frame counts as voiced
    pub const SILENCE_THRESHOLD: f32 = 500.0;

    /// Voiced frames that must be exceeded before speech starts
    pub const DEBOUNCE_FRAMES: u32 = 3;

    /// Trailing silence that ends an utterance (seconds)
    pub const SILENCE_DURATION_SECS: f32 = 2.0;
}

/// Recognition connection keepalive
pub mod recognition {
    /// How often the watchdog wakes up (seconds)
    pub const WATCHDOG_INTERVAL_SECS: u64 = 5;

    /// Silent heartbeat frame cadence (seconds)
    pub const HEARTBEAT_INTERVAL_SECS: u64 = 15;

    /// Reconnect when nothing was heard from the service for this long (seconds)
    pub const INACTIVITY_TIMEOUT_SECS: u64 = 60;

    /// Size of the silent heartbeat frame (bytes)
    pub const HEARTBEAT_FRAME_BYTES: usize = 1600;

    /// Consecutive send failures that trigger a reconnect
    pub const MAX_CONSECUTIVE_SEND_ERRORS: u32 = 5;

    /// Quiet period after a final result that ends one-shot clip recognition (ms)
    pub const CLIP_SETTLE_MS: u64 = 500;

    /// Longest wait for a clip's transcript once the audio is sent (ms)
    pub const CLIP_TIMEOUT_MS: u64 = 2_000;
}

/// Playback loop
pub mod playback {
    /// Sink poll interval (ms); also bounds interrupt latency
    pub const POLL_INTERVAL_MS: u64 = 100;

    /// Upper bound accepted for the poll interval (ms)
    pub const MAX_POLL_INTERVAL_MS: u64 = 500;

    /// Longest a single item may play before it is stopped (ms)
    pub const MAX_ITEM_MS: u64 = 120_000;
}

/// Timeouts
pub mod timeouts {
    /// Single agent HTTP request (ms)
    pub const AGENT_REQUEST_MS: u64 = 20_000;

    /// Whole agent round-trip including retries before falling back (ms)
    pub const TURN_MS: u64 = 30_000;

    /// Synthesis request (ms)
    pub const SYNTHESIS_MS: u64 = 15_000;

    /// Recognition connect handshake (ms)
    pub const RECOGNITION_CONNECT_MS: u64 = 10_000;
}

/// Collaborator retry policy
pub mod retry {
    pub const MAX_RETRIES: u32 = 3;

    /// First backoff; doubled after every failed attempt (ms)
    pub const INITIAL_BACKOFF_MS: u64 = 100;
}

/// Service endpoints (defaults for local development)
pub mod endpoints {
    /// Local TTS service
    pub const SYNTHESIS_DEFAULT: &str = "http://localhost:51000/api/tts";

    /// Agent application API base; the app id and `/completion` are appended
    pub const AGENT_DEFAULT: &str = "https://dashscope.aliyuncs.com/api/v1/apps";

    /// Streaming recognition WebSocket
    pub const RECOGNITION_DEFAULT: &str = "ws://127.0.0.1:51002/asr";

    /// Port for the command surface
    pub const SERVER_PORT: u16 = 51001;
}

/// Synthesis defaults
pub mod synthesis {
    pub const MODEL: &str = "cosyvoice-v2";
}
