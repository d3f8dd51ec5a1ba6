//! Voice Activity Detection
//!
//! Energy-based detector: a frame is voiced when its mean absolute amplitude
//! exceeds the silence threshold. Debounced speech start, silence-terminated
//! speech end carrying the transcript accumulated meanwhile.

mod energy;

pub use energy::{SpeechSegment, VadConfig, VadEvent, VadState, VoiceActivityDetector};
