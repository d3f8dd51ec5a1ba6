//! Energy-based Voice Activity Detector

use std::time::Instant;

use parking_lot::Mutex;
use voice_chat_config::VadSettings;
use voice_chat_core::AudioFrame;

use crate::stt::TranscriptBuffer;

/// VAD configuration
#[derive(Debug, Clone)]
pub struct VadConfig {
    /// Mean absolute amplitude a frame must exceed to be voiced
    pub silence_threshold: f32,
    /// Voiced frames that must be exceeded before speech starts
    pub debounce_frames: u32,
    /// Silent frames that must be exceeded before speech ends
    pub silence_frame_limit: u32,
    /// Bytes of each frame used for the energy estimate
    pub max_analysis_bytes: usize,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self::from(&VadSettings::default())
    }
}

impl From<&VadSettings> for VadConfig {
    fn from(settings: &VadSettings) -> Self {
        Self {
            silence_threshold: settings.silence_threshold,
            debounce_frames: settings.debounce_frames,
            silence_frame_limit: settings.silence_frame_limit(),
            max_analysis_bytes: settings.max_analysis_bytes,
        }
    }
}

/// Detector mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VadState {
    #[default]
    Idle,
    Speaking,
}

/// Detector output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VadEvent {
    SpeechStarted,
    /// Speech ended; carries the transcript accumulated during the segment
    SpeechEnded(String),
}

/// Evidence for the utterance in progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpeechSegment {
    pub started_at: Instant,
    pub voiced_frames: u32,
    pub silence_frames: u32,
}

impl SpeechSegment {
    fn new(voiced_frames: u32) -> Self {
        Self {
            started_at: Instant::now(),
            voiced_frames,
            silence_frames: 0,
        }
    }
}

/// All mutable detector state, behind one lock
struct VadMutableState {
    state: VadState,
    talking_frames: u32,
    silence_frames: u32,
    segment: Option<SpeechSegment>,
}

/// Energy Voice Activity Detector
///
/// Runs for the lifetime of a session and never fails: frames that cannot
/// be decoded count as silence.
pub struct VoiceActivityDetector {
    config: VadConfig,
    transcript: TranscriptBuffer,
    mutable: Mutex<VadMutableState>,
}

impl VoiceActivityDetector {
    pub fn new(config: VadConfig, transcript: TranscriptBuffer) -> Self {
        Self {
            config,
            transcript,
            mutable: Mutex::new(VadMutableState {
                state: VadState::Idle,
                talking_frames: 0,
                silence_frames: 0,
                segment: None,
            }),
        }
    }

    /// Feed one frame; returns an event when speech starts or ends
    pub fn observe(&self, frame: &AudioFrame) -> Option<VadEvent> {
        let energy = match frame.mean_abs_amplitude(self.config.max_analysis_bytes) {
            Ok(energy) => energy,
            Err(e) => {
                tracing::debug!(error = %e, "Undecodable frame treated as silence");
                0.0
            }
        };

        let mut state = self.mutable.lock();

        if energy > self.config.silence_threshold {
            state.talking_frames += 1;
            state.silence_frames = 0;

            // Text recognized while idle (echo, speech under the threshold)
            // belongs to no utterance
            if state.state == VadState::Idle && state.talking_frames == 1 {
                self.transcript.clear();
            }

            if let Some(segment) = state.segment.as_mut() {
                segment.voiced_frames += 1;
                segment.silence_frames = 0;
            }

            if state.talking_frames > self.config.debounce_frames && state.state != VadState::Speaking {
                state.state = VadState::Speaking;
                state.segment = Some(SpeechSegment::new(state.talking_frames));
                tracing::info!(
                    energy,
                    sequence = frame.sequence,
                    "VAD: speech started"
                );
                return Some(VadEvent::SpeechStarted);
            }
        } else {
            state.silence_frames += 1;
            state.talking_frames = 0;

            if let Some(segment) = state.segment.as_mut() {
                segment.silence_frames += 1;
            }

            if state.silence_frames > self.config.silence_frame_limit
                && state.state == VadState::Speaking
            {
                state.state = VadState::Idle;
                let segment = state.segment.take();
                drop(state);

                let text = self.transcript.take();
                let voiced_frames = segment.map(|s| s.voiced_frames).unwrap_or_default();
                let duration_ms = segment
                    .map(|s| s.started_at.elapsed().as_millis() as u64)
                    .unwrap_or_default();

                if text.trim().is_empty() {
                    tracing::info!(voiced_frames, duration_ms, "VAD: speech ended without transcript, ignored as noise");
                    return None;
                }

                tracing::info!(voiced_frames, duration_ms, text = %text, "VAD: speech ended");
                return Some(VadEvent::SpeechEnded(text));
            }
        }

        None
    }

    /// Reset to idle, dropping any segment in progress
    pub fn reset(&self) {
        let mut state = self.mutable.lock();
        state.state = VadState::Idle;
        state.talking_frames = 0;
        state.silence_frames = 0;
        state.segment = None;
    }

    pub fn state(&self) -> VadState {
        self.mutable.lock().state
    }

    /// Snapshot of the segment in progress
    pub fn segment(&self) -> Option<SpeechSegment> {
        self.mutable.lock().segment
    }

    pub fn config(&self) -> &VadConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voice_chat_core::TranscriptEvent;

    /// 50ms at 16kHz
    fn frame(amplitude: i16, sequence: u64) -> AudioFrame {
        AudioFrame::from_samples(&vec![amplitude; 800], sequence)
    }

    fn detector() -> (VoiceActivityDetector, TranscriptBuffer) {
        let transcript = TranscriptBuffer::new();
        (VoiceActivityDetector::new(VadConfig::default(), transcript.clone()), transcript)
    }

    fn feed(vad: &VoiceActivityDetector, amplitude: i16, count: usize) -> Vec<(usize, VadEvent)> {
        (0..count)
            .filter_map(|i| vad.observe(&frame(amplitude, i as u64)).map(|e| (i, e)))
            .collect()
    }

    #[test]
    fn test_vad_config_default() {
        let config = VadConfig::default();
        assert_eq!(config.silence_threshold, 500.0);
        assert_eq!(config.debounce_frames, 3);
        assert_eq!(config.silence_frame_limit, 40);
        assert_eq!(config.max_analysis_bytes, 1600);
    }

    #[test]
    fn test_quiet_input_never_starts_speech() {
        let (vad, _) = detector();
        // 2s of amplitude 10
        assert!(feed(&vad, 10, 40).is_empty());
        assert_eq!(vad.state(), VadState::Idle);
        // Exactly at the threshold is not voiced either
        assert!(feed(&vad, 500, 20).is_empty());
    }

    #[test]
    fn test_full_utterance_scenario() {
        let (vad, transcript) = detector();
        assert!(feed(&vad, 10, 40).is_empty());

        let events = feed(&vad, 800, 4);
        assert_eq!(events, vec![(3, VadEvent::SpeechStarted)]);
        assert_eq!(vad.state(), VadState::Speaking);

        transcript.apply(&TranscriptEvent::partial("今天天气怎么样"));

        // 40 silent frames reach the limit; the next one exceeds it
        assert!(feed(&vad, 10, 40).is_empty());
        assert_eq!(vad.state(), VadState::Speaking);
        let ended = vad.observe(&frame(10, 99));
        assert_eq!(ended, Some(VadEvent::SpeechEnded("今天天气怎么样".to_string())));
        assert_eq!(vad.state(), VadState::Idle);
        assert_eq!(transcript.text(), "");
    }

    #[test]
    fn test_text_heard_while_idle_is_dropped() {
        let (vad, transcript) = detector();
        transcript.apply(&TranscriptEvent::final_result("旧话"));
        assert!(feed(&vad, 10, 10).is_empty());

        assert_eq!(feed(&vad, 800, 4), vec![(3, VadEvent::SpeechStarted)]);
        transcript.apply(&TranscriptEvent::partial("新话"));

        let events = feed(&vad, 10, 41);
        assert_eq!(events, vec![(40, VadEvent::SpeechEnded("新话".to_string()))]);
    }

    #[test]
    fn test_text_during_debounce_is_kept() {
        let (vad, transcript) = detector();
        transcript.apply(&TranscriptEvent::final_result("回声"));

        assert!(feed(&vad, 800, 1).is_empty());
        transcript.apply(&TranscriptEvent::final_result("你好。"));
        assert_eq!(feed(&vad, 800, 3).len(), 1);

        let events = feed(&vad, 10, 41);
        assert_eq!(events, vec![(40, VadEvent::SpeechEnded("你好。".to_string()))]);
    }

    #[test]
    fn test_short_burst_is_debounced() {
        let (vad, _) = detector();
        let mut events = feed(&vad, 800, 3);
        events.extend(feed(&vad, 10, 1));
        events.extend(feed(&vad, 800, 3));
        assert!(events.is_empty());
    }

    #[test]
    fn test_speech_started_fires_once() {
        let (vad, _) = detector();
        let events = feed(&vad, 800, 30);
        assert_eq!(events.len(), 1);
        assert_eq!(vad.segment().map(|s| s.voiced_frames), Some(30));
    }

    #[test]
    fn test_empty_transcript_is_noise() {
        let (vad, transcript) = detector();
        feed(&vad, 800, 5);
        transcript.apply(&TranscriptEvent::partial("   "));
        let events = feed(&vad, 10, 41);
        assert!(events.is_empty());
        assert_eq!(vad.state(), VadState::Idle);

        // Detector is usable again afterwards
        assert_eq!(feed(&vad, 800, 4).len(), 1);
    }

    #[test]
    fn test_brief_pause_does_not_end_speech() {
        let (vad, transcript) = detector();
        feed(&vad, 800, 4);
        transcript.apply(&TranscriptEvent::partial("hello"));
        assert!(feed(&vad, 10, 30).is_empty());
        assert!(feed(&vad, 800, 2).is_empty());
        assert!(feed(&vad, 10, 40).is_empty());
        assert_eq!(vad.state(), VadState::Speaking);
        assert!(matches!(vad.observe(&frame(10, 0)), Some(VadEvent::SpeechEnded(_))));
    }

    #[test]
    fn test_undecodable_frame_counts_as_silence() {
        let (vad, transcript) = detector();
        feed(&vad, 800, 4);
        transcript.apply(&TranscriptEvent::partial("hi"));
        let broken = AudioFrame::new(vec![0x01u8], 7);
        for _ in 0..40 {
            assert!(vad.observe(&broken).is_none());
        }
        assert_eq!(vad.observe(&broken), Some(VadEvent::SpeechEnded("hi".into())));
    }

    #[test]
    fn test_custom_threshold() {
        let config = VadConfig {
            silence_threshold: 5.0,
            silence_frame_limit: 20,
            ..VadConfig::default()
        };
        let vad = VoiceActivityDetector::new(config, TranscriptBuffer::new());
        assert_eq!(feed(&vad, 10, 4).len(), 1);
    }

    #[test]
    fn test_reset() {
        let (vad, _) = detector();
        feed(&vad, 800, 4);
        vad.reset();
        assert_eq!(vad.state(), VadState::Idle);
        assert!(vad.segment().is_none());
    }
}
