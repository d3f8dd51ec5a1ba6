//! Audio frame types and utilities

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use crate::{Error, Result};

/// Raw PCM frame as delivered by an audio source
///
/// Bytes are 16-bit signed little-endian mono samples. Frames are shared
/// between the VAD and the recognition session, so the buffer is reference
/// counted and cheap to clone.
#[derive(Clone)]
pub struct AudioFrame {
    /// Raw PCM16LE bytes
    pub data: Arc<[u8]>,
    /// Frame sequence number for ordering
    pub sequence: u64,
    /// When the frame entered the process
    pub received_at: Instant,
}

impl std::fmt::Debug for AudioFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioFrame")
            .field("len", &self.data.len())
            .field("sequence", &self.sequence)
            .finish()
    }
}

impl AudioFrame {
    /// Create a new frame from PCM16LE bytes
    pub fn new(data: impl Into<Arc<[u8]>>, sequence: u64) -> Self {
        Self {
            data: data.into(),
            sequence,
            received_at: Instant::now(),
        }
    }

    /// A frame of digital silence, used as a keepalive heartbeat
    pub fn silence(len: usize, sequence: u64) -> Self {
        Self::new(vec![0u8; len], sequence)
    }

    /// Frame built from samples, mostly useful for tests and synthetic input
    pub fn from_samples(samples: &[i16], sequence: u64) -> Self {
        let data: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        Self::new(data, sequence)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Mean absolute amplitude over at most `max_bytes` of the frame
    ///
    /// A trailing odd byte is ignored. Fails with [`Error::Decode`] when the
    /// analysed window holds no complete sample.
    pub fn mean_abs_amplitude(&self, max_bytes: usize) -> Result<f32> {
        let window = &self.data[..self.data.len().min(max_bytes)];
        let usable = window.len() - window.len() % 2;
        if usable == 0 {
            return Err(Error::Decode(format!(
                "frame {} has no complete 16-bit sample ({} bytes)",
                self.sequence,
                self.data.len()
            )));
        }

        let sum: u64 = window[..usable]
            .chunks_exact(2)
            .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]).unsigned_abs() as u64)
            .sum();

        Ok(sum as f32 / (usable / 2) as f32)
    }
}

/// Reference to a playable audio artifact produced by synthesis
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioRef {
    /// Audio file on local disk
    File(PathBuf),
    /// Encoded audio held in memory
    Bytes(Arc<[u8]>),
}

impl AudioRef {
    /// Short human readable description for logs
    pub fn describe(&self) -> String {
        match self {
            AudioRef::File(path) => path.display().to_string(),
            AudioRef::Bytes(bytes) => format!("<{} bytes>", bytes.len()),
        }
    }
}

impl std::fmt::Display for AudioRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.describe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_abs_amplitude() {
        let frame = AudioFrame::from_samples(&[100, -100, 300, -300], 0);
        let energy = frame.mean_abs_amplitude(1600).unwrap();
        assert!((energy - 200.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_odd_length_truncated_to_even_boundary() {
        let mut bytes: Vec<u8> = [800i16, -800].iter().flat_map(|s| s.to_le_bytes()).collect();
        bytes.push(0x7f);
        let frame = AudioFrame::new(bytes, 1);
        assert_eq!(frame.mean_abs_amplitude(1600).unwrap(), 800.0);
    }

    #[test]
    fn test_analysis_window_is_capped() {
        // Loud tail beyond the window must not count
        let mut samples = vec![10i16; 800];
        samples.extend(std::iter::repeat(30000).take(800));
        let frame = AudioFrame::from_samples(&samples, 2);
        assert_eq!(frame.mean_abs_amplitude(1600).unwrap(), 10.0);
    }

    #[test]
    fn test_extreme_sample_does_not_overflow() {
        let frame = AudioFrame::from_samples(&[i16::MIN, i16::MIN], 3);
        assert_eq!(frame.mean_abs_amplitude(1600).unwrap(), 32768.0);
    }

    #[test]
    fn test_undecodable_frames() {
        assert!(matches!(
            AudioFrame::new(Vec::new(), 0).mean_abs_amplitude(1600),
            Err(Error::Decode(_))
        ));
        assert!(AudioFrame::new(vec![1u8], 0).mean_abs_amplitude(1600).is_err());
    }

    #[test]
    fn test_silence_frame() {
        let frame = AudioFrame::silence(1600, 9);
        assert_eq!(frame.len(), 1600);
        assert_eq!(frame.mean_abs_amplitude(1600).unwrap(), 0.0);
    }
}
