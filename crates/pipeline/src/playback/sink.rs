//! External player sink
//!
//! Plays each item by spawning a player process (ffplay by default) with the
//! audio file path appended to the command line. Must be used inside a tokio
//! runtime; no method blocks on the player.

use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::process::Stdio;

use parking_lot::Mutex;
use tempfile::NamedTempFile;
use tokio::process::{Child, Command};
use voice_chat_core::{AudioRef, AudioSink, Error, Result};

/// Sink that shells out to a command-line player
pub struct CommandSink {
    program: String,
    args: Vec<String>,
    child: Mutex<Option<Child>>,
    /// Keeps in-memory audio on disk while the player reads it
    scratch: Mutex<Option<NamedTempFile>>,
}

impl CommandSink {
    pub fn new(command: &[String]) -> Result<Self> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| Error::Config("player command is empty".into()))?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            child: Mutex::new(None),
            scratch: Mutex::new(None),
        })
    }

    fn resolve(&self, audio: &AudioRef) -> Result<PathBuf> {
        match audio {
            AudioRef::File(path) => {
                validate_file(path)?;
                Ok(path.clone())
            }
            AudioRef::Bytes(bytes) => {
                if bytes.is_empty() {
                    return Err(Error::PlaybackResourceMissing("empty audio buffer".into()));
                }
                if bytes.starts_with(b"RIFF") {
                    hound::WavReader::new(Cursor::new(bytes.as_ref()))
                        .map_err(|e| Error::PlaybackResourceMissing(format!("corrupt wav buffer: {}", e)))?;
                }
                let mut file = tempfile::Builder::new()
                    .prefix("voice-chat-")
                    .suffix(".audio")
                    .tempfile()?;
                file.write_all(bytes)?;
                file.flush()?;
                let path = file.path().to_path_buf();
                *self.scratch.lock() = Some(file);
                Ok(path)
            }
        }
    }
}

fn validate_file(path: &Path) -> Result<()> {
    if !path.is_file() {
        return Err(Error::PlaybackResourceMissing(format!(
            "{} does not exist",
            path.display()
        )));
    }
    let is_wav = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("wav"));
    if is_wav {
        hound::WavReader::open(path).map_err(|e| {
            Error::PlaybackResourceMissing(format!("{} is not a valid wav file: {}", path.display(), e))
        })?;
    }
    Ok(())
}

impl AudioSink for CommandSink {
    fn start(&self, audio: &AudioRef) -> Result<()> {
        self.stop();
        let path = self.resolve(audio)?;

        let child = Command::new(&self.program)
            .args(&self.args)
            .arg(&path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::collaborator("playback", format!("failed to spawn {}: {}", self.program, e)))?;

        tracing::debug!(player = %self.program, pid = ?child.id(), path = %path.display(), "Player started");
        *self.child.lock() = Some(child);
        Ok(())
    }

    fn is_complete(&self) -> bool {
        let mut guard = self.child.lock();
        let finished = match guard.as_mut() {
            None => true,
            Some(child) => match child.try_wait() {
                Ok(Some(status)) => {
                    if !status.success() {
                        tracing::warn!(%status, "Player exited with failure");
                    }
                    true
                }
                Ok(None) => false,
                Err(e) => {
                    tracing::warn!(error = %e, "Could not poll player process");
                    true
                }
            },
        };
        if finished {
            guard.take();
        }
        finished
    }

    fn stop(&self) {
        // Killed without waiting; tokio reaps the exited process
        if let Some(mut child) = self.child.lock().take() {
            if let Err(e) = child.start_kill() {
                tracing::debug!(error = %e, "Player already exited");
            }
        }
        self.scratch.lock().take();
    }
}

impl Drop for CommandSink {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    fn write_wav(path: &Path) {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 16000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for _ in 0..160 {
            writer.write_sample(0i16).unwrap();
        }
        writer.finalize().unwrap();
    }

    fn sink(command: &[&str]) -> CommandSink {
        let command: Vec<String> = command.iter().map(|s| s.to_string()).collect();
        CommandSink::new(&command).unwrap()
    }

    #[test]
    fn test_empty_command_rejected() {
        assert!(CommandSink::new(&[]).is_err());
    }

    #[tokio::test]
    async fn test_missing_file_reported() {
        let err = sink(&["true"])
            .start(&AudioRef::File("/nonexistent/reply.mp3".into()))
            .unwrap_err();
        assert!(matches!(err, Error::PlaybackResourceMissing(_)));
    }

    #[tokio::test]
    async fn test_corrupt_wav_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.wav");
        std::fs::write(&path, b"definitely not riff").unwrap();

        let err = sink(&["true"]).start(&AudioRef::File(path)).unwrap_err();
        assert!(matches!(err, Error::PlaybackResourceMissing(_)));
    }

    #[tokio::test]
    async fn test_empty_buffer_reported() {
        let err = sink(&["true"]).start(&AudioRef::Bytes(Arc::from(Vec::new()))).unwrap_err();
        assert!(matches!(err, Error::PlaybackResourceMissing(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_player_runs_to_completion() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reply.wav");
        write_wav(&path);

        let sink = sink(&["true"]);
        sink.start(&AudioRef::File(path)).unwrap();
        for _ in 0..100 {
            if sink.is_complete() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("player never completed");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stop_does_not_wait_for_player() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reply.mp3");
        std::fs::write(&path, b"ID3").unwrap();

        // Player that ignores the path and runs until killed
        let sink = sink(&["sh", "-c", "sleep 30", "player"]);
        sink.start(&AudioRef::File(path)).unwrap();
        assert!(!sink.is_complete());

        let started = Instant::now();
        sink.stop();
        assert!(started.elapsed() < Duration::from_millis(100));
        assert!(sink.is_complete());
    }
}
