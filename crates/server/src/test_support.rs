//! In-process collaborators for router tests

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use voice_chat_agent::{Collaborators, VoiceDialogue};
use voice_chat_config::Settings;
use voice_chat_core::{
    AgentClient, AgentReply, AgentRequest, AudioFrame, AudioRef, AudioSink, NoopListener,
    RecognitionClient, Result, SynthesisClient, TranscriptEvent, TranscriptStream,
};
use voice_chat_persistence::InMemoryConversationLog;

use crate::AppState;

/// Connects and stays silent
pub struct SilentRecognizer;

#[async_trait]
impl RecognitionClient for SilentRecognizer {
    async fn connect(&self) -> Result<TranscriptStream> {
        Ok(Box::pin(futures::stream::pending::<Result<TranscriptEvent>>()))
    }

    async fn send_audio(&self, _frame: &AudioFrame) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &str {
        "silent"
    }
}

/// Answers every clip with a fixed final result
pub struct ClipRecognizer {
    pub text: &'static str,
    feed: Mutex<Option<mpsc::UnboundedSender<Result<TranscriptEvent>>>>,
}

impl ClipRecognizer {
    pub fn new(text: &'static str) -> Self {
        Self {
            text,
            feed: Mutex::new(None),
        }
    }
}

#[async_trait]
impl RecognitionClient for ClipRecognizer {
    async fn connect(&self) -> Result<TranscriptStream> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.feed.lock() = Some(tx);
        Ok(Box::pin(futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        })))
    }

    async fn send_audio(&self, _frame: &AudioFrame) -> Result<()> {
        // One result per connection
        if let Some(tx) = self.feed.lock().take() {
            let _ = tx.send(Ok(TranscriptEvent::final_result(self.text)));
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.feed.lock().take();
        Ok(())
    }

    fn name(&self) -> &str {
        "clip"
    }
}

#[derive(Default)]
pub struct RecordingAgent {
    prompts: Mutex<Vec<String>>,
}

impl RecordingAgent {
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }
}

#[async_trait]
impl AgentClient for RecordingAgent {
    async fn chat(&self, request: AgentRequest) -> Result<AgentReply> {
        self.prompts.lock().push(request.utterance_text.clone());
        tokio::time::sleep(Duration::from_millis(20)).await;
        Ok(AgentReply {
            reply_text: format!("{}。", request.utterance_text),
            session_id: None,
        })
    }

    fn reset_session(&self) {}

    fn session_id(&self) -> Option<String> {
        None
    }

    fn name(&self) -> &str {
        "recording"
    }
}

pub struct NamedSynth;

#[async_trait]
impl SynthesisClient for NamedSynth {
    async fn synthesize(&self, text: &str, voice_id: &str) -> Result<AudioRef> {
        Ok(AudioRef::File(format!("{}-{}", voice_id, text.chars().count()).into()))
    }

    fn name(&self) -> &str {
        "named"
    }
}

/// Plays forever until stopped
pub struct EndlessSink;

impl AudioSink for EndlessSink {
    fn start(&self, _audio: &AudioRef) -> Result<()> {
        Ok(())
    }

    fn is_complete(&self) -> bool {
        false
    }

    fn stop(&self) {}
}

pub struct TestRig {
    pub state: AppState,
    pub agent: Arc<RecordingAgent>,
}

pub async fn test_state() -> TestRig {
    let mut settings = Settings::default();
    settings.playback.poll_interval_ms = 10;
    settings.recognition.clip_settle_ms = 20;

    let agent = Arc::new(RecordingAgent::default());
    let collaborators = Collaborators {
        recognition: Arc::new(SilentRecognizer),
        clip_recognition: Arc::new(ClipRecognizer::new("你好")),
        agent: agent.clone(),
        synthesis: Arc::new(NamedSynth),
        sink: Arc::new(EndlessSink),
        log: Arc::new(InMemoryConversationLog::new()),
        listener: Arc::new(NoopListener),
    };

    let dialogue = VoiceDialogue::init(&settings, collaborators).await.unwrap();
    TestRig {
        state: AppState::new(settings, dialogue),
        agent,
    }
}
