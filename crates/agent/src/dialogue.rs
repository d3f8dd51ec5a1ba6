//! Process-scoped voice dialogue
//!
//! `VoiceDialogue` owns every long-lived worker of a conversation:
//!
//! - ingest: pulls frames from the audio source, runs the VAD and reports
//!   speech start/end to the turn controller; drops frames while listening
//!   is switched off
//! - recognition forwarder: streams the same frames to the recognition
//!   session, whose reader task fills the shared transcript
//! - playback loop
//! - the turn controller itself
//!
//! Workers talk to each other only through channels and the documented
//! operations; `shutdown` tears them down in dependency order.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use voice_chat_config::constants::audio::FRAME_BYTES;
use voice_chat_config::Settings;
use voice_chat_core::{
    AgentClient, AudioFrame, AudioRef, AudioSink, ConversationLog, ConversationState, NoopListener,
    RecognitionClient, Role, RoleRegistry, SynthesisClient, TurnListener,
};
use voice_chat_llm::{AgentConfig, HttpAgentClient};
use voice_chat_pipeline::{
    channel_source, recognize_clip, AudioFrameSender, AudioSource, ClipConfig, CommandSink,
    HttpSynthesisClient, PlaybackConfig, PlaybackController, RecognitionConfig, RecognitionSession,
    SynthesisConfig, TranscriptBuffer, VadConfig, VadEvent, VadState, VoiceActivityDetector,
    WsRecognitionClient, WsRecognitionConfig,
};

use crate::turn::{
    turn_channel, ChatReply, DialogueEvent, TurnConfig, TurnController, TurnDeps, TurnHandle,
};
use crate::AgentError;

/// Frames buffered between the audio source and the VAD
const INGEST_QUEUE_FRAMES: usize = 256;
/// Frames buffered for the recognition connection
const RECOGNITION_QUEUE_FRAMES: usize = 256;

/// External services a dialogue runs against
pub struct Collaborators {
    pub recognition: Arc<dyn RecognitionClient>,
    /// Separate connection for one-shot clip recognition
    pub clip_recognition: Arc<dyn RecognitionClient>,
    pub agent: Arc<dyn AgentClient>,
    pub synthesis: Arc<dyn SynthesisClient>,
    pub sink: Arc<dyn AudioSink>,
    pub log: Arc<dyn ConversationLog>,
    pub listener: Arc<dyn TurnListener>,
}

impl Collaborators {
    /// Production collaborators built from settings
    pub async fn from_settings(settings: &Settings) -> Result<Self, AgentError> {
        let recognition = WsRecognitionClient::new(WsRecognitionConfig::from(&settings.recognition));
        let clip_recognition = WsRecognitionClient::new(WsRecognitionConfig::from(&settings.recognition));
        let agent = HttpAgentClient::new(AgentConfig::from_settings(&settings.agent)?)?;
        let synthesis = HttpSynthesisClient::new(SynthesisConfig::from(&settings.synthesis))?;
        let sink = CommandSink::new(&settings.playback.player_command)?;
        let log = voice_chat_persistence::init(&settings.conversation_log).await?;

        Ok(Self {
            recognition: Arc::new(recognition),
            clip_recognition: Arc::new(clip_recognition),
            agent: Arc::new(agent),
            synthesis: Arc::new(synthesis),
            sink: Arc::new(sink),
            log,
            listener: Arc::new(NoopListener),
        })
    }

    pub fn with_listener(mut self, listener: Arc<dyn TurnListener>) -> Self {
        self.listener = listener;
        self
    }
}

/// A running conversation and its workers
pub struct VoiceDialogue {
    handle: TurnHandle,
    roles: Arc<RoleRegistry>,
    playback: Arc<PlaybackController>,
    recognition: RecognitionSession,
    clip_recognition: Arc<dyn RecognitionClient>,
    clip_config: ClipConfig,
    /// One clip at a time on the clip connection
    clip_lock: tokio::sync::Mutex<()>,
    listening: watch::Sender<bool>,
    frames: AudioFrameSender,
    controller: Mutex<Option<JoinHandle<()>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    stopped: AtomicBool,
}

impl VoiceDialogue {
    /// Build and start all workers
    ///
    /// A recognition service that is down at startup is not fatal: the
    /// session keeps reconnecting in the background.
    pub async fn init(settings: &Settings, collaborators: Collaborators) -> Result<Self, AgentError> {
        let roles = Arc::new(settings.role_registry()?);
        let initial_role = roles.get(&settings.default_role)?.clone();
        let (handle, inbox) = turn_channel(initial_role.clone());

        let playback = Arc::new(PlaybackController::new(
            collaborators.sink,
            PlaybackConfig::from(&settings.playback),
            handle.playback_callback(),
        ));
        playback.start();

        let transcript = TranscriptBuffer::new();
        let recognition = RecognitionSession::new(
            collaborators.recognition,
            RecognitionConfig::from(&settings.recognition),
            transcript.clone(),
        );
        if let Err(e) = recognition.start().await {
            tracing::warn!(error = %e, "Recognition unavailable at startup, retrying in background");
        }

        let deps = TurnDeps {
            roles: roles.clone(),
            agent: collaborators.agent,
            synthesis: collaborators.synthesis,
            playback: playback.clone(),
            log: collaborators.log,
            listener: collaborators.listener,
        };
        let controller = TurnController::spawn(TurnConfig::from(&settings.agent), deps, handle.clone(), inbox);

        let vad = VoiceActivityDetector::new(VadConfig::from(&settings.vad), transcript);
        let (frames, source) = channel_source(INGEST_QUEUE_FRAMES);
        let (recognition_tx, recognition_rx) = mpsc::channel(RECOGNITION_QUEUE_FRAMES);
        let (listening, listening_rx) = watch::channel(true);

        let workers = vec![
            tokio::spawn(run_ingest(source, vad, recognition_tx, listening_rx, handle.clone())),
            tokio::spawn(forward_to_recognition(recognition_rx, recognition.clone())),
        ];

        tracing::info!(
            role = %initial_role.id,
            roles = roles.len(),
            "Voice dialogue started"
        );

        Ok(Self {
            handle,
            roles,
            playback,
            recognition,
            clip_recognition: collaborators.clip_recognition,
            clip_config: ClipConfig::from(&settings.recognition),
            clip_lock: tokio::sync::Mutex::new(()),
            listening,
            frames,
            controller: Mutex::new(Some(controller)),
            workers: Mutex::new(workers),
            stopped: AtomicBool::new(false),
        })
    }

    /// Push one PCM16LE frame from the audio source
    pub fn submit_audio_frame(&self, data: impl Into<Arc<[u8]>>) -> Result<(), AgentError> {
        Ok(self.frames.push(data)?)
    }

    /// Push a PCM16LE buffer, split into standard frames; returns the frame count
    pub fn submit_audio(&self, pcm: &[u8]) -> Result<usize, AgentError> {
        Ok(self.frames.push_chunked(pcm, FRAME_BYTES)?)
    }

    /// Typed input; skips VAD and recognition
    pub async fn submit_text(
        &self,
        text: impl Into<String>,
        role_id: Option<String>,
    ) -> Result<ConversationState, AgentError> {
        self.handle.submit_text(text, role_id).await
    }

    /// Typed input whose reply is returned instead of spoken
    pub async fn chat(&self, text: impl Into<String>, role_id: Option<String>) -> Result<ChatReply, AgentError> {
        self.handle.chat(text, role_id).await
    }

    /// Speak text without consulting the agent; returns the synthesized audio
    pub async fn speak(&self, text: impl Into<String>, role_id: Option<String>) -> Result<Vec<AudioRef>, AgentError> {
        self.handle.speak(text, role_id).await
    }

    /// Recognize a recorded PCM16LE clip without touching the live conversation
    pub async fn recognize(&self, pcm: &[u8]) -> Result<String, AgentError> {
        let _guard = self.clip_lock.lock().await;
        Ok(recognize_clip(self.clip_recognition.as_ref(), pcm, &self.clip_config).await?)
    }

    /// Resume listening: reconnect recognition and run the VAD again
    pub async fn start_listening(&self) -> Result<(), AgentError> {
        if self.listening.send_replace(true) {
            return Ok(());
        }
        tracing::info!("Listening started");
        Ok(self.recognition.resume().await?)
    }

    /// Stop listening: incoming audio is dropped and recognition disconnects
    ///
    /// Speech in progress is abandoned as noise. Replies already on their
    /// way are unaffected.
    pub async fn stop_listening(&self) {
        if !self.listening.send_replace(false) {
            return;
        }
        tracing::info!("Listening stopped");
        self.recognition.pause().await;
    }

    pub fn listening(&self) -> bool {
        *self.listening.borrow()
    }

    /// Switch spoken replies on or off
    pub async fn set_speech_output(&self, enabled: bool) -> Result<ConversationState, AgentError> {
        self.handle.set_speech_output(enabled).await
    }

    pub fn speech_output(&self) -> bool {
        self.handle.speech_output()
    }

    pub async fn set_role(&self, role_id: impl Into<String>) -> Result<Role, AgentError> {
        self.handle.set_role(role_id).await
    }

    pub async fn interrupt(&self) -> Result<ConversationState, AgentError> {
        self.handle.interrupt().await
    }

    pub fn state(&self) -> ConversationState {
        self.handle.state()
    }

    pub fn role(&self) -> Role {
        self.handle.role()
    }

    pub fn roles(&self) -> &RoleRegistry {
        &self.roles
    }

    pub fn playback_idle(&self) -> bool {
        self.playback.is_idle()
    }

    /// Current playback epoch
    pub fn epoch(&self) -> u64 {
        self.playback.epoch()
    }

    pub fn recognition_connected(&self) -> bool {
        self.recognition.is_connected()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DialogueEvent> {
        self.handle.subscribe()
    }

    pub fn handle(&self) -> &TurnHandle {
        &self.handle
    }

    pub fn is_running(&self) -> bool {
        !self.stopped.load(Ordering::SeqCst) && self.handle.is_running()
    }

    /// Stop every worker; safe to call more than once
    pub async fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!("Shutting down voice dialogue");

        for worker in self.workers.lock().drain(..) {
            worker.abort();
        }

        self.handle.shutdown();
        let controller = self.controller.lock().take();
        if let Some(controller) = controller {
            if let Err(e) = controller.await {
                tracing::warn!(error = %e, "Turn controller ended abnormally");
            }
        }

        self.recognition.stop().await;
        self.playback.shutdown().await;
        tracing::info!("Voice dialogue stopped");
    }
}

/// Feed frames through the VAD and report speech boundaries
async fn run_ingest<S: AudioSource>(
    mut source: S,
    vad: VoiceActivityDetector,
    recognition: mpsc::Sender<AudioFrame>,
    mut listening: watch::Receiver<bool>,
    turns: TurnHandle,
) {
    loop {
        let frame = tokio::select! {
            changed = listening.changed() => {
                if changed.is_err() {
                    break;
                }
                if !*listening.borrow_and_update() {
                    let was_speaking = vad.state() == VadState::Speaking;
                    vad.reset();
                    // Abandoned speech ends as noise
                    if was_speaking && turns.speech_ended(String::new()).is_err() {
                        break;
                    }
                }
                continue;
            }
            frame = source.next_frame() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };

        if !*listening.borrow() {
            continue;
        }

        if recognition.try_send(frame.clone()).is_err() {
            tracing::debug!(sequence = frame.sequence, "Recognition backlog, frame not forwarded");
        }

        let was_speaking = vad.state() == VadState::Speaking;
        let reported = match vad.observe(&frame) {
            Some(VadEvent::SpeechStarted) => turns.speech_started(),
            Some(VadEvent::SpeechEnded(text)) => turns.speech_ended(text),
            // Segment ended as noise
            None if was_speaking && vad.state() == VadState::Idle => turns.speech_ended(String::new()),
            None => Ok(()),
        };

        if reported.is_err() {
            tracing::info!("Turn controller gone, ingest stopping");
            break;
        }
    }
    tracing::debug!("Ingest stopped");
}

async fn forward_to_recognition(mut frames: mpsc::Receiver<AudioFrame>, session: RecognitionSession) {
    while let Some(frame) = frames.recv().await {
        if let Err(e) = session.send_frame(&frame).await {
            tracing::trace!(error = %e, sequence = frame.sequence, "Frame not delivered to recognition");
        }
    }
}
