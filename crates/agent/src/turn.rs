//! Turn-taking controller
//!
//! The controller owns [`ConversationState`] and runs on one task. VAD
//! events, text submissions, agent replies and playback completions all
//! arrive as [`TurnCommand`]s through its inbox and are applied one at a
//! time. Nothing in the handler awaits: agent calls, synthesis and log
//! writes run on spawned tasks and report back through the same inbox, so a
//! barge-in that arrives mid agent call is applied as soon as it is read.
//!
//! ```text
//!            SpeechStarted                 reply handed to playback
//!   Idle ──────────────────▶ UserSpeaking ─────────────────────────▶ AiSpeaking
//!    ▲                           │  ▲                                    │  │
//!    │  SpeechEnded(noise)       │  └──────── SpeechStarted (barge-in) ──┘  │
//!    └───────────────────────────┘                                          │
//!    ▲                                                PlaybackCompleted     │
//!    └──────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use voice_chat_config::AgentSettings;
use voice_chat_core::{
    AgentClient, AgentReply, AgentRequest, AudioRef, ConversationLog, ConversationRecord,
    ConversationState, Error, Result, Role, RoleRegistry, SynthesisClient, TurnListener, Utterance,
};
use voice_chat_pipeline::{split_segments, PlaybackCallback, PlaybackController, PlaybackItem};

use crate::AgentError;

/// Turn policy
#[derive(Debug, Clone)]
pub struct TurnConfig {
    /// Budget for one agent round-trip before the fallback reply is used
    pub turn_timeout: Duration,
    /// Spoken when the agent fails or times out
    pub fallback_reply: String,
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self::from(&AgentSettings::default())
    }
}

impl From<&AgentSettings> for TurnConfig {
    fn from(settings: &AgentSettings) -> Self {
        Self {
            turn_timeout: settings.turn_timeout(),
            fallback_reply: settings.fallback_reply.clone(),
        }
    }
}

/// Collaborators the controller drives
#[derive(Clone)]
pub struct TurnDeps {
    pub roles: Arc<RoleRegistry>,
    pub agent: Arc<dyn AgentClient>,
    pub synthesis: Arc<dyn SynthesisClient>,
    pub playback: Arc<PlaybackController>,
    pub log: Arc<dyn ConversationLog>,
    pub listener: Arc<dyn TurnListener>,
}

/// Observable dialogue events
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DialogueEvent {
    StateChanged {
        from: ConversationState,
        to: ConversationState,
    },
    UtteranceFinalized {
        text: String,
    },
    /// Agent answered; `played` is false when the reply was superseded or interrupted
    Replied {
        user_input: String,
        reply: String,
        fallback: bool,
        played: bool,
    },
    Interrupted {
        epoch: u64,
        barge_in: bool,
    },
    PlaybackCompleted {
        epoch: u64,
    },
    RoleChanged {
        role_id: String,
    },
    SpeechOutputChanged {
        enabled: bool,
    },
}

/// Reply to a text chat that is returned instead of spoken
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatReply {
    pub reply: String,
    pub fallback: bool,
    pub session_id: Option<String>,
}

type ChatResponder = oneshot::Sender<std::result::Result<ChatReply, AgentError>>;
type SpeakResponder = oneshot::Sender<std::result::Result<Vec<AudioRef>, AgentError>>;

/// Resolves a speak request; dropped unresolved means the turn was cut short
struct SpeakReport(Option<SpeakResponder>);

impl SpeakReport {
    fn finish(mut self, produced: Vec<AudioRef>) {
        if let Some(responder) = self.0.take() {
            let _ = responder.send(Ok(produced));
        }
    }
}

impl Drop for SpeakReport {
    fn drop(&mut self) {
        if let Some(responder) = self.0.take() {
            let _ = responder.send(Err(AgentError::Cancelled));
        }
    }
}

/// Where a reply goes once the agent answers
enum Delivery {
    Speak,
    Return(ChatResponder),
}

pub(crate) enum TurnCommand {
    SpeechStarted,
    SpeechEnded(String),
    SubmitText {
        text: String,
        role_id: Option<String>,
        reply: oneshot::Sender<Result<ConversationState>>,
    },
    Chat {
        text: String,
        role_id: Option<String>,
        reply: ChatResponder,
    },
    Speak {
        text: String,
        role_id: Option<String>,
        reply: SpeakResponder,
    },
    SetRole {
        role_id: String,
        reply: oneshot::Sender<Result<Role>>,
    },
    SetSpeechOutput {
        enabled: bool,
        reply: oneshot::Sender<ConversationState>,
    },
    Interrupt {
        reply: oneshot::Sender<ConversationState>,
    },
    AgentReplied {
        ticket: u64,
        result: Result<AgentReply>,
    },
    PlaybackCompleted {
        epoch: u64,
    },
    Shutdown,
}

/// Cloneable front door to a running controller
#[derive(Clone)]
pub struct TurnHandle {
    commands: mpsc::UnboundedSender<TurnCommand>,
    state: watch::Receiver<ConversationState>,
    role: watch::Receiver<Role>,
    speech_output: watch::Receiver<bool>,
    events: broadcast::Sender<DialogueEvent>,
}

/// Receiving side handed to [`TurnController::spawn`]
pub struct TurnInbox {
    commands: mpsc::UnboundedReceiver<TurnCommand>,
    state: watch::Sender<ConversationState>,
    role: watch::Sender<Role>,
    speech_output: watch::Sender<bool>,
}

/// Create the channel pair before the controller exists
///
/// Lets the playback controller be built with a completion callback that
/// feeds the turn controller it is later handed to.
pub fn turn_channel(initial_role: Role) -> (TurnHandle, TurnInbox) {
    let (commands_tx, commands_rx) = mpsc::unbounded_channel();
    let (state_tx, state_rx) = watch::channel(ConversationState::Idle);
    let (role_tx, role_rx) = watch::channel(initial_role);
    let (speech_tx, speech_rx) = watch::channel(true);
    let (events, _) = broadcast::channel(256);

    (
        TurnHandle {
            commands: commands_tx,
            state: state_rx,
            role: role_rx,
            speech_output: speech_rx,
            events,
        },
        TurnInbox {
            commands: commands_rx,
            state: state_tx,
            role: role_tx,
            speech_output: speech_tx,
        },
    )
}

impl TurnHandle {
    fn send(&self, command: TurnCommand) -> std::result::Result<(), AgentError> {
        self.commands
            .send(command)
            .map_err(|_| AgentError::ControllerStopped)
    }

    /// VAD detected the start of speech
    pub fn speech_started(&self) -> std::result::Result<(), AgentError> {
        self.send(TurnCommand::SpeechStarted)
    }

    /// VAD detected the end of speech; empty text means the segment was noise
    pub fn speech_ended(&self, text: impl Into<String>) -> std::result::Result<(), AgentError> {
        self.send(TurnCommand::SpeechEnded(text.into()))
    }

    /// Submit a typed utterance, optionally switching role first
    ///
    /// Returns the state right after the utterance was accepted.
    pub async fn submit_text(
        &self,
        text: impl Into<String>,
        role_id: Option<String>,
    ) -> std::result::Result<ConversationState, AgentError> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(AgentError::EmptyUtterance);
        }
        let (reply, rx) = oneshot::channel();
        self.send(TurnCommand::SubmitText { text, role_id, reply })?;
        Ok(rx.await.map_err(|_| AgentError::ControllerStopped)??)
    }

    /// Submit a typed utterance and wait for the agent's reply, which is not spoken
    ///
    /// Queued like any other utterance. Fails with [`AgentError::Cancelled`]
    /// when an interrupt drops it before it reaches the agent.
    pub async fn chat(
        &self,
        text: impl Into<String>,
        role_id: Option<String>,
    ) -> std::result::Result<ChatReply, AgentError> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(AgentError::EmptyUtterance);
        }
        let (reply, rx) = oneshot::channel();
        self.send(TurnCommand::Chat { text, role_id, reply })?;
        rx.await.map_err(|_| AgentError::ControllerStopped)?
    }

    /// Speak `text` directly, bypassing the agent
    ///
    /// Replaces whatever the assistant was saying or about to say. Resolves
    /// once every segment is synthesized, with the audio produced. With
    /// speech output off the text is synthesized but not played.
    pub async fn speak(
        &self,
        text: impl Into<String>,
        role_id: Option<String>,
    ) -> std::result::Result<Vec<AudioRef>, AgentError> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(AgentError::EmptyUtterance);
        }
        let (reply, rx) = oneshot::channel();
        self.send(TurnCommand::Speak { text, role_id, reply })?;
        rx.await.map_err(|_| AgentError::ControllerStopped)?
    }

    /// Switch spoken replies on or off; turning them off stops current playback
    pub async fn set_speech_output(&self, enabled: bool) -> std::result::Result<ConversationState, AgentError> {
        let (reply, rx) = oneshot::channel();
        self.send(TurnCommand::SetSpeechOutput { enabled, reply })?;
        rx.await.map_err(|_| AgentError::ControllerStopped)
    }

    pub fn speech_output(&self) -> bool {
        *self.speech_output.borrow()
    }

    /// Switch the active role; fails with `RoleNotFound` without side effects
    pub async fn set_role(&self, role_id: impl Into<String>) -> std::result::Result<Role, AgentError> {
        let (reply, rx) = oneshot::channel();
        self.send(TurnCommand::SetRole {
            role_id: role_id.into(),
            reply,
        })?;
        Ok(rx.await.map_err(|_| AgentError::ControllerStopped)??)
    }

    /// Stop everything and return to idle; returns the resulting state
    pub async fn interrupt(&self) -> std::result::Result<ConversationState, AgentError> {
        let (reply, rx) = oneshot::channel();
        self.send(TurnCommand::Interrupt { reply })?;
        rx.await.map_err(|_| AgentError::ControllerStopped)
    }

    /// Report that playback for `epoch` finished
    pub fn playback_completed(&self, epoch: u64) -> std::result::Result<(), AgentError> {
        self.send(TurnCommand::PlaybackCompleted { epoch })
    }

    /// Completion callback for a [`PlaybackController`]
    pub fn playback_callback(&self) -> PlaybackCallback {
        let commands = self.commands.clone();
        Arc::new(move |epoch| {
            if commands.send(TurnCommand::PlaybackCompleted { epoch }).is_err() {
                tracing::debug!(epoch, "Playback completed after controller stopped");
            }
        })
    }

    /// Ask the controller to stop after the commands already queued
    pub fn shutdown(&self) {
        let _ = self.commands.send(TurnCommand::Shutdown);
    }

    pub fn state(&self) -> ConversationState {
        *self.state.borrow()
    }

    pub fn role(&self) -> Role {
        self.role.borrow().clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DialogueEvent> {
        self.events.subscribe()
    }

    /// Wait until the controller reaches `target`
    pub async fn wait_for_state(
        &self,
        target: ConversationState,
        timeout: Duration,
    ) -> std::result::Result<(), AgentError> {
        let mut state = self.state.clone();
        let outcome = match tokio::time::timeout(timeout, state.wait_for(|current| *current == target)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(_)) => Err(AgentError::ControllerStopped),
            Err(_) => Err(Error::Timeout(timeout.as_millis() as u64).into()),
        };
        outcome
    }

    pub fn is_running(&self) -> bool {
        !self.commands.is_closed()
    }
}

struct PendingUtterance {
    utterance: Utterance,
    role: Role,
    delivery: Delivery,
}

struct InFlight {
    ticket: u64,
    utterance: Utterance,
    role: Role,
    delivery: Delivery,
    /// Interrupted while waiting; the reply is logged but not spoken
    cancelled: bool,
}

enum Flow {
    Continue,
    Stop,
}

/// The state machine; lives on its own task
pub struct TurnController {
    config: TurnConfig,
    deps: TurnDeps,
    handle: TurnHandle,
    inbox: TurnInbox,
    state: ConversationState,
    role: Role,
    speech_output: bool,
    /// Between a VAD speech start and its end
    user_talking: bool,
    pending: VecDeque<PendingUtterance>,
    in_flight: Option<InFlight>,
    next_ticket: u64,
    /// Epoch of the reply currently being spoken
    speaking_epoch: Option<u64>,
    speak_task: Option<JoinHandle<()>>,
    agent_task: Option<JoinHandle<()>>,
}

impl TurnController {
    /// Start the controller task
    pub fn spawn(config: TurnConfig, deps: TurnDeps, handle: TurnHandle, inbox: TurnInbox) -> JoinHandle<()> {
        let role = inbox.role.borrow().clone();
        let controller = Self {
            config,
            deps,
            handle,
            inbox,
            state: ConversationState::Idle,
            role,
            speech_output: true,
            user_talking: false,
            pending: VecDeque::new(),
            in_flight: None,
            next_ticket: 0,
            speaking_epoch: None,
            speak_task: None,
            agent_task: None,
        };
        tokio::spawn(controller.run())
    }

    async fn run(mut self) {
        tracing::info!(role = %self.role.id, "Turn controller started");

        while let Some(command) = self.inbox.commands.recv().await {
            match self.apply(command) {
                Ok(Flow::Continue) => {}
                Ok(Flow::Stop) => break,
                Err(e) if e.is_fatal() => {
                    tracing::error!(error = %e, state = %self.state, "Turn controller invariant violated, ending session");
                    break;
                }
                Err(e) => tracing::warn!(error = %e, "Turn command failed"),
            }
        }

        self.teardown();
        tracing::info!("Turn controller stopped");
    }

    fn apply(&mut self, command: TurnCommand) -> Result<Flow> {
        match command {
            TurnCommand::SpeechStarted => self.on_speech_started(),
            TurnCommand::SpeechEnded(text) => self.on_speech_ended(&text),
            TurnCommand::SubmitText { text, role_id, reply } => {
                let result = self.on_submit_text(&text, role_id.as_deref());
                let _ = reply.send(result);
            }
            TurnCommand::Chat { text, role_id, reply } => self.on_chat(&text, role_id.as_deref(), reply),
            TurnCommand::Speak { text, role_id, reply } => self.on_speak(text, role_id.as_deref(), reply),
            TurnCommand::SetRole { role_id, reply } => {
                let _ = reply.send(self.set_role(&role_id));
            }
            TurnCommand::SetSpeechOutput { enabled, reply } => {
                self.set_speech_output(enabled);
                let _ = reply.send(self.state);
            }
            TurnCommand::Interrupt { reply } => {
                self.interrupt();
                let _ = reply.send(self.state);
            }
            TurnCommand::AgentReplied { ticket, result } => self.on_agent_replied(ticket, result)?,
            TurnCommand::PlaybackCompleted { epoch } => self.on_playback_completed(epoch),
            TurnCommand::Shutdown => return Ok(Flow::Stop),
        }
        Ok(Flow::Continue)
    }

    fn on_speech_started(&mut self) {
        self.user_talking = true;
        match self.state {
            ConversationState::Idle => self.transition(ConversationState::UserSpeaking, "speech started"),
            ConversationState::AiSpeaking => {
                self.stop_playback(true);
                self.transition(ConversationState::UserSpeaking, "barge-in");
            }
            ConversationState::UserSpeaking => {}
        }
    }

    fn on_speech_ended(&mut self, text: &str) {
        self.user_talking = false;
        match Utterance::new(text) {
            Some(utterance) => {
                let role = self.role.clone();
                self.accept_utterance(utterance, role, Delivery::Speak);
            }
            None => self.settle_idle("speech ended without utterance"),
        }
    }

    /// Back to idle when the user is done and no turn is in progress
    fn settle_idle(&mut self, reason: &'static str) {
        if self.state == ConversationState::UserSpeaking
            && !self.user_talking
            && self.in_flight.is_none()
            && self.pending.is_empty()
        {
            self.transition(ConversationState::Idle, reason);
        }
    }

    fn on_submit_text(&mut self, text: &str, role_id: Option<&str>) -> Result<ConversationState> {
        let utterance = Utterance::new(text).ok_or_else(|| Error::Decode("empty utterance".to_string()))?;
        if let Some(role_id) = role_id {
            self.set_role(role_id)?;
        }
        let role = self.role.clone();
        self.accept_utterance(utterance, role, Delivery::Speak);
        Ok(self.state)
    }

    fn on_chat(&mut self, text: &str, role_id: Option<&str>, reply: ChatResponder) {
        let Some(utterance) = Utterance::new(text) else {
            let _ = reply.send(Err(AgentError::EmptyUtterance));
            return;
        };
        if let Some(role_id) = role_id {
            if let Err(e) = self.set_role(role_id) {
                let _ = reply.send(Err(e.into()));
                return;
            }
        }
        let role = self.role.clone();
        self.accept_utterance(utterance, role, Delivery::Return(reply));
    }

    fn on_speak(&mut self, text: String, role_id: Option<&str>, reply: SpeakResponder) {
        if let Some(role_id) = role_id {
            if let Err(e) = self.set_role(role_id) {
                let _ = reply.send(Err(e.into()));
                return;
            }
        }
        let role = self.role.clone();

        if !self.speech_output {
            tracing::info!(role = %role.id, "Speech output off, synthesizing only");
            let synthesis = self.deps.synthesis.clone();
            tokio::spawn(async move {
                let mut produced = Vec::new();
                for segment in split_segments(&text) {
                    match synthesis.synthesize(&segment, &role.voice_id).await {
                        Ok(audio) => produced.push(audio),
                        Err(e) => tracing::warn!(error = %e, segment = %segment, "Synthesis failed, skipping segment"),
                    }
                }
                let _ = reply.send(Ok(produced));
            });
            return;
        }

        if self.state == ConversationState::AiSpeaking {
            self.stop_playback(false);
        }
        self.cancel_outstanding();
        tracing::info!(role = %role.id, "Speaking text directly");
        self.speak(text, &role, Some(reply));
    }

    /// Single entry point for finalized utterances
    fn accept_utterance(&mut self, utterance: Utterance, role: Role, delivery: Delivery) {
        if self.state == ConversationState::AiSpeaking {
            self.stop_playback(true);
        }
        self.transition(ConversationState::UserSpeaking, "utterance finalized");

        tracing::info!(text = %utterance.text(), role = %role.id, "Utterance finalized");
        self.deps.listener.on_utterance_finalized(&utterance);
        self.emit(DialogueEvent::UtteranceFinalized {
            text: utterance.text().to_string(),
        });

        if self.in_flight.is_some() {
            tracing::debug!(queued = self.pending.len() + 1, "Agent busy, queuing utterance");
            self.pending.push_back(PendingUtterance {
                utterance,
                role,
                delivery,
            });
        } else {
            self.dispatch(utterance, role, delivery);
        }
    }

    fn dispatch(&mut self, utterance: Utterance, role: Role, delivery: Delivery) {
        self.next_ticket += 1;
        let ticket = self.next_ticket;

        let agent = self.deps.agent.clone();
        let commands = self.handle.commands.clone();
        let timeout = self.config.turn_timeout;
        let request = AgentRequest::new(utterance.text(), &role);

        tracing::debug!(ticket, role = %role.id, "Dispatching utterance to agent");
        self.agent_task = Some(tokio::spawn(async move {
            let result = match tokio::time::timeout(timeout, agent.chat(request)).await {
                Ok(result) => result,
                Err(_) => Err(Error::Timeout(timeout.as_millis() as u64)),
            };
            let _ = commands.send(TurnCommand::AgentReplied { ticket, result });
        }));

        self.in_flight = Some(InFlight {
            ticket,
            utterance,
            role,
            delivery,
            cancelled: false,
        });
    }

    fn on_agent_replied(&mut self, ticket: u64, result: Result<AgentReply>) -> Result<()> {
        let in_flight = match self.in_flight.take() {
            Some(in_flight) if in_flight.ticket == ticket => in_flight,
            other => {
                let expected = other.as_ref().map(|f| f.ticket);
                self.in_flight = other;
                return Err(Error::ConcurrencyViolation(format!(
                    "agent reply for ticket {} while {:?} is in flight",
                    ticket, expected
                )));
            }
        };
        self.agent_task = None;

        let (reply_text, session_id, fallback) = match result {
            Ok(reply) => (reply.reply_text, reply.session_id, false),
            Err(e) => {
                tracing::warn!(error = %e, ticket, "Agent call failed, using fallback reply");
                (self.config.fallback_reply.clone(), None, true)
            }
        };

        let InFlight {
            utterance,
            role,
            delivery,
            cancelled,
            ..
        } = in_flight;
        self.record_turn(&role, &utterance, &reply_text, session_id.clone());

        let superseded = !self.pending.is_empty();
        let spoken = matches!(delivery, Delivery::Speak) && self.speech_output;
        let played = spoken && !cancelled && !superseded;
        self.emit(DialogueEvent::Replied {
            user_input: utterance.text().to_string(),
            reply: reply_text.clone(),
            fallback,
            played,
        });

        if let Delivery::Return(responder) = delivery {
            let _ = responder.send(Ok(ChatReply {
                reply: reply_text.clone(),
                fallback,
                session_id,
            }));
        }

        if let Some(next) = self.pending.pop_front() {
            tracing::info!(ticket, "Reply superseded by a newer utterance");
            self.dispatch(next.utterance, next.role, next.delivery);
            return Ok(());
        }

        if cancelled {
            tracing::info!(ticket, "Reply arrived after interrupt, not played");
            self.settle_idle("reply dropped after interrupt");
            return Ok(());
        }

        if !spoken {
            tracing::debug!(ticket, "Reply returned without speech");
            self.settle_idle("reply returned without speech");
            return Ok(());
        }

        self.speak(reply_text, &role, None);
        Ok(())
    }

    /// Hand a reply to synthesis and playback
    ///
    /// `report` receives the synthesized audio once every segment is queued,
    /// or [`AgentError::Cancelled`] if the turn is superseded first.
    fn speak(&mut self, text: String, role: &Role, report: Option<SpeakResponder>) {
        let report = SpeakReport(report);
        let epoch = self.deps.playback.start_turn();
        self.speaking_epoch = Some(epoch);
        self.transition(ConversationState::AiSpeaking, "reply handed to playback");

        let synthesis = self.deps.synthesis.clone();
        let playback = self.deps.playback.clone();
        let voice = role.voice_id.clone();

        self.speak_task = Some(tokio::spawn(async move {
            let mut produced = Vec::new();
            for segment in split_segments(&text) {
                match synthesis.synthesize(&segment, &voice).await {
                    Ok(audio) => {
                        produced.push(audio.clone());
                        if !playback.enqueue(PlaybackItem::new(epoch, audio)) {
                            tracing::debug!(epoch, "Turn superseded during synthesis");
                            return;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, segment = %segment, "Synthesis failed, skipping segment");
                    }
                }
            }
            playback.seal(epoch);
            report.finish(produced);
        }));
    }

    fn on_playback_completed(&mut self, epoch: u64) {
        if self.speaking_epoch != Some(epoch) {
            tracing::debug!(epoch, current = ?self.speaking_epoch, "Ignoring stale playback completion");
            return;
        }
        self.speaking_epoch = None;
        self.speak_task = None;

        self.deps.listener.on_playback_completed(epoch);
        self.emit(DialogueEvent::PlaybackCompleted { epoch });

        if self.state == ConversationState::AiSpeaking {
            self.transition(ConversationState::Idle, "playback completed");
        }
    }

    fn set_role(&mut self, role_id: &str) -> Result<Role> {
        let role = self.deps.roles.get(role_id)?.clone();
        if role.id != self.role.id {
            tracing::info!(from = %self.role.id, to = %role.id, "Role changed");
            self.deps.agent.reset_session();
            self.role = role.clone();
            self.inbox.role.send_replace(role.clone());
            self.emit(DialogueEvent::RoleChanged {
                role_id: role.id.clone(),
            });
        }
        Ok(role)
    }

    /// Explicit stop: clear playback and queued utterances, return to idle
    fn interrupt(&mut self) {
        let busy = self.state != ConversationState::Idle
            || self.in_flight.is_some()
            || !self.pending.is_empty();
        if !busy {
            tracing::debug!("Interrupt while idle ignored");
            return;
        }

        self.stop_playback(false);
        let dropped = self.cancel_outstanding();
        tracing::info!(dropped, "Interrupted");
        self.transition(ConversationState::Idle, "interrupt");
    }

    /// Drop queued utterances and mark the in-flight call as not to be spoken
    ///
    /// Callers waiting on a dropped chat get [`AgentError::Cancelled`].
    fn cancel_outstanding(&mut self) -> usize {
        let dropped = self.pending.len();
        for pending in self.pending.drain(..) {
            if let Delivery::Return(responder) = pending.delivery {
                let _ = responder.send(Err(AgentError::Cancelled));
            }
        }
        if let Some(in_flight) = self.in_flight.as_mut() {
            in_flight.cancelled = true;
        }
        dropped
    }

    fn set_speech_output(&mut self, enabled: bool) {
        if self.speech_output == enabled {
            return;
        }
        self.speech_output = enabled;
        self.inbox.speech_output.send_replace(enabled);
        tracing::info!(enabled, "Speech output switched");
        self.emit(DialogueEvent::SpeechOutputChanged { enabled });

        if !enabled && self.state == ConversationState::AiSpeaking {
            self.stop_playback(false);
            self.transition(ConversationState::Idle, "speech output disabled");
        }
    }

    fn stop_playback(&mut self, barge_in: bool) {
        if let Some(task) = self.speak_task.take() {
            task.abort();
        }
        self.speaking_epoch = None;
        let epoch = self.deps.playback.interrupt_and_clear();
        self.emit(DialogueEvent::Interrupted { epoch, barge_in });
    }

    fn record_turn(&self, role: &Role, utterance: &Utterance, reply: &str, session_id: Option<String>) {
        let record = ConversationRecord::new(role.id.clone(), utterance.text(), reply, session_id);
        let log = self.deps.log.clone();
        tokio::spawn(async move {
            if let Err(e) = log.record(&record).await {
                tracing::warn!(error = %e, "Failed to write conversation log");
            }
        });
    }

    fn transition(&mut self, to: ConversationState, reason: &'static str) {
        let from = self.state;
        if from == to {
            return;
        }
        self.state = to;
        tracing::info!(%from, %to, reason, at = %Utc::now().to_rfc3339(), "Conversation state changed");
        self.inbox.state.send_replace(to);
        self.deps.listener.on_state_changed(from, to);
        self.emit(DialogueEvent::StateChanged { from, to });
    }

    fn emit(&self, event: DialogueEvent) {
        let _ = self.handle.events.send(event);
    }

    fn teardown(&mut self) {
        if let Some(task) = self.agent_task.take() {
            task.abort();
        }
        if let Some(task) = self.speak_task.take() {
            task.abort();
        }
        if self.speaking_epoch.take().is_some() || !self.deps.playback.is_idle() {
            self.deps.playback.interrupt_and_clear();
        }
        self.pending.clear();
        self.in_flight = None;
        self.transition(ConversationState::Idle, "shutdown");
    }
}
