//! Speech recognition
//!
//! `RecognitionSession` owns the connection to the recognition service. It
//! forwards audio, feeds results into the shared [`TranscriptBuffer`], keeps
//! the connection alive with silent heartbeats and reconnects with bounded
//! backoff when the connection goes quiet or keeps failing.

mod clip;
mod transcript;
mod websocket;

pub use clip::{recognize_clip, ClipConfig};
pub use transcript::TranscriptBuffer;
pub use websocket::{WsRecognitionClient, WsRecognitionConfig};

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use voice_chat_config::constants::recognition::HEARTBEAT_FRAME_BYTES;
use voice_chat_config::RecognitionSettings;
use voice_chat_core::{
    AudioFrame, Error, RecognitionClient, Result, RetryPolicy, TranscriptEvent, TranscriptStream,
};

/// Keepalive and reconnect policy
#[derive(Debug, Clone)]
pub struct RecognitionConfig {
    /// Silent heartbeat cadence; `None` disables heartbeats
    pub heartbeat_interval: Option<Duration>,
    pub watchdog_interval: Duration,
    /// Reconnect when no result arrived for this long
    pub inactivity_timeout: Duration,
    pub max_consecutive_send_errors: u32,
    pub heartbeat_frame_bytes: usize,
    pub reconnect: RetryPolicy,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self::from(&RecognitionSettings::default())
    }
}

impl From<&RecognitionSettings> for RecognitionConfig {
    fn from(settings: &RecognitionSettings) -> Self {
        Self {
            heartbeat_interval: settings.heartbeat_interval_secs.map(Duration::from_secs),
            watchdog_interval: Duration::from_secs(settings.watchdog_interval_secs),
            inactivity_timeout: Duration::from_secs(settings.inactivity_timeout_secs),
            max_consecutive_send_errors: settings.max_consecutive_send_errors,
            heartbeat_frame_bytes: HEARTBEAT_FRAME_BYTES,
            reconnect: settings.reconnect.into(),
        }
    }
}

struct SessionInner {
    client: Arc<dyn RecognitionClient>,
    config: RecognitionConfig,
    transcript: TranscriptBuffer,
    events: broadcast::Sender<TranscriptEvent>,
    running: AtomicBool,
    /// Listening switched off: no connection is held and frames are dropped
    paused: AtomicBool,
    connected: AtomicBool,
    /// Bumped on every successful connect
    generation: AtomicU64,
    consecutive_errors: AtomicU32,
    heartbeat_sequence: AtomicU64,
    last_activity: Mutex<Instant>,
    last_heartbeat: Mutex<Instant>,
    last_failed_reconnect: Mutex<Option<Instant>>,
    /// Serializes reconnects so concurrent callers join one attempt
    reconnect_lock: tokio::sync::Mutex<()>,
    reader: Mutex<Option<JoinHandle<()>>>,
    watchdog: Mutex<Option<JoinHandle<()>>>,
}

/// Live recognition connection with keepalive and reconnect
#[derive(Clone)]
pub struct RecognitionSession {
    inner: Arc<SessionInner>,
}

impl RecognitionSession {
    pub fn new(
        client: Arc<dyn RecognitionClient>,
        config: RecognitionConfig,
        transcript: TranscriptBuffer,
    ) -> Self {
        let (events, _) = broadcast::channel(256);
        let now = Instant::now();
        Self {
            inner: Arc::new(SessionInner {
                client,
                config,
                transcript,
                events,
                running: AtomicBool::new(false),
                paused: AtomicBool::new(false),
                connected: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                consecutive_errors: AtomicU32::new(0),
                heartbeat_sequence: AtomicU64::new(0),
                last_activity: Mutex::new(now),
                last_heartbeat: Mutex::new(now),
                last_failed_reconnect: Mutex::new(None),
                reconnect_lock: tokio::sync::Mutex::new(()),
                reader: Mutex::new(None),
                watchdog: Mutex::new(None),
            }),
        }
    }

    /// Connect and start the watchdog
    ///
    /// A failed initial connect is returned but the watchdog keeps trying.
    pub async fn start(&self) -> Result<()> {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let inner = self.inner.clone();
        let handle = tokio::spawn(async move { watchdog_loop(inner).await });
        *self.inner.watchdog.lock() = Some(handle);

        tracing::info!(backend = self.inner.client.name(), "Starting recognition session");
        self.inner.clone().reconnect().await
    }

    /// Stop the watchdog and close the connection
    pub async fn stop(&self) {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.inner.watchdog.lock().take() {
            handle.abort();
        }
        if let Some(handle) = self.inner.reader.lock().take() {
            handle.abort();
        }
        self.inner.connected.store(false, Ordering::SeqCst);
        if let Err(e) = self.inner.client.close().await {
            tracing::debug!(error = %e, "Error closing recognition connection");
        }
        tracing::info!("Recognition session stopped");
    }

    /// Stop listening: close the connection and drop frames until [`resume`]
    ///
    /// The watchdog stays alive but neither reconnects nor sends heartbeats
    /// while paused. Text heard so far is discarded.
    ///
    /// [`resume`]: RecognitionSession::resume
    pub async fn pause(&self) {
        let inner = &self.inner;
        if inner.paused.swap(true, Ordering::SeqCst) {
            return;
        }
        let _guard = inner.reconnect_lock.lock().await;
        if let Some(handle) = inner.reader.lock().take() {
            handle.abort();
        }
        if inner.connected.swap(false, Ordering::SeqCst) {
            if let Err(e) = inner.client.close().await {
                tracing::debug!(error = %e, "Error closing recognition connection");
            }
        }
        inner.transcript.clear();
        tracing::info!("Recognition paused");
    }

    /// Start listening again after [`pause`](RecognitionSession::pause)
    pub async fn resume(&self) -> Result<()> {
        if !self.inner.paused.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        tracing::info!("Recognition resumed");
        self.inner.clone().reconnect().await
    }

    pub fn is_paused(&self) -> bool {
        self.inner.paused.load(Ordering::SeqCst)
    }

    /// Forward one frame to the service
    ///
    /// Reconnects after too many consecutive send failures. While
    /// disconnected, a reconnect is attempted at most once per watchdog
    /// interval and frames in between are dropped. Frames sent while paused
    /// are dropped silently.
    pub async fn send_frame(&self, frame: &AudioFrame) -> Result<()> {
        let inner = &self.inner;

        if inner.paused.load(Ordering::SeqCst) {
            return Ok(());
        }

        if !inner.connected.load(Ordering::SeqCst) {
            let cooling_down = inner
                .last_failed_reconnect
                .lock()
                .map(|at| at.elapsed() < inner.config.watchdog_interval)
                .unwrap_or(false);
            if cooling_down {
                return Err(Error::transient("recognition", "not connected"));
            }
            inner.clone().reconnect().await?;
        }

        match inner.client.send_audio(frame).await {
            Ok(()) => {
                inner.consecutive_errors.store(0, Ordering::SeqCst);
                Ok(())
            }
            Err(e) => {
                let failures = inner.consecutive_errors.fetch_add(1, Ordering::SeqCst) + 1;
                tracing::warn!(
                    failures,
                    max = inner.config.max_consecutive_send_errors,
                    error = %e,
                    "Failed to send audio to recognition"
                );
                if failures >= inner.config.max_consecutive_send_errors {
                    inner.consecutive_errors.store(0, Ordering::SeqCst);
                    if let Err(reconnect_err) = inner.clone().reconnect().await {
                        tracing::error!(error = %reconnect_err, "Recognition reconnect failed");
                    }
                }
                Err(e)
            }
        }
    }

    /// Drop the current connection and connect again
    ///
    /// Idempotent: callers that arrive while a reconnect is running wait for
    /// it and reuse its result instead of reconnecting a second time.
    pub async fn reconnect(&self) -> Result<()> {
        self.inner.clone().reconnect().await
    }

    /// Recognition results as they arrive
    pub fn subscribe(&self) -> broadcast::Receiver<TranscriptEvent> {
        self.inner.events.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    /// Number of successful connects so far
    pub fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::SeqCst)
    }

    pub fn transcript(&self) -> &TranscriptBuffer {
        &self.inner.transcript
    }
}

impl SessionInner {
    async fn reconnect(self: Arc<Self>) -> Result<()> {
        let observed = self.generation.load(Ordering::SeqCst);
        let _guard = self.reconnect_lock.lock().await;

        if self.paused.load(Ordering::SeqCst) {
            tracing::debug!("Recognition paused, not reconnecting");
            return Ok(());
        }

        if self.generation.load(Ordering::SeqCst) != observed
            && self.connected.load(Ordering::SeqCst)
        {
            tracing::debug!("Recognition already reconnected by another caller");
            return Ok(());
        }

        if let Some(handle) = self.reader.lock().take() {
            handle.abort();
        }
        if self.connected.swap(false, Ordering::SeqCst) {
            if let Err(e) = self.client.close().await {
                tracing::debug!(error = %e, "Error closing stale recognition connection");
            }
        }

        let client = self.client.clone();
        let result = self
            .config
            .reconnect
            .run("recognition connect", |_| {
                let client = client.clone();
                async move { client.connect().await }
            })
            .await;

        match result {
            Ok(stream) => {
                let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
                let now = Instant::now();
                *self.last_activity.lock() = now;
                *self.last_heartbeat.lock() = now;
                *self.last_failed_reconnect.lock() = None;
                self.consecutive_errors.store(0, Ordering::SeqCst);
                self.connected.store(true, Ordering::SeqCst);

                let inner = self.clone();
                let handle = tokio::spawn(async move { read_events(inner, stream, generation).await });
                *self.reader.lock() = Some(handle);

                tracing::info!(generation, backend = self.client.name(), "Recognition connected");
                Ok(())
            }
            Err(e) => {
                *self.last_failed_reconnect.lock() = Some(Instant::now());
                tracing::error!(error = %e, "Could not connect to recognition service");
                Err(e)
            }
        }
    }

    async fn send_heartbeat(&self) {
        let sequence = self.heartbeat_sequence.fetch_add(1, Ordering::Relaxed);
        let frame = AudioFrame::silence(self.config.heartbeat_frame_bytes, sequence);
        match self.client.send_audio(&frame).await {
            Ok(()) => tracing::debug!(sequence, "Recognition heartbeat sent"),
            Err(e) => tracing::warn!(error = %e, "Recognition heartbeat failed"),
        }
        *self.last_heartbeat.lock() = Instant::now();
    }
}

async fn read_events(inner: Arc<SessionInner>, mut stream: TranscriptStream, generation: u64) {
    while let Some(item) = stream.next().await {
        match item {
            Ok(event) => {
                tracing::debug!(text = %event.text, is_final = event.is_final, "Recognized");
                inner.transcript.apply(&event);
                *inner.last_activity.lock() = Instant::now();
                let _ = inner.events.send(event);
            }
            Err(e) => {
                tracing::warn!(error = %e, "Recognition stream error");
            }
        }
    }

    if inner.generation.load(Ordering::SeqCst) == generation {
        inner.connected.store(false, Ordering::SeqCst);
        tracing::info!(generation, "Recognition stream ended");
    }
}

async fn watchdog_loop(inner: Arc<SessionInner>) {
    let mut ticker = tokio::time::interval(inner.config.watchdog_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await;

    while inner.running.load(Ordering::SeqCst) {
        ticker.tick().await;

        if inner.paused.load(Ordering::SeqCst) {
            continue;
        }

        if !inner.connected.load(Ordering::SeqCst) {
            tracing::info!("Recognition disconnected, watchdog reconnecting");
            let _ = inner.clone().reconnect().await;
            continue;
        }

        if let Some(interval) = inner.config.heartbeat_interval {
            let due = inner.last_heartbeat.lock().elapsed() >= interval;
            if due {
                inner.send_heartbeat().await;
            }
        }

        let idle = inner.last_activity.lock().elapsed();
        if idle > inner.config.inactivity_timeout {
            tracing::warn!(
                idle_secs = idle.as_secs(),
                "Recognition inactive, reconnecting"
            );
            let _ = inner.clone().reconnect().await;
        }
    }
}
