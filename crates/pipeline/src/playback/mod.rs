//! Epoch-guarded playback
//!
//! A single loop drains the queue one item at a time and waits for the sink
//! to report completion before pulling the next. Every item carries the
//! epoch it was produced under; `start_turn` and `interrupt_and_clear` bump
//! the epoch, so items produced before an interrupt never start playing,
//! even if they arrive after it.

mod sink;

pub use sink::CommandSink;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use voice_chat_config::constants::playback::MAX_POLL_INTERVAL_MS;
use voice_chat_config::PlaybackSettings;
use voice_chat_core::{AudioRef, AudioSink, Error};

/// Invoked with the epoch whose sealed batch finished playing
///
/// Called from the playback task with no internal locks held, so it may call
/// back into the controller.
pub type PlaybackCallback = Arc<dyn Fn(u64) + Send + Sync>;

/// Playback loop settings
#[derive(Debug, Clone)]
pub struct PlaybackConfig {
    /// Sink completion polling; also the upper bound on interrupt latency
    pub poll_interval: Duration,
    /// An item still playing after this long is stopped and skipped
    pub max_item_duration: Duration,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self::from(&PlaybackSettings::default())
    }
}

impl From<&PlaybackSettings> for PlaybackConfig {
    fn from(settings: &PlaybackSettings) -> Self {
        Self {
            poll_interval: Duration::from_millis(settings.poll_interval_ms.min(MAX_POLL_INTERVAL_MS)),
            max_item_duration: Duration::from_millis(settings.max_item_ms),
        }
    }
}

/// One synthesized segment waiting to be played
#[derive(Debug, Clone)]
pub struct PlaybackItem {
    pub epoch: u64,
    pub audio: AudioRef,
}

impl PlaybackItem {
    pub fn new(epoch: u64, audio: AudioRef) -> Self {
        Self { epoch, audio }
    }
}

#[derive(Default)]
struct QueueState {
    items: VecDeque<PlaybackItem>,
    /// Epoch whose batch is complete and not yet reported
    sealed: Option<u64>,
    /// Epoch of the item the sink is playing
    active: Option<u64>,
}

struct Shared {
    sink: Arc<dyn AudioSink>,
    config: PlaybackConfig,
    epoch: AtomicU64,
    queue: Mutex<QueueState>,
    notify: Notify,
    running: AtomicBool,
    on_complete: PlaybackCallback,
}

/// Sequential player with interrupt
pub struct PlaybackController {
    shared: Arc<Shared>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl PlaybackController {
    pub fn new(sink: Arc<dyn AudioSink>, config: PlaybackConfig, on_complete: PlaybackCallback) -> Self {
        Self {
            shared: Arc::new(Shared {
                sink,
                config,
                epoch: AtomicU64::new(0),
                queue: Mutex::new(QueueState::default()),
                notify: Notify::new(),
                running: AtomicBool::new(false),
                on_complete,
            }),
            task: Mutex::new(None),
        }
    }

    /// Spawn the playback loop
    pub fn start(&self) {
        if self.shared.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let shared = self.shared.clone();
        *self.task.lock() = Some(tokio::spawn(async move { playback_loop(shared).await }));
        tracing::debug!("Playback loop started");
    }

    /// Stop the loop and whatever is playing
    pub async fn shutdown(&self) {
        self.shared.running.store(false, Ordering::SeqCst);
        self.interrupt_and_clear();
        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            self.shared.notify.notify_one();
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    tracing::warn!(error = %e, "Playback loop ended abnormally");
                }
            }
        }
    }

    /// Open a new batch and return its epoch
    ///
    /// Anything still queued from an earlier epoch is dropped.
    pub fn start_turn(&self) -> u64 {
        let mut queue = self.shared.queue.lock();
        let epoch = self.shared.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        queue.items.clear();
        queue.sealed = None;
        epoch
    }

    /// Queue an item; returns `false` when it belongs to a stale epoch
    pub fn enqueue(&self, item: PlaybackItem) -> bool {
        let mut queue = self.shared.queue.lock();
        let current = self.shared.epoch.load(Ordering::SeqCst);
        if item.epoch != current {
            tracing::debug!(item_epoch = item.epoch, current, "Discarding stale playback item");
            return false;
        }
        queue.items.push_back(item);
        drop(queue);
        self.shared.notify.notify_one();
        true
    }

    /// Mark the batch for `epoch` complete; the callback fires once it drains
    pub fn seal(&self, epoch: u64) -> bool {
        let mut queue = self.shared.queue.lock();
        if epoch != self.shared.epoch.load(Ordering::SeqCst) {
            return false;
        }
        queue.sealed = Some(epoch);
        drop(queue);
        self.shared.notify.notify_one();
        true
    }

    /// Stop the current item, empty the queue and invalidate in-flight items
    ///
    /// Never waits on the playback loop, so it is safe to call from the
    /// completion callback.
    pub fn interrupt_and_clear(&self) -> u64 {
        let (epoch, dropped) = {
            let mut queue = self.shared.queue.lock();
            let epoch = self.shared.epoch.fetch_add(1, Ordering::SeqCst) + 1;
            let dropped = queue.items.len();
            queue.items.clear();
            queue.sealed = None;
            (epoch, dropped)
        };
        self.shared.sink.stop();
        self.shared.notify.notify_one();
        tracing::info!(epoch, dropped, "Playback interrupted");
        epoch
    }

    /// Nothing queued and nothing from the current epoch playing
    pub fn is_idle(&self) -> bool {
        let queue = self.shared.queue.lock();
        let current = self.shared.epoch.load(Ordering::SeqCst);
        queue.items.is_empty() && queue.active.map_or(true, |epoch| epoch != current)
    }

    pub fn epoch(&self) -> u64 {
        self.shared.epoch.load(Ordering::SeqCst)
    }

    pub fn queue_len(&self) -> usize {
        self.shared.queue.lock().items.len()
    }
}

enum Next {
    Play(PlaybackItem),
    Completed(u64),
    Wait,
}

fn next_action(shared: &Shared) -> Next {
    let mut queue = shared.queue.lock();
    let current = shared.epoch.load(Ordering::SeqCst);

    while let Some(item) = queue.items.pop_front() {
        if item.epoch == current {
            queue.active = Some(item.epoch);
            return Next::Play(item);
        }
    }

    match queue.sealed.take() {
        Some(epoch) if epoch == current => Next::Completed(epoch),
        _ => Next::Wait,
    }
}

async fn playback_loop(shared: Arc<Shared>) {
    while shared.running.load(Ordering::SeqCst) {
        match next_action(&shared) {
            Next::Play(item) => {
                play_item(&shared, &item).await;
                shared.queue.lock().active = None;
            }
            Next::Completed(epoch) => {
                tracing::debug!(epoch, "Playback batch completed");
                (shared.on_complete)(epoch);
            }
            Next::Wait => {
                tokio::select! {
                    _ = shared.notify.notified() => {}
                    _ = tokio::time::sleep(shared.config.poll_interval) => {}
                }
            }
        }
    }
    tracing::debug!("Playback loop stopped");
}

async fn play_item(shared: &Shared, item: &PlaybackItem) {
    // Started under the queue lock so an interrupt either precedes the start
    // (and the item is dropped) or follows it (and stops the sink)
    let started = {
        let _queue = shared.queue.lock();
        if shared.epoch.load(Ordering::SeqCst) != item.epoch || !shared.running.load(Ordering::SeqCst) {
            tracing::debug!(item_epoch = item.epoch, "Item invalidated before start");
            return;
        }
        shared.sink.start(&item.audio)
    };

    match started {
        Ok(()) => {}
        Err(Error::PlaybackResourceMissing(reason)) => {
            tracing::warn!(audio = %item.audio, reason = %reason, "Skipping unplayable audio");
            return;
        }
        Err(e) => {
            tracing::warn!(audio = %item.audio, error = %e, "Playback failed, skipping item");
            return;
        }
    }

    tracing::debug!(epoch = item.epoch, audio = %item.audio, "Playing");
    let deadline = Instant::now() + shared.config.max_item_duration;
    loop {
        tokio::time::sleep(shared.config.poll_interval).await;
        if shared.epoch.load(Ordering::SeqCst) != item.epoch || !shared.running.load(Ordering::SeqCst) {
            shared.sink.stop();
            break;
        }
        if shared.sink.is_complete() {
            break;
        }
        if Instant::now() >= deadline {
            tracing::warn!(
                audio = %item.audio,
                limit_ms = shared.config.max_item_duration.as_millis() as u64,
                "Player did not finish in time, stopping"
            );
            shared.sink.stop();
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    /// Sink whose items finish after a fixed number of polls
    struct ScriptedSink {
        polls_per_item: usize,
        polls: AtomicUsize,
        started: Mutex<Vec<String>>,
        stops: AtomicUsize,
        playing: AtomicBool,
    }

    impl ScriptedSink {
        fn new(polls_per_item: usize) -> Arc<Self> {
            Arc::new(Self {
                polls_per_item,
                polls: AtomicUsize::new(0),
                started: Mutex::new(Vec::new()),
                stops: AtomicUsize::new(0),
                playing: AtomicBool::new(false),
            })
        }

        fn started(&self) -> Vec<String> {
            self.started.lock().clone()
        }
    }

    impl AudioSink for ScriptedSink {
        fn start(&self, audio: &AudioRef) -> voice_chat_core::Result<()> {
            let name = audio.describe();
            if name.contains("missing") {
                return Err(Error::PlaybackResourceMissing(name));
            }
            self.started.lock().push(name);
            self.polls.store(0, Ordering::SeqCst);
            self.playing.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn is_complete(&self) -> bool {
            if !self.playing.load(Ordering::SeqCst) {
                return true;
            }
            let polls = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
            if polls >= self.polls_per_item {
                self.playing.store(false, Ordering::SeqCst);
                return true;
            }
            false
        }

        fn stop(&self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
            self.playing.store(false, Ordering::SeqCst);
        }
    }

    fn file(name: &str) -> AudioRef {
        AudioRef::File(name.into())
    }

    fn controller(sink: Arc<ScriptedSink>) -> (PlaybackController, Arc<Mutex<Vec<u64>>>) {
        controller_with(
            sink,
            PlaybackConfig {
                poll_interval: Duration::from_millis(10),
                ..PlaybackConfig::default()
            },
        )
    }

    fn controller_with(
        sink: Arc<ScriptedSink>,
        config: PlaybackConfig,
    ) -> (PlaybackController, Arc<Mutex<Vec<u64>>>) {
        let completed = Arc::new(Mutex::new(Vec::new()));
        let record = completed.clone();
        let callback: PlaybackCallback = Arc::new(move |epoch| record.lock().push(epoch));
        let controller = PlaybackController::new(sink, config, callback);
        controller.start();
        (controller, completed)
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_plays_in_order_then_reports() {
        let sink = ScriptedSink::new(2);
        let (playback, completed) = controller(sink.clone());

        let epoch = playback.start_turn();
        assert!(playback.enqueue(PlaybackItem::new(epoch, file("a.mp3"))));
        assert!(playback.enqueue(PlaybackItem::new(epoch, file("b.mp3"))));
        playback.seal(epoch);

        wait_until(|| !completed.lock().is_empty()).await;
        assert_eq!(sink.started(), vec!["a.mp3", "b.mp3"]);
        assert_eq!(*completed.lock(), vec![epoch]);
        assert!(playback.is_idle());

        playback.shutdown().await;
    }

    #[tokio::test]
    async fn test_interrupt_clears_queue_and_bumps_epoch() {
        let sink = ScriptedSink::new(1000);
        let (playback, completed) = controller(sink.clone());

        let epoch = playback.start_turn();
        playback.enqueue(PlaybackItem::new(epoch, file("first.mp3")));
        playback.enqueue(PlaybackItem::new(epoch, file("second.mp3")));
        playback.enqueue(PlaybackItem::new(epoch, file("third.mp3")));
        playback.seal(epoch);
        wait_until(|| !sink.started().is_empty()).await;
        assert_eq!(playback.queue_len(), 2);

        let new_epoch = playback.interrupt_and_clear();
        assert_eq!(new_epoch, epoch + 1);
        assert_eq!(playback.queue_len(), 0);
        assert!(playback.is_idle());
        assert!(sink.stops.load(Ordering::SeqCst) >= 1);

        // In-flight item from the interrupted turn arrives late
        assert!(!playback.enqueue(PlaybackItem::new(epoch, file("late.mp3"))));
        assert!(!playback.seal(epoch));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(sink.started(), vec!["first.mp3"]);
        assert!(completed.lock().is_empty());

        playback.shutdown().await;
    }

    #[tokio::test]
    async fn test_missing_resource_is_skipped() {
        let sink = ScriptedSink::new(1);
        let (playback, completed) = controller(sink.clone());

        let epoch = playback.start_turn();
        playback.enqueue(PlaybackItem::new(epoch, file("missing.mp3")));
        playback.enqueue(PlaybackItem::new(epoch, file("ok.mp3")));
        playback.seal(epoch);

        wait_until(|| !completed.lock().is_empty()).await;
        assert_eq!(sink.started(), vec!["ok.mp3"]);

        playback.shutdown().await;
    }

    #[tokio::test]
    async fn test_empty_sealed_batch_completes() {
        let sink = ScriptedSink::new(1);
        let (playback, completed) = controller(sink);

        let epoch = playback.start_turn();
        playback.seal(epoch);
        wait_until(|| !completed.lock().is_empty()).await;
        assert_eq!(*completed.lock(), vec![epoch]);

        playback.shutdown().await;
    }

    #[tokio::test]
    async fn test_interrupt_from_callback_does_not_deadlock() {
        let sink = ScriptedSink::new(1);
        let slot: Arc<Mutex<Option<Arc<PlaybackController>>>> = Arc::new(Mutex::new(None));
        let fired = Arc::new(AtomicUsize::new(0));

        let callback: PlaybackCallback = {
            let slot = slot.clone();
            let fired = fired.clone();
            Arc::new(move |_| {
                fired.fetch_add(1, Ordering::SeqCst);
                let playback = slot.lock().clone();
                if let Some(playback) = playback {
                    playback.interrupt_and_clear();
                }
            })
        };
        let playback = Arc::new(PlaybackController::new(
            sink,
            PlaybackConfig {
                poll_interval: Duration::from_millis(10),
                ..PlaybackConfig::default()
            },
            callback,
        ));
        *slot.lock() = Some(playback.clone());
        playback.start();

        let epoch = playback.start_turn();
        playback.enqueue(PlaybackItem::new(epoch, file("a.mp3")));
        playback.seal(epoch);

        wait_until(|| fired.load(Ordering::SeqCst) == 1).await;
        assert_eq!(playback.epoch(), epoch + 1);
        assert!(playback.is_idle());

        slot.lock().take();
        playback.shutdown().await;
    }

    #[tokio::test]
    async fn test_new_turn_drops_previous_batch() {
        let sink = ScriptedSink::new(1000);
        let (playback, _) = controller(sink.clone());

        let first = playback.start_turn();
        playback.enqueue(PlaybackItem::new(first, file("old-1.mp3")));
        playback.enqueue(PlaybackItem::new(first, file("old-2.mp3")));
        wait_until(|| !sink.started().is_empty()).await;

        let second = playback.start_turn();
        assert_eq!(playback.queue_len(), 0);
        playback.enqueue(PlaybackItem::new(second, file("new.mp3")));

        wait_until(|| sink.started().len() == 2).await;
        assert_eq!(sink.started(), vec!["old-1.mp3", "new.mp3"]);

        playback.shutdown().await;
    }

    #[tokio::test]
    async fn test_stuck_player_is_stopped_after_limit() {
        let sink = ScriptedSink::new(usize::MAX);
        let (playback, completed) = controller_with(
            sink.clone(),
            PlaybackConfig {
                poll_interval: Duration::from_millis(10),
                max_item_duration: Duration::from_millis(50),
            },
        );

        let epoch = playback.start_turn();
        playback.enqueue(PlaybackItem::new(epoch, file("hung-1.mp3")));
        playback.enqueue(PlaybackItem::new(epoch, file("hung-2.mp3")));
        playback.seal(epoch);

        wait_until(|| !completed.lock().is_empty()).await;
        assert_eq!(sink.started(), vec!["hung-1.mp3", "hung-2.mp3"]);
        assert!(sink.stops.load(Ordering::SeqCst) >= 2);
        assert_eq!(*completed.lock(), vec![epoch]);
        assert!(playback.is_idle());

        playback.shutdown().await;
    }

    #[tokio::test]
    async fn test_item_taken_before_interrupt_never_starts() {
        let sink = ScriptedSink::new(1);
        let callback: PlaybackCallback = Arc::new(|_| {});
        // Loop not spawned; the test plays the part of the loop
        let playback = PlaybackController::new(sink.clone(), PlaybackConfig::default(), callback);
        playback.shared.running.store(true, Ordering::SeqCst);

        let epoch = playback.start_turn();
        playback.enqueue(PlaybackItem::new(epoch, file("a.mp3")));
        let item = match next_action(&playback.shared) {
            Next::Play(item) => item,
            _ => panic!("expected an item to play"),
        };

        playback.interrupt_and_clear();
        play_item(&playback.shared, &item).await;

        assert!(sink.started().is_empty());
        assert!(playback.is_idle());
    }
}
