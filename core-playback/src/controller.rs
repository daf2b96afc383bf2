//! # Transport Controller
//!
//! Drives two [`AudioPlayer`] instances as one continuous whole-book player.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │ TransportController                         │
//! │  ops lock ── serializes commands & advances │
//! │  inner    ── TransportState, book, slots    │
//! │  watch    ── PlaybackStatus                 │
//! └──────┬───────────────────────┬──────────────┘
//!        │ active slot           │ standby slot (preload)
//!        ▼                       ▼
//!   AudioPlayer #1          AudioPlayer #2
//! ```
//!
//! A single poll task reads the active player (100 ms while playing, 2 s
//! while paused), publishes status, raises stuck reports, starts preloads
//! and performs track advances. Every load takes a new load id and cancels
//! the previous one; cancelled work bails out at its next await point.
//!
//! The inner state lock is never held across an await. Commands that talk
//! to players take the async `ops` lock instead.
//!
//! ## Usage
//!
//! ```ignore
//! let transport = TransportController::new(primary, preload, events, TransportConfig::default())?;
//! transport.start();
//!
//! transport.load(tracks, 1190.0, metadata, true).await?;
//! let mut status = transport.subscribe_status();
//! status.changed().await?;
//! ```

use crate::config::TransportConfig;
use crate::error::{PlaybackError, Result};
use crate::state::{PlaybackStatus, PositionRead, TransportState};
use crate::stuck::{StuckDetector, StuckTransition};
use crate::timeline::Timeline;
use bridge_traits::playback::{AudioPlayer, PositionSampler, TrackSource};
use core_library::models::{BookMetadata, Track};
use core_runtime::events::{CoreEvent, EventBus, PlaybackEvent};
use core_runtime::logging::redact_url;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Local position within this distance of the seek target counts as arrived.
const SEEK_CONFIRM_TOLERANCE_SECS: f64 = 1.0;
const SEEK_CONFIRM_POLL: Duration = Duration::from_millis(50);

// ============================================================================
// Internal state
// ============================================================================

struct PlayerSlot {
    player: Arc<dyn AudioPlayer>,
    sampler: Option<Arc<dyn PositionSampler>>,
}

impl PlayerSlot {
    fn new(player: Arc<dyn AudioPlayer>) -> Self {
        // Capability is probed once, never per poll.
        let sampler = Arc::clone(&player).position_sampler();
        Self { player, sampler }
    }
}

struct LoadedBook {
    item_id: String,
    timeline: Timeline,
    metadata: BookMetadata,
    track_index: usize,
}

#[derive(Debug, Clone, Copy)]
struct Preload {
    track_index: usize,
    ready: bool,
}

struct Inner {
    state: TransportState,
    book: Option<LoadedBook>,
    /// Index into `Shared::slots` of the player producing audio.
    active: usize,
    preload: Option<Preload>,
    rate: f32,
    stuck: StuckDetector,
    /// Set when a track failed to load; reported as stuck until a reload.
    degraded: bool,
    /// `play()` arrived while a load was still running.
    pending_play: bool,
    last_position: f64,
    scrub_generation: u64,
}

enum TickAction {
    Nothing,
    Advance { from: usize, to: usize },
    Preload { standby: usize, track: Track },
}

struct Shared {
    slots: [PlayerSlot; 2],
    inner: Mutex<Inner>,
    ops: tokio::sync::Mutex<()>,
    status_tx: watch::Sender<PlaybackStatus>,
    load_id: AtomicU64,
    load_cancel: Mutex<CancellationToken>,
    wake: Notify,
    events: EventBus,
    config: TransportConfig,
}

// ============================================================================
// Public controller
// ============================================================================

/// Whole-book transport over two audio players.
pub struct TransportController {
    shared: Arc<Shared>,
    poll: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl TransportController {
    /// Create a controller. `primary` and `preload` must be distinct players.
    pub fn new(
        primary: Arc<dyn AudioPlayer>,
        preload: Arc<dyn AudioPlayer>,
        events: EventBus,
        config: TransportConfig,
    ) -> Result<Self> {
        config.validate().map_err(PlaybackError::Config)?;

        let slots = [PlayerSlot::new(primary), PlayerSlot::new(preload)];
        if slots[0].sampler.is_some() || slots[1].sampler.is_some() {
            debug!("High-resolution position sampler available");
        }

        let (status_tx, _) = watch::channel(PlaybackStatus::default());
        let inner = Inner {
            state: TransportState::Idle,
            book: None,
            active: 0,
            preload: None,
            rate: 1.0,
            stuck: StuckDetector::new(config.stuck_window, config.stuck_min_movement_secs),
            degraded: false,
            pending_play: false,
            last_position: 0.0,
            scrub_generation: 0,
        };

        Ok(Self {
            shared: Arc::new(Shared {
                slots,
                inner: Mutex::new(inner),
                ops: tokio::sync::Mutex::new(()),
                status_tx,
                load_id: AtomicU64::new(0),
                load_cancel: Mutex::new(CancellationToken::new()),
                wake: Notify::new(),
                events,
                config,
            }),
            poll: Mutex::new(None),
        })
    }

    /// Spawn the polling task. Calling it again while running does nothing.
    pub fn start(&self) {
        let mut poll = self.poll.lock();
        if poll.is_some() {
            return;
        }

        let cancel = CancellationToken::new();
        let shared = Arc::clone(&self.shared);
        let token = cancel.clone();
        let handle = tokio::spawn(async move { shared.run_poll_loop(token).await });
        *poll = Some((cancel, handle));
        debug!("Transport poll loop started");
    }

    /// Stop polling, cancel in-flight loads and release both players.
    pub async fn shutdown(&self) {
        let poll = self.poll.lock().take();
        if let Some((cancel, handle)) = poll {
            cancel.cancel();
            if let Err(e) = handle.await {
                warn!(error = %e, "Transport poll loop ended abnormally");
            }
        }

        if let Err(e) = self.unload().await {
            warn!(error = %e, "Unload during shutdown failed");
        }
    }

    /// Load a book and position it at `resume_position`.
    ///
    /// A failed first track does not abort: the transport stays loaded in a
    /// degraded stuck status and `play()` retries the track.
    ///
    /// # Errors
    ///
    /// - [`PlaybackError::InvalidTracks`] for an empty or malformed list
    /// - [`PlaybackError::Superseded`] when a newer load or unload wins
    #[instrument(skip(self, tracks, metadata), fields(item_id = %metadata.item_id, tracks = tracks.len()))]
    pub async fn load(
        &self,
        tracks: Vec<Track>,
        resume_position: f64,
        metadata: BookMetadata,
        auto_play: bool,
    ) -> Result<()> {
        let timeline = Timeline::new(tracks)?;
        let (load_id, cancel) = self.shared.begin_load();

        let _ops = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PlaybackError::Superseded),
            guard = self.shared.ops.lock() => guard,
        };

        self.shared.load_book(load_id, &cancel, timeline, resume_position, metadata, auto_play)
            .await
    }

    /// Start or resume playback.
    pub async fn play(&self) -> Result<()> {
        let _ops = self.shared.ops.lock().await;
        self.shared.do_play().await
    }

    /// Pause playback.
    pub async fn pause(&self) -> Result<()> {
        let _ops = self.shared.ops.lock().await;
        self.shared.do_pause().await
    }

    /// Seek to a global position, clamped to the book.
    pub async fn seek_to(&self, position: f64) -> Result<()> {
        let _ops = self.shared.ops.lock().await;
        self.shared.do_seek(position).await
    }

    /// Relative seek by `delta_seconds`, clamped to the book.
    pub async fn skip(&self, delta_seconds: f64) -> Result<()> {
        if !delta_seconds.is_finite() {
            return Err(PlaybackError::InvalidPosition(delta_seconds));
        }
        let _ops = self.shared.ops.lock().await;
        let current = self.shared.status_tx.borrow().position;
        self.shared.do_seek(current + delta_seconds).await
    }

    /// Set the playback rate for the active and all future tracks.
    pub async fn set_rate(&self, rate: f32) -> Result<()> {
        let config = &self.shared.config;
        if !rate.is_finite() || rate < config.min_rate || rate > config.max_rate {
            return Err(PlaybackError::InvalidRate(rate));
        }

        let _ops = self.shared.ops.lock().await;
        let (active, loaded) = {
            let mut inner = self.shared.inner.lock();
            inner.rate = rate;
            (inner.active, inner.state.is_ready())
        };

        if loaded {
            let cancel = self.shared.current_cancel();
            self.shared
                .guarded(&cancel, self.shared.slots[active].player.set_rate(rate))
                .await??;
        }
        debug!(rate, "Playback rate set");
        Ok(())
    }

    /// Enter scrubbing: position reads report the scrub target until
    /// [`end_scrub`](Self::end_scrub).
    pub async fn begin_scrub(&self) -> Result<()> {
        let _ops = self.shared.ops.lock().await;
        let mut inner = self.shared.inner.lock();
        if !inner.state.is_ready() {
            return Err(PlaybackError::NoBookLoaded);
        }

        inner.scrub_generation += 1;
        if !matches!(inner.state, TransportState::Scrubbing { .. }) {
            let target = self.shared.status_tx.borrow().position;
            let resume_playing = inner.state.is_playing();
            inner.state = TransportState::Scrubbing {
                target,
                resume_playing,
            };
        }
        self.shared.publish(&mut inner, None, false, false);
        Ok(())
    }

    /// Move the scrub target. Ignored outside scrubbing.
    pub fn update_scrub(&self, position: f64) {
        if !position.is_finite() {
            return;
        }
        let mut inner = self.shared.inner.lock();
        let Some(clamped) = inner.book.as_ref().map(|b| b.timeline.clamp(position)) else {
            return;
        };
        let scrubbing = match &mut inner.state {
            TransportState::Scrubbing { target, .. } => {
                *target = clamped;
                true
            }
            _ => false,
        };
        if scrubbing {
            self.shared.publish(&mut inner, None, false, false);
        }
    }

    /// Commit the scrub target.
    ///
    /// A target in the current track is applied at once. A target in another
    /// track is applied after the scrub debounce, and only if no new scrub
    /// started in the meantime.
    pub async fn end_scrub(&self) -> Result<()> {
        let (generation, target, same_track) = {
            let inner = self.shared.inner.lock();
            let TransportState::Scrubbing { target, .. } = inner.state else {
                return Ok(());
            };
            let Some(book) = inner.book.as_ref() else {
                return Err(PlaybackError::NoBookLoaded);
            };
            let (index, _) = book.timeline.locate(target, self.shared.config.snap_threshold_secs);
            (inner.scrub_generation, target, index == book.track_index)
        };

        if !same_track {
            tokio::time::sleep(self.shared.config.scrub_debounce).await;
        }

        let _ops = self.shared.ops.lock().await;
        {
            let inner = self.shared.inner.lock();
            let still_scrubbing = matches!(inner.state, TransportState::Scrubbing { .. });
            if inner.scrub_generation != generation || !still_scrubbing {
                debug!("Scrub superseded before commit");
                return Ok(());
            }
        }

        self.shared.do_seek(target).await
    }

    /// Stop both players and forget the book.
    pub async fn unload(&self) -> Result<()> {
        let (_, _cancel) = self.shared.begin_load();
        let _ops = self.shared.ops.lock().await;
        self.shared.unload_all().await;
        Ok(())
    }

    /// Latest published status.
    pub fn status(&self) -> PlaybackStatus {
        *self.shared.status_tx.borrow()
    }

    /// Watch stream of status updates.
    pub fn subscribe_status(&self) -> watch::Receiver<PlaybackStatus> {
        self.shared.status_tx.subscribe()
    }

    /// Index of the track currently producing audio.
    pub fn current_track_index(&self) -> Option<usize> {
        self.shared.inner.lock().book.as_ref().map(|b| b.track_index)
    }

    /// Snapshot of the transport state.
    pub fn state(&self) -> TransportState {
        self.shared.inner.lock().state.clone()
    }

    /// Item id of the loaded book.
    pub fn item_id(&self) -> Option<String> {
        self.shared.inner.lock().book.as_ref().map(|b| b.item_id.clone())
    }

    /// Metadata of the loaded book.
    pub fn metadata(&self) -> Option<BookMetadata> {
        self.shared.inner.lock().book.as_ref().map(|b| b.metadata.clone())
    }

    pub fn config(&self) -> &TransportConfig {
        &self.shared.config
    }
}

impl Drop for TransportController {
    fn drop(&mut self) {
        if let Some((cancel, _)) = self.poll.lock().take() {
            cancel.cancel();
        }
    }
}

// ============================================================================
// Shared implementation
// ============================================================================

impl Shared {
    fn emit(&self, event: PlaybackEvent) {
        let _ = self.events.emit(CoreEvent::Playback(event));
    }

    fn item_id(inner: &Inner) -> String {
        inner
            .book
            .as_ref()
            .map(|b| b.item_id.clone())
            .unwrap_or_default()
    }

    /// Take a new load id and cancel everything tied to the previous one.
    fn begin_load(&self) -> (u64, CancellationToken) {
        let id = self.load_id.fetch_add(1, Ordering::SeqCst) + 1;
        let token = CancellationToken::new();
        let previous = std::mem::replace(&mut *self.load_cancel.lock(), token.clone());
        previous.cancel();
        (id, token)
    }

    fn current_cancel(&self) -> CancellationToken {
        self.load_cancel.lock().clone()
    }

    fn is_current(&self, load_id: u64) -> bool {
        self.load_id.load(Ordering::SeqCst) == load_id
    }

    /// Run `fut` unless the load it belongs to is cancelled first.
    async fn guarded<T>(&self, cancel: &CancellationToken, fut: impl Future<Output = T>) -> Result<T> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(PlaybackError::Superseded),
            out = fut => Ok(out),
        }
    }

    /// Recompute and publish status from the current state.
    fn publish(&self, inner: &mut Inner, local: Option<f64>, buffering: bool, just_finished: bool) {
        let status = match inner.book.as_ref() {
            Some(book) => {
                let read = PositionRead {
                    timeline: &book.timeline,
                    track_index: book.track_index,
                    local,
                    last_position: inner.last_position,
                    now: Instant::now(),
                    switch_timeout: self.config.switch_timeout,
                };
                let position = inner.state.position(&read);
                PlaybackStatus {
                    is_playing: inner.state.is_playing(),
                    position,
                    duration: book.timeline.total_duration(),
                    is_buffering: buffering || matches!(inner.state, TransportState::Loading { .. }),
                    did_just_finish: just_finished,
                    is_stuck: inner.stuck.is_stuck() || inner.degraded,
                }
            }
            None => PlaybackStatus::default(),
        };

        inner.last_position = status.position;

        // A stall is reported on the status that raises it. Later ticks that
        // only restate it are not published.
        let jitter = self.config.stuck_min_movement_secs;
        self.status_tx.send_if_modified(|current| {
            let restated = status.is_stuck
                && current.is_stuck
                && current.is_playing == status.is_playing
                && current.is_buffering == status.is_buffering
                && current.duration == status.duration
                && !status.did_just_finish
                && (current.position - status.position).abs() < jitter;
            if restated {
                return false;
            }
            *current = status;
            true
        });
    }

    fn position_of(&self, slot: usize) -> Option<f64> {
        self.slots[slot].sampler.as_ref().map(|s| s.sample_position())
    }

    async fn load_book(
        &self,
        load_id: u64,
        cancel: &CancellationToken,
        timeline: Timeline,
        resume_position: f64,
        metadata: BookMetadata,
        auto_play: bool,
    ) -> Result<()> {
        self.stop_players(cancel).await;

        let (index, local) = timeline.locate(resume_position, self.config.snap_threshold_secs);
        let Some(track) = timeline.track(index).cloned() else {
            return Err(PlaybackError::InvalidTracks("resume track missing".to_string()));
        };
        let item_id = metadata.item_id.clone();
        let track_count = timeline.len();
        let duration = timeline.total_duration();
        let active = {
            let mut inner = self.inner.lock();
            inner.state = TransportState::Loading { load_id };
            inner.last_position = timeline.global(index, local);
            inner.book = Some(LoadedBook {
                item_id: item_id.clone(),
                timeline,
                metadata,
                track_index: index,
            });
            inner.preload = None;
            inner.stuck.reset();
            inner.degraded = false;
            inner.pending_play = auto_play;
            self.publish(&mut inner, None, true, false);
            inner.active
        };

        info!(item_id = %item_id, track = index, local, "Loading book");

        if let Err(e) = self.load_track(active, &track, cancel).await {
            if e.is_superseded() {
                return Err(e);
            }
            self.enter_degraded(load_id, index, &e);
            return Ok(());
        }

        self.prepare_active(active, local, cancel).await?;

        if !self.is_current(load_id) {
            return Err(PlaybackError::Superseded);
        }

        let play_now = {
            let mut inner = self.inner.lock();
            inner.state = TransportState::Paused;
            self.publish(&mut inner, Some(local), false, false);
            std::mem::take(&mut inner.pending_play)
        };

        self.emit(PlaybackEvent::Loaded {
            item_id,
            track_count,
            duration,
        });

        if play_now {
            self.do_play().await?;
        }
        Ok(())
    }

    /// Seek a freshly loaded player and apply the current rate.
    async fn prepare_active(&self, slot: usize, local: f64, cancel: &CancellationToken) -> Result<()> {
        let player = &self.slots[slot].player;
        if local > 0.0 {
            if let Err(e) = self.guarded(cancel, player.seek(local)).await? {
                warn!(error = %e, local, "Seek after load failed");
            }
        }

        let rate = self.inner.lock().rate;
        if (rate - 1.0).abs() > f32::EPSILON {
            if let Err(e) = self.guarded(cancel, player.set_rate(rate)).await? {
                warn!(error = %e, rate, "Failed to apply playback rate");
            }
        }
        Ok(())
    }

    /// Load `track` into a slot, retrying once.
    async fn load_track(&self, slot: usize, track: &Track, cancel: &CancellationToken) -> Result<f64> {
        let mut source = TrackSource::new(track.content_url.clone());
        if let Some(mime) = &track.mime_type {
            source = source.with_mime_type(mime.clone());
        }
        let player = &self.slots[slot].player;
        let url = redact_url(&track.content_url);
        let mut message = String::new();

        for attempt in 1..=2u32 {
            debug!(track = track.index, url, attempt, "Loading track");
            let outcome = self
                .guarded(cancel, tokio::time::timeout(self.config.load_timeout, player.load(&source)))
                .await?;

            match outcome {
                Ok(Ok(Some(duration))) => {
                    debug!(track = track.index, duration, attempt, "Track loaded");
                    return Ok(duration);
                }
                Ok(Ok(None)) => message = "no duration reported".to_string(),
                Ok(Err(e)) => message = e.to_string(),
                Err(_) => message = format!("timed out after {:?}", self.config.load_timeout),
            }
            warn!(track = track.index, url, attempt, error = %message, "Track load failed");
        }

        Err(PlaybackError::LoadFailed {
            track_index: track.index,
            message,
        })
    }

    fn enter_degraded(&self, load_id: u64, track_index: usize, error: &PlaybackError) {
        let mut inner = self.inner.lock();
        if !self.is_current(load_id) {
            return;
        }
        inner.state = TransportState::Paused;
        inner.degraded = true;
        inner.preload = None;
        if let Some(book) = inner.book.as_mut() {
            book.track_index = track_index;
        }
        self.publish(&mut inner, None, false, false);
        let item_id = Self::item_id(&inner);
        drop(inner);

        warn!(item_id = %item_id, track_index, error = %error, "Transport degraded after load failure");
        self.emit(PlaybackEvent::LoadFailed {
            item_id,
            track_index,
            message: error.to_string(),
        });
    }

    async fn stop_players(&self, cancel: &CancellationToken) {
        for slot in &self.slots {
            if let Ok(Err(e)) = self.guarded(cancel, slot.player.stop()).await {
                debug!(error = %e, "Stopping player failed");
            }
        }
    }

    async fn unload_all(&self) {
        for slot in &self.slots {
            if let Err(e) = slot.player.stop().await {
                debug!(error = %e, "Stopping player failed");
            }
            if let Err(e) = slot.player.unload().await {
                warn!(error = %e, "Unloading player failed");
            }
        }

        let item_id = {
            let mut inner = self.inner.lock();
            let book = inner.book.take();
            inner.state = TransportState::Idle;
            inner.preload = None;
            inner.degraded = false;
            inner.pending_play = false;
            inner.stuck.reset();
            inner.last_position = 0.0;
            self.publish(&mut inner, None, false, false);
            book.map(|b| b.item_id)
        };

        if let Some(item_id) = item_id {
            info!(item_id = %item_id, "Book unloaded");
            self.emit(PlaybackEvent::Unloaded { item_id });
        }
    }

    // ------------------------------------------------------------------------
    // Commands (caller holds the ops lock)
    // ------------------------------------------------------------------------

    async fn do_play(&self) -> Result<()> {
        let (state, degraded) = {
            let inner = self.inner.lock();
            (inner.state.clone(), inner.degraded)
        };

        match state {
            TransportState::Idle => return Err(PlaybackError::NoBookLoaded),
            TransportState::Loading { .. } => {
                self.inner.lock().pending_play = true;
                return Ok(());
            }
            TransportState::Playing => return Ok(()),
            TransportState::Switching { .. } => {
                let mut inner = self.inner.lock();
                if let TransportState::Switching { resume_playing, .. } = &mut inner.state {
                    *resume_playing = true;
                }
                return Ok(());
            }
            TransportState::Ended => self.do_seek(0.0).await?,
            TransportState::Paused | TransportState::Scrubbing { .. } => {}
        }

        if degraded {
            self.reload_current().await?;
        }

        let cancel = self.current_cancel();
        let active = self.inner.lock().active;
        self.guarded(&cancel, self.slots[active].player.play()).await??;

        let (item_id, position) = {
            let mut inner = self.inner.lock();
            match &mut inner.state {
                TransportState::Scrubbing { resume_playing, .. } => *resume_playing = true,
                state => *state = TransportState::Playing,
            }
            inner.stuck.reset();
            self.publish(&mut inner, None, false, false);
            (Self::item_id(&inner), inner.last_position)
        };
        self.wake.notify_one();

        debug!(item_id = %item_id, position, "Playback started");
        self.emit(PlaybackEvent::Started { item_id, position });
        Ok(())
    }

    async fn do_pause(&self) -> Result<()> {
        let (state, active) = {
            let inner = self.inner.lock();
            (inner.state.clone(), inner.active)
        };

        match state {
            TransportState::Idle => return Err(PlaybackError::NoBookLoaded),
            TransportState::Loading { .. } => {
                self.inner.lock().pending_play = false;
                return Ok(());
            }
            TransportState::Paused | TransportState::Ended => return Ok(()),
            TransportState::Playing
            | TransportState::Switching { .. }
            | TransportState::Scrubbing { .. } => {}
        }

        let cancel = self.current_cancel();
        self.guarded(&cancel, self.slots[active].player.pause()).await??;

        let (item_id, position) = {
            let mut inner = self.inner.lock();
            match &mut inner.state {
                TransportState::Switching { resume_playing, .. }
                | TransportState::Scrubbing { resume_playing, .. } => *resume_playing = false,
                state => *state = TransportState::Paused,
            }
            inner.stuck.reset();
            self.publish(&mut inner, None, false, false);
            (Self::item_id(&inner), inner.last_position)
        };
        self.wake.notify_one();

        debug!(item_id = %item_id, position, "Playback paused");
        self.emit(PlaybackEvent::Paused { item_id, position });
        Ok(())
    }

    async fn do_seek(&self, position: f64) -> Result<()> {
        if !position.is_finite() {
            return Err(PlaybackError::InvalidPosition(position));
        }

        let (from, to, local, target, active, resume_playing) = {
            let mut inner = self.inner.lock();
            if !inner.state.is_ready() {
                return Err(PlaybackError::NoBookLoaded);
            }
            // A committed seek ends any scrub in progress.
            if let TransportState::Scrubbing { resume_playing, .. } = inner.state {
                inner.state = if resume_playing {
                    TransportState::Playing
                } else {
                    TransportState::Paused
                };
            }
            let Some(book) = inner.book.as_ref() else {
                return Err(PlaybackError::NoBookLoaded);
            };
            let (to, local) = book.timeline.locate(position, self.config.snap_threshold_secs);
            (
                book.track_index,
                to,
                local,
                book.timeline.global(to, local),
                inner.active,
                inner.state.is_playing(),
            )
        };

        if from == to {
            let cancel = self.current_cancel();
            self.guarded(&cancel, self.slots[active].player.seek(local)).await??;

            let mut inner = self.inner.lock();
            if matches!(inner.state, TransportState::Ended) {
                inner.state = TransportState::Paused;
            }
            inner.stuck.reset();
            self.publish(&mut inner, Some(local), false, false);
        } else {
            self.switch_track(from, to, local, target, resume_playing).await?;
        }

        let item_id = Self::item_id(&self.inner.lock());
        debug!(item_id = %item_id, position = target, "Seek completed");
        self.emit(PlaybackEvent::Seeked {
            item_id,
            position: target,
        });
        Ok(())
    }

    async fn reload_current(&self) -> Result<()> {
        let cancel = self.current_cancel();
        let load_id = self.load_id.load(Ordering::SeqCst);
        let (active, track, local) = {
            let inner = self.inner.lock();
            let Some(book) = inner.book.as_ref() else {
                return Err(PlaybackError::NoBookLoaded);
            };
            let Some(track) = book.timeline.track(book.track_index).cloned() else {
                return Err(PlaybackError::NoBookLoaded);
            };
            let local = (inner.last_position - track.start_offset).clamp(0.0, track.duration);
            (inner.active, track, local)
        };

        if let Err(e) = self.load_track(active, &track, &cancel).await {
            if !e.is_superseded() {
                self.enter_degraded(load_id, track.index, &e);
            }
            return Err(e);
        }
        self.prepare_active(active, local, &cancel).await?;

        let mut inner = self.inner.lock();
        inner.degraded = false;
        self.publish(&mut inner, Some(local), false, false);
        Ok(())
    }

    /// Move playback from track `from` to track `to` at `local`.
    ///
    /// Enters `Switching` before anything else so published positions never
    /// regress, swaps in the standby player when it holds `to`, and leaves
    /// `Switching` once the incoming player reports the target or the switch
    /// timeout passes.
    async fn switch_track(
        &self,
        from: usize,
        to: usize,
        local: f64,
        cached_position: f64,
        resume_playing: bool,
    ) -> Result<()> {
        let cancel = self.current_cancel();
        let load_id = self.load_id.load(Ordering::SeqCst);
        let started_at = Instant::now();

        let (outgoing, track, preloaded) = {
            let mut inner = self.inner.lock();
            let Some(track) = inner.book.as_ref().and_then(|b| b.timeline.track(to).cloned()) else {
                return Err(PlaybackError::NoBookLoaded);
            };
            inner.state = TransportState::Switching {
                from,
                to,
                cached_position,
                started_at,
                resume_playing,
            };
            self.publish(&mut inner, None, false, false);
            let preloaded = matches!(inner.preload, Some(p) if p.track_index == to && p.ready);
            (inner.active, track, preloaded)
        };

        // Never let two players produce audio.
        if let Err(e) = self.guarded(&cancel, self.slots[outgoing].player.stop()).await? {
            debug!(error = %e, "Stopping outgoing player failed");
        }

        let incoming = if preloaded {
            1 - outgoing
        } else {
            if let Err(e) = self.load_track(outgoing, &track, &cancel).await {
                if !e.is_superseded() {
                    self.enter_degraded(load_id, to, &e);
                }
                return Err(e);
            }
            outgoing
        };

        self.prepare_active(incoming, local, &cancel).await?;
        let remaining = self.config.switch_timeout.saturating_sub(started_at.elapsed());
        let _ = tokio::time::timeout(remaining, self.confirm_position(incoming, local, &cancel)).await;

        let play_now = {
            let inner = self.inner.lock();
            inner.state.is_playing()
        };
        if play_now {
            self.guarded(&cancel, self.slots[incoming].player.play()).await??;
        }

        if !self.is_current(load_id) {
            return Err(PlaybackError::Superseded);
        }

        let item_id = {
            let mut inner = self.inner.lock();
            inner.active = incoming;
            inner.preload = None;
            if let Some(book) = inner.book.as_mut() {
                book.track_index = to;
            }
            inner.state = if play_now {
                TransportState::Playing
            } else {
                TransportState::Paused
            };
            inner.stuck.reset();
            self.publish(&mut inner, Some(local), false, false);
            Self::item_id(&inner)
        };

        info!(item_id = %item_id, from, to, gapless = preloaded, "Track changed");
        self.emit(PlaybackEvent::TrackChanged {
            item_id,
            from_index: from,
            to_index: to,
            gapless: preloaded,
        });
        Ok(())
    }

    /// Wait until the player in `slot` reports a position near `local`.
    async fn confirm_position(&self, slot: usize, local: f64, cancel: &CancellationToken) {
        loop {
            let reported = match self.position_of(slot) {
                Some(position) => Some(position),
                None => match self.guarded(cancel, self.slots[slot].player.status()).await {
                    Ok(Ok(status)) => Some(status.position),
                    Ok(Err(_)) => None,
                    Err(_) => return,
                },
            };

            if reported.is_some_and(|p| (p - local).abs() <= SEEK_CONFIRM_TOLERANCE_SECS) {
                return;
            }
            tokio::time::sleep(SEEK_CONFIRM_POLL).await;
        }
    }

    // ------------------------------------------------------------------------
    // Polling
    // ------------------------------------------------------------------------

    async fn run_poll_loop(self: Arc<Self>, cancel: CancellationToken) {
        loop {
            let playing = self.inner.lock().state.is_playing();
            let interval = self.config.poll_interval(playing);

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.wake.notified() => continue,
                _ = tokio::time::sleep(interval) => {}
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.tick() => {}
            }
        }
        debug!("Transport poll loop stopped");
    }

    async fn tick(self: &Arc<Self>) {
        let load_id = self.load_id.load(Ordering::SeqCst);
        let (active, playing) = {
            let mut inner = self.inner.lock();
            match inner.state {
                TransportState::Playing => (inner.active, true),
                TransportState::Paused => (inner.active, false),
                TransportState::Switching { .. } | TransportState::Scrubbing { .. } => {
                    self.publish(&mut inner, None, false, false);
                    return;
                }
                TransportState::Idle | TransportState::Loading { .. } | TransportState::Ended => {
                    return
                }
            }
        };

        let status = match self.slots[active].player.status().await {
            Ok(status) => status,
            Err(e) => {
                debug!(error = %e, "Player status read failed");
                return;
            }
        };
        let local = self.position_of(active).unwrap_or(status.position);

        let action = {
            let mut inner = self.inner.lock();
            let expected = if playing {
                TransportState::Playing
            } else {
                TransportState::Paused
            };
            if inner.state != expected || inner.active != active {
                return;
            }
            self.evaluate(&mut inner, local, status.is_buffering, status.did_just_finish, playing)
        };

        match action {
            TickAction::Nothing => {}
            TickAction::Preload { standby, track } => self.spawn_preload(standby, track),
            TickAction::Advance { from, to } => {
                let _ops = self.ops.lock().await;
                let still_current = {
                    let inner = self.inner.lock();
                    self.is_current(load_id)
                        && matches!(inner.state, TransportState::Playing)
                        && inner.book.as_ref().map(|b| b.track_index) == Some(from)
                };
                if !still_current {
                    return;
                }
                let cached = self.inner.lock().last_position;
                if let Err(e) = self.switch_track(from, to, 0.0, cached, true).await {
                    if !e.is_superseded() {
                        warn!(error = %e, from, to, "Automatic track advance failed");
                    }
                }
            }
        }
    }

    /// Decide what one poll sample means. Runs under the inner lock.
    fn evaluate(
        &self,
        inner: &mut Inner,
        local: f64,
        buffering: bool,
        just_finished: bool,
        playing: bool,
    ) -> TickAction {
        let Some(book) = inner.book.as_ref() else {
            return TickAction::Nothing;
        };
        let index = book.track_index;
        let Some(track) = book.timeline.track(index).cloned() else {
            return TickAction::Nothing;
        };
        let is_last = book.timeline.is_last(index);
        let global = track.start_offset + local;
        let total = book.timeline.total_duration();

        if playing && (just_finished || (!is_last && local >= track.duration)) {
            if !is_last {
                // The advance caches this sample as the switching position.
                self.publish(inner, Some(local.min(track.duration)), buffering, false);
                return TickAction::Advance {
                    from: index,
                    to: index + 1,
                };
            }

            if just_finished && total - global <= self.config.end_tolerance_secs {
                let item_id = book.item_id.clone();
                inner.state = TransportState::Ended;
                inner.stuck.reset();
                self.publish(inner, Some(local), false, true);
                info!(item_id = %item_id, "Book finished");
                self.emit(PlaybackEvent::Finished { item_id });
                return TickAction::Nothing;
            }

            if just_finished {
                warn!(position = global, total, "Last track finished early");
            }
        }

        let item_id = book.item_id.clone();
        let standby = 1 - inner.active;
        let wants_preload = playing
            && !is_last
            && track.duration - local < self.config.preload_remaining_secs
            && !matches!(inner.preload, Some(p) if p.track_index == index + 1);
        let next_track = if wants_preload {
            book.timeline.track(index + 1).cloned()
        } else {
            None
        };

        match inner.stuck.observe(Instant::now(), global, playing, buffering) {
            StuckTransition::Raised => {
                warn!(item_id = %item_id, position = global, "Playback stuck");
                self.emit(PlaybackEvent::Stuck {
                    item_id: item_id.clone(),
                    position: global,
                });
            }
            StuckTransition::Cleared => {
                info!(item_id = %item_id, position = global, "Playback recovered");
                self.emit(PlaybackEvent::Recovered {
                    item_id: item_id.clone(),
                    position: global,
                });
            }
            StuckTransition::None => {}
        }

        self.publish(inner, Some(local), buffering, false);

        match next_track {
            Some(track) => {
                inner.preload = Some(Preload {
                    track_index: track.index,
                    ready: false,
                });
                TickAction::Preload { standby, track }
            }
            None => TickAction::Nothing,
        }
    }

    fn spawn_preload(self: &Arc<Self>, standby: usize, track: Track) {
        let shared = Arc::clone(self);
        let load_id = self.load_id.load(Ordering::SeqCst);

        tokio::spawn(async move {
            let cancel = shared.current_cancel();
            debug!(track = track.index, "Preloading next track");

            match shared.load_track(standby, &track, &cancel).await {
                Ok(_) => {
                    let mut inner = shared.inner.lock();
                    let wanted = matches!(inner.preload, Some(p) if p.track_index == track.index);
                    if shared.is_current(load_id) && inner.active != standby && wanted {
                        inner.preload = Some(Preload {
                            track_index: track.index,
                            ready: true,
                        });
                    }
                }
                Err(PlaybackError::Superseded) => {}
                Err(e) => {
                    // Advance falls back to a direct load.
                    warn!(track = track.index, error = %e, "Preload failed");
                }
            }
        });
    }
}
