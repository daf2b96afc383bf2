//! Integration tests for the transport controller driving two mock players

use async_trait::async_trait;
use bridge_traits::error::{BridgeError, Result as BridgeResult};
use bridge_traits::playback::{AudioPlayer, PlayerStatus, PositionSampler, TrackSource};
use core_library::models::{BookMetadata, Track};
use core_playback::{PlaybackError, TransportConfig, TransportController, TransportState};
use core_runtime::events::{CoreEvent, EventBus, PlaybackEvent, Receiver};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Mock player
// ============================================================================

type CallLog = Arc<Mutex<Vec<String>>>;

#[derive(Default)]
struct PlayerState {
    source: Option<String>,
    position: f64,
    playing: bool,
    finished: bool,
    rate: f32,
    sampled: Option<f64>,
}

struct MockPlayer {
    name: &'static str,
    state: Mutex<PlayerState>,
    log: CallLog,
    failures_left: AtomicU32,
    slow: Mutex<Option<(String, Duration)>>,
    with_sampler: bool,
}

impl MockPlayer {
    fn new(name: &'static str, log: CallLog) -> Arc<Self> {
        Arc::new(Self {
            name,
            state: Mutex::new(PlayerState {
                rate: 1.0,
                ..Default::default()
            }),
            log,
            failures_left: AtomicU32::new(0),
            slow: Mutex::new(None),
            with_sampler: false,
        })
    }

    fn with_sampler(name: &'static str, log: CallLog) -> Arc<Self> {
        Arc::new(Self {
            name,
            state: Mutex::new(PlayerState {
                rate: 1.0,
                ..Default::default()
            }),
            log,
            failures_left: AtomicU32::new(0),
            slow: Mutex::new(None),
            with_sampler: true,
        })
    }

    fn fail_next_loads(&self, count: u32) {
        self.failures_left.store(count, Ordering::SeqCst);
    }

    fn slow_load(&self, url: &str, delay: Duration) {
        *self.slow.lock() = Some((url.to_string(), delay));
    }

    fn finish_at(&self, position: f64) {
        let mut state = self.state.lock();
        state.position = position;
        state.finished = true;
        state.playing = false;
    }

    fn set_position(&self, position: f64) {
        self.state.lock().position = position;
    }

    fn set_sampled(&self, position: f64) {
        self.state.lock().sampled = Some(position);
    }

    fn position(&self) -> f64 {
        self.state.lock().position
    }

    fn is_playing(&self) -> bool {
        self.state.lock().playing
    }

    fn source(&self) -> Option<String> {
        self.state.lock().source.clone()
    }

    fn rate(&self) -> f32 {
        self.state.lock().rate
    }

    fn record(&self, call: impl Into<String>) {
        self.log.lock().push(format!("{}:{}", self.name, call.into()));
    }
}

#[async_trait]
impl AudioPlayer for MockPlayer {
    async fn load(&self, source: &TrackSource) -> BridgeResult<Option<f64>> {
        self.record(format!("load {}", source.url));

        let delay = self
            .slow
            .lock()
            .as_ref()
            .filter(|(url, _)| *url == source.url)
            .map(|(_, delay)| *delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.failures_left.load(Ordering::SeqCst) > 0 {
            self.failures_left.fetch_sub(1, Ordering::SeqCst);
            return Err(BridgeError::OperationFailed("decoder error".into()));
        }

        let mut state = self.state.lock();
        state.source = Some(source.url.clone());
        state.position = 0.0;
        state.playing = false;
        state.finished = false;
        state.sampled = None;
        state.rate = 1.0;
        Ok(Some(600.0))
    }

    async fn play(&self) -> BridgeResult<()> {
        self.record("play");
        self.state.lock().playing = true;
        Ok(())
    }

    async fn pause(&self) -> BridgeResult<()> {
        self.record("pause");
        self.state.lock().playing = false;
        Ok(())
    }

    async fn stop(&self) -> BridgeResult<()> {
        self.record("stop");
        let mut state = self.state.lock();
        state.playing = false;
        state.finished = false;
        Ok(())
    }

    async fn seek(&self, position: f64) -> BridgeResult<()> {
        self.record(format!("seek {}", position));
        let mut state = self.state.lock();
        state.position = position;
        state.finished = false;
        state.sampled = None;
        Ok(())
    }

    async fn set_rate(&self, rate: f32) -> BridgeResult<()> {
        self.record(format!("rate {}", rate));
        self.state.lock().rate = rate;
        Ok(())
    }

    async fn status(&self) -> BridgeResult<PlayerStatus> {
        let state = self.state.lock();
        Ok(PlayerStatus {
            position: state.position,
            duration: state.source.as_ref().map(|_| 600.0),
            is_playing: state.playing,
            is_buffering: false,
            did_just_finish: state.finished,
        })
    }

    async fn unload(&self) -> BridgeResult<()> {
        self.record("unload");
        let mut state = self.state.lock();
        state.source = None;
        state.playing = false;
        Ok(())
    }

    fn position_sampler(self: Arc<Self>) -> Option<Arc<dyn PositionSampler>> {
        if self.with_sampler {
            Some(self)
        } else {
            None
        }
    }
}

impl PositionSampler for MockPlayer {
    fn sample_position(&self) -> f64 {
        let state = self.state.lock();
        state.sampled.unwrap_or(state.position)
    }
}

// ============================================================================
// Helpers
// ============================================================================

struct Harness {
    transport: Arc<TransportController>,
    primary: Arc<MockPlayer>,
    standby: Arc<MockPlayer>,
    log: CallLog,
    events: Receiver<CoreEvent>,
}

fn harness_with(primary: Arc<MockPlayer>, standby: Arc<MockPlayer>, log: CallLog) -> Harness {
    let bus = EventBus::new(256);
    let events = bus.subscribe();
    let transport = TransportController::new(
        primary.clone(),
        standby.clone(),
        bus,
        TransportConfig::default(),
    )
    .unwrap();
    transport.start();

    Harness {
        transport: Arc::new(transport),
        primary,
        standby,
        log,
        events,
    }
}

fn harness() -> Harness {
    let log = CallLog::default();
    harness_with(
        MockPlayer::new("primary", log.clone()),
        MockPlayer::new("standby", log.clone()),
        log,
    )
}

fn tracks(count: usize, prefix: &str) -> Vec<Track> {
    (0..count)
        .map(|i| Track {
            index: i,
            start_offset: i as f64 * 600.0,
            duration: 600.0,
            content_url: format!("{}/{}", prefix, i),
            mime_type: Some("audio/mpeg".into()),
        })
        .collect()
}

fn book(item_id: &str) -> BookMetadata {
    BookMetadata::untitled(item_id)
}

fn playback_events(rx: &mut Receiver<CoreEvent>) -> Vec<PlaybackEvent> {
    let mut out = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let CoreEvent::Playback(event) = event {
            out.push(event);
        }
    }
    out
}

/// Index of the most recent matching call.
fn call_index(log: &CallLog, call: &str) -> Option<usize> {
    log.lock().iter().rposition(|c| c == call)
}

async fn settle(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

// ============================================================================
// Loading
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_load_resumes_at_global_position() {
    let mut h = harness();

    h.transport
        .load(tracks(3, "/file"), 1190.0, book("li_1"), false)
        .await
        .unwrap();

    let status = h.transport.status();
    assert_eq!(status.position, 1190.0);
    assert_eq!(status.duration, 1800.0);
    assert!(!status.is_playing);
    assert!(!status.is_buffering);
    assert_eq!(h.transport.current_track_index(), Some(1));
    assert_eq!(h.primary.source().as_deref(), Some("/file/1"));
    assert_eq!(h.primary.position(), 590.0);

    let events = playback_events(&mut h.events);
    assert!(events.iter().any(|e| matches!(
        e,
        PlaybackEvent::Loaded { item_id, track_count: 3, duration } if item_id == "li_1" && *duration == 1800.0
    )));
}

#[tokio::test(start_paused = true)]
async fn test_load_with_auto_play_starts_playback() {
    let h = harness();

    h.transport
        .load(tracks(2, "/file"), 30.0, book("li_1"), true)
        .await
        .unwrap();

    assert!(h.transport.status().is_playing);
    assert!(h.primary.is_playing());
    assert_eq!(h.transport.state(), TransportState::Playing);
}

#[tokio::test(start_paused = true)]
async fn test_load_retries_once_before_failing() {
    let mut h = harness();
    h.primary.fail_next_loads(1);

    h.transport
        .load(tracks(2, "/file"), 0.0, book("li_1"), false)
        .await
        .unwrap();

    let loads = h
        .log
        .lock()
        .iter()
        .filter(|c| *c == "primary:load /file/0")
        .count();
    assert_eq!(loads, 2);
    assert!(!h.transport.status().is_stuck);
    assert!(!playback_events(&mut h.events)
        .iter()
        .any(|e| matches!(e, PlaybackEvent::LoadFailed { .. })));
}

#[tokio::test(start_paused = true)]
async fn test_load_failure_degrades_until_play_retries() {
    let mut h = harness();
    h.primary.fail_next_loads(2);

    h.transport
        .load(tracks(2, "/file"), 0.0, book("li_1"), false)
        .await
        .unwrap();

    let status = h.transport.status();
    assert!(status.is_stuck);
    assert!(!status.is_playing);
    assert!(playback_events(&mut h.events).iter().any(|e| matches!(
        e,
        PlaybackEvent::LoadFailed { track_index: 0, .. }
    )));

    h.transport.play().await.unwrap();

    let status = h.transport.status();
    assert!(status.is_playing);
    assert!(!status.is_stuck);
    assert_eq!(h.primary.source().as_deref(), Some("/file/0"));
}

#[tokio::test(start_paused = true)]
async fn test_newer_load_supersedes_pending_one() {
    let h = harness();
    h.primary.slow_load("/slow/0", Duration::from_secs(5));

    let transport = Arc::clone(&h.transport);
    let first = tokio::spawn(async move {
        transport
            .load(tracks(2, "/slow"), 0.0, book("li_old"), false)
            .await
    });
    settle(10).await;

    h.transport
        .load(tracks(2, "/file"), 0.0, book("li_new"), false)
        .await
        .unwrap();

    let result = first.await.unwrap();
    assert!(matches!(result, Err(PlaybackError::Superseded)));
    assert_eq!(h.transport.item_id().as_deref(), Some("li_new"));
    assert_eq!(h.primary.source().as_deref(), Some("/file/0"));
    assert!(!h.transport.status().is_buffering);
}

#[tokio::test(start_paused = true)]
async fn test_invalid_tracks_rejected() {
    let h = harness();
    let result = h.transport.load(Vec::new(), 0.0, book("li_1"), false).await;
    assert!(matches!(result, Err(PlaybackError::InvalidTracks(_))));
    assert_eq!(h.transport.state(), TransportState::Idle);
}

// ============================================================================
// Seeking and scrubbing
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_seek_near_track_end_snaps_to_next_track() {
    let mut h = harness();
    h.transport
        .load(tracks(3, "/file"), 0.0, book("li_1"), false)
        .await
        .unwrap();

    h.transport.seek_to(1199.8).await.unwrap();

    assert_eq!(h.transport.current_track_index(), Some(2));
    assert_eq!(h.transport.status().position, 1200.0);

    let events = playback_events(&mut h.events);
    assert!(events.iter().any(|e| matches!(
        e,
        PlaybackEvent::TrackChanged { from_index: 0, to_index: 2, .. }
    )));
}

#[tokio::test(start_paused = true)]
async fn test_cross_track_seek_never_regresses_while_switching() {
    let h = harness();
    h.primary.slow_load("/file/2", Duration::from_millis(1_200));
    h.standby.slow_load("/file/2", Duration::from_millis(1_200));
    h.transport
        .load(tracks(3, "/file"), 100.0, book("li_1"), true)
        .await
        .unwrap();
    settle(150).await;

    let transport = Arc::clone(&h.transport);
    let seek = tokio::spawn(async move { transport.seek_to(1300.0).await });

    let mut samples = Vec::new();
    for _ in 0..10 {
        settle(100).await;
        samples.push(h.transport.status().position);
    }
    seek.await.unwrap().unwrap();
    samples.push(h.transport.status().position);

    assert!(
        samples.iter().all(|p| *p == 1300.0),
        "position moved off the seek target during the switch: {:?}",
        samples
    );
    assert_eq!(h.transport.current_track_index(), Some(2));
}

#[tokio::test(start_paused = true)]
async fn test_seek_within_track_keeps_player() {
    let h = harness();
    h.transport
        .load(tracks(2, "/file"), 0.0, book("li_1"), true)
        .await
        .unwrap();

    h.transport.seek_to(250.0).await.unwrap();

    assert_eq!(h.primary.position(), 250.0);
    assert_eq!(h.transport.status().position, 250.0);
    assert!(h.transport.status().is_playing);
    assert_eq!(call_index(&h.log, "standby:play"), None);
}

#[tokio::test(start_paused = true)]
async fn test_skip_clamps_to_book_bounds() {
    let h = harness();
    h.transport
        .load(tracks(3, "/file"), 10.0, book("li_1"), false)
        .await
        .unwrap();

    h.transport.skip(-30.0).await.unwrap();
    assert_eq!(h.transport.status().position, 0.0);

    h.transport.skip(5000.0).await.unwrap();
    assert_eq!(h.transport.current_track_index(), Some(2));
    assert_eq!(h.transport.status().position, 1800.0);

    assert!(matches!(
        h.transport.seek_to(f64::NAN).await,
        Err(PlaybackError::InvalidPosition(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_scrub_reports_target_and_commits_after_debounce() {
    let mut h = harness();
    h.transport
        .load(tracks(3, "/file"), 0.0, book("li_1"), false)
        .await
        .unwrap();
    playback_events(&mut h.events);

    h.transport.begin_scrub().await.unwrap();
    h.transport.update_scrub(700.0);
    assert_eq!(h.transport.status().position, 700.0);
    h.transport.update_scrub(1300.0);
    assert_eq!(h.transport.status().position, 1300.0);
    // Player has not moved yet.
    assert_eq!(h.primary.source().as_deref(), Some("/file/0"));

    h.transport.end_scrub().await.unwrap();

    assert_eq!(h.transport.current_track_index(), Some(2));
    assert_eq!(h.transport.status().position, 1300.0);
    let changes: Vec<_> = playback_events(&mut h.events)
        .into_iter()
        .filter(|e| matches!(e, PlaybackEvent::TrackChanged { .. }))
        .collect();
    assert_eq!(changes.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_new_scrub_cancels_pending_cross_track_commit() {
    let h = harness();
    h.transport
        .load(tracks(3, "/file"), 0.0, book("li_1"), false)
        .await
        .unwrap();

    h.transport.begin_scrub().await.unwrap();
    h.transport.update_scrub(1300.0);
    let transport = Arc::clone(&h.transport);
    let pending = tokio::spawn(async move { transport.end_scrub().await });
    settle(10).await;

    h.transport.begin_scrub().await.unwrap();
    h.transport.update_scrub(100.0);
    h.transport.end_scrub().await.unwrap();
    pending.await.unwrap().unwrap();

    assert_eq!(h.transport.current_track_index(), Some(0));
    assert_eq!(h.transport.status().position, 100.0);
    assert_eq!(h.primary.position(), 100.0);
}

// ============================================================================
// Track advance and book end
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_natural_advance_uses_preloaded_player_without_regression() {
    let mut h = harness();
    h.transport
        .load(tracks(3, "/file"), 590.0, book("li_1"), true)
        .await
        .unwrap();

    let positions = Arc::new(Mutex::new(Vec::new()));
    let mut rx = h.transport.subscribe_status();
    let seen = Arc::clone(&positions);
    tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            let position = rx.borrow_and_update().position;
            seen.lock().push(position);
        }
    });

    // First poll inside the preload window loads the next file.
    settle(250).await;
    assert_eq!(h.standby.source().as_deref(), Some("/file/1"));

    h.primary.finish_at(599.95);
    settle(300).await;

    assert_eq!(h.transport.current_track_index(), Some(1));
    assert!(h.standby.is_playing());
    assert!(!h.primary.is_playing());

    let stop = call_index(&h.log, "primary:stop").unwrap();
    let play = call_index(&h.log, "standby:play").unwrap();
    assert!(stop < play);

    let positions = positions.lock().clone();
    assert!(!positions.is_empty());
    for pair in positions.windows(2) {
        assert!(pair[1] >= pair[0], "position regressed: {:?}", positions);
    }
    assert!(h.transport.status().position >= 600.0);

    assert!(playback_events(&mut h.events).iter().any(|e| matches!(
        e,
        PlaybackEvent::TrackChanged { from_index: 0, to_index: 1, gapless: true, .. }
    )));
}

#[tokio::test(start_paused = true)]
async fn test_last_track_finish_ends_book_once() {
    let mut h = harness();
    h.transport
        .load(tracks(2, "/file"), 1190.0, book("li_1"), true)
        .await
        .unwrap();
    settle(150).await;

    h.primary.finish_at(600.0);
    settle(500).await;

    let status = h.transport.status();
    assert_eq!(h.transport.state(), TransportState::Ended);
    assert!(status.did_just_finish);
    assert!(!status.is_playing);
    assert_eq!(status.position, 1200.0);

    let finished = playback_events(&mut h.events)
        .into_iter()
        .filter(|e| matches!(e, PlaybackEvent::Finished { .. }))
        .count();
    assert_eq!(finished, 1);

    // Play after the end restarts the book.
    h.transport.play().await.unwrap();
    assert_eq!(h.transport.current_track_index(), Some(0));
    assert_eq!(h.transport.status().position, 0.0);
    assert!(h.transport.status().is_playing);
}

// ============================================================================
// Stuck detection
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_stuck_playback_reported_once_then_recovers() {
    let mut h = harness();
    h.transport
        .load(tracks(2, "/file"), 120.0, book("li_1"), true)
        .await
        .unwrap();

    settle(7_000).await;

    assert!(h.transport.status().is_stuck);
    let stuck = playback_events(&mut h.events)
        .into_iter()
        .filter(|e| matches!(e, PlaybackEvent::Stuck { .. }))
        .count();
    assert_eq!(stuck, 1);

    h.primary.set_position(125.0);
    settle(200).await;

    assert!(!h.transport.status().is_stuck);
    assert!(playback_events(&mut h.events)
        .iter()
        .any(|e| matches!(e, PlaybackEvent::Recovered { .. })));
}

#[tokio::test(start_paused = true)]
async fn test_stuck_status_published_once_while_stalled() {
    let h = harness();
    h.transport
        .load(tracks(2, "/file"), 120.0, book("li_1"), true)
        .await
        .unwrap();

    let stuck_updates = Arc::new(AtomicU32::new(0));
    let mut rx = h.transport.subscribe_status();
    let counter = Arc::clone(&stuck_updates);
    tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            if rx.borrow_and_update().is_stuck {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        }
    });

    settle(8_000).await;

    assert!(h.transport.status().is_stuck);
    assert_eq!(stuck_updates.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_paused_playback_never_stuck() {
    let h = harness();
    h.transport
        .load(tracks(2, "/file"), 120.0, book("li_1"), false)
        .await
        .unwrap();

    settle(20_000).await;
    assert!(!h.transport.status().is_stuck);
}

// ============================================================================
// Rate, sampler, unload
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_rate_validated_and_carried_across_tracks() {
    let h = harness();
    h.transport
        .load(tracks(2, "/file"), 0.0, book("li_1"), false)
        .await
        .unwrap();

    h.transport.set_rate(1.5).await.unwrap();
    assert_eq!(h.primary.rate(), 1.5);

    assert!(matches!(
        h.transport.set_rate(4.0).await,
        Err(PlaybackError::InvalidRate(_))
    ));
    assert!(matches!(
        h.transport.set_rate(0.1).await,
        Err(PlaybackError::InvalidRate(_))
    ));

    h.transport.seek_to(700.0).await.unwrap();
    assert_eq!(h.transport.current_track_index(), Some(1));
    assert_eq!(h.primary.rate(), 1.5);
}

#[tokio::test(start_paused = true)]
async fn test_position_sampler_preferred_over_status() {
    let log = CallLog::default();
    let h = harness_with(
        MockPlayer::with_sampler("primary", log.clone()),
        MockPlayer::new("standby", log.clone()),
        log,
    );
    h.transport
        .load(tracks(2, "/file"), 0.0, book("li_1"), true)
        .await
        .unwrap();

    h.primary.set_sampled(42.5);
    settle(150).await;

    assert_eq!(h.primary.position(), 0.0);
    assert_eq!(h.transport.status().position, 42.5);
}

#[tokio::test(start_paused = true)]
async fn test_unload_resets_transport() {
    let mut h = harness();
    h.transport
        .load(tracks(2, "/file"), 0.0, book("li_1"), true)
        .await
        .unwrap();

    h.transport.unload().await.unwrap();

    assert_eq!(h.transport.state(), TransportState::Idle);
    assert_eq!(h.transport.status(), Default::default());
    assert_eq!(h.transport.item_id(), None);
    assert!(call_index(&h.log, "primary:unload").is_some());
    assert!(call_index(&h.log, "standby:unload").is_some());
    assert!(playback_events(&mut h.events)
        .iter()
        .any(|e| matches!(e, PlaybackEvent::Unloaded { item_id } if item_id == "li_1")));

    assert!(matches!(
        h.transport.play().await,
        Err(PlaybackError::NoBookLoaded)
    ));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_stops_players() {
    let h = harness();
    h.transport
        .load(tracks(2, "/file"), 0.0, book("li_1"), true)
        .await
        .unwrap();

    h.transport.shutdown().await;

    assert!(!h.primary.is_playing());
    assert_eq!(h.transport.state(), TransportState::Idle);
}

// ============================================================================
// Logging
// ============================================================================

#[derive(Default)]
struct UrlCapture {
    urls: Arc<Mutex<Vec<String>>>,
}

struct UrlVisitor<'a>(&'a mut Vec<String>);

impl tracing::field::Visit for UrlVisitor<'_> {
    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        if field.name() == "url" {
            self.0.push(value.to_string());
        }
    }

    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "url" {
            self.0.push(format!("{:?}", value));
        }
    }
}

impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for UrlCapture {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
        event.record(&mut UrlVisitor(&mut self.urls.lock()));
    }
}

#[tokio::test(start_paused = true)]
async fn test_track_load_logs_strip_url_tokens() {
    use tracing_subscriber::layer::SubscriberExt;

    let capture = UrlCapture::default();
    let urls = Arc::clone(&capture.urls);
    let subscriber = tracing_subscriber::registry().with(capture);
    let _guard = tracing::subscriber::set_default(subscriber);

    let h = harness();
    let mut signed = tracks(2, "https://abs.local/api/items/li_1/file");
    for track in &mut signed {
        track.content_url = format!("{}?token=secret", track.content_url);
    }
    h.primary.fail_next_loads(1);
    h.transport.load(signed, 0.0, book("li_1"), false).await.unwrap();

    let urls = urls.lock();
    assert!(urls.iter().any(|u| u == "https://abs.local/api/items/li_1/file/0"));
    assert!(urls.iter().all(|u| !u.contains("token")), "{:?}", urls);
}
