//! # Audiobook Core
//!
//! Owns one transport controller, one progress sync engine and one chapter
//! resolver, and wires them to the host capabilities in [`CoreConfig`].
//!
//! ## Lifecycle
//!
//! ```text
//! new(config) ──> init() ──> open_book() ... open_book() ──> shutdown()
//!   validate        pool,       session, chapters,            final save,
//!   capabilities    worker,     resume, load                  flush, close
//!                   autosave
//! ```
//!
//! ## Autosave
//!
//! A background task watches the transport status. Position changes are
//! saved locally at most once per `autosave_interval`; pause and end of book
//! are durable saves that queue an upload. While a book plays, the sync
//! engine holds back its uploads; lifecycle transitions force them out.

use crate::autosave::{AutosavePolicy, SaveAction};
use crate::error::{CoreError, Result};
use crate::tuning::EngineTuning;
use bridge_traits::background::LifecycleState;
use bridge_traits::error::BridgeError;
use core_library::db::{create_pool, DatabaseConfig};
use core_library::models::{BookMetadata, Chapter, ChapterSource, ProgressRecord, Track};
use core_library::repositories::{SqliteChapterCacheRepository, SqliteProgressRepository};
use core_metadata::{chapter_at, ChapterResolution, ChapterResolver};
use core_playback::{PlaybackStatus, TransportController};
use core_runtime::config::CoreConfig;
use core_runtime::events::{CoreEvent, EventBus, Receiver, SessionEvent};
use core_sync::{ProgressSyncEngine, SyncStatus};
use parking_lot::Mutex;
use std::sync::{Arc, OnceLock};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, instrument, warn};

/// Where the resume position of an opened book came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeSource {
    /// The session's resume position; no unsynced local progress existed.
    Session,
    /// Unsynced local progress newer than the server's.
    Local,
    /// Server progress newer than unsynced local progress.
    Server,
}

/// Summary of a successful [`AudiobookCore::open_book`].
#[derive(Debug, Clone, PartialEq)]
pub struct OpenedBook {
    pub item_id: String,
    pub session_id: String,
    pub duration: f64,
    pub resume_position: f64,
    pub resume_source: ResumeSource,
    pub chapter_source: Option<ChapterSource>,
    pub chapter_count: usize,
}

#[derive(Debug, Clone)]
struct OpenBook {
    item_id: String,
    session_id: String,
    duration: f64,
    chapters: Vec<Chapter>,
}

struct Components {
    sync: Arc<ProgressSyncEngine>,
    chapters: ChapterResolver,
}

struct Shared {
    config: CoreConfig,
    tuning: EngineTuning,
    events: EventBus,
    transport: TransportController,
    components: OnceLock<Components>,
    book: Mutex<Option<OpenBook>>,
    /// Serializes book changes.
    opening: tokio::sync::Mutex<()>,
    /// Fire-and-forget session closes.
    closes: TaskTracker,
}

/// Entry point for hosts.
pub struct AudiobookCore {
    shared: Arc<Shared>,
    tasks: Mutex<Option<(CancellationToken, Vec<JoinHandle<()>>)>>,
}

impl AudiobookCore {
    /// Create a core with default tuning.
    pub fn new(config: CoreConfig) -> Result<Self> {
        Self::with_tuning(config, EngineTuning::default())
    }

    /// Create a core. Fails fast on invalid configuration or tuning; nothing
    /// touches the database or network until [`init`](Self::init).
    pub fn with_tuning(config: CoreConfig, tuning: EngineTuning) -> Result<Self> {
        config.validate()?;
        tuning.validate().map_err(CoreError::Tuning)?;

        let events = EventBus::new(config.event_buffer_size);
        let transport = TransportController::new(
            Arc::clone(&config.primary_player),
            Arc::clone(&config.preload_player),
            events.clone(),
            tuning.transport.clone(),
        )?;

        Ok(Self {
            shared: Arc::new(Shared {
                config,
                tuning,
                events,
                transport,
                components: OnceLock::new(),
                book: Mutex::new(None),
                opening: tokio::sync::Mutex::new(()),
                closes: TaskTracker::new(),
            }),
            tasks: Mutex::new(None),
        })
    }

    /// Open the store, start the sync worker, the transport poll loop, the
    /// autosave task and the lifecycle watcher. Calling it twice does nothing.
    #[instrument(skip(self))]
    pub async fn init(&self) -> Result<()> {
        if self.shared.components.get().is_some() {
            return Ok(());
        }

        let config = &self.shared.config;
        let db_config = if config.database_path.as_os_str() == ":memory:" {
            DatabaseConfig::in_memory()
        } else {
            DatabaseConfig::new(&config.database_path)
        };
        let pool = create_pool(db_config).await?;

        let sync = Arc::new(ProgressSyncEngine::new(
            Arc::new(SqliteProgressRepository::new(pool.clone())),
            Arc::clone(&config.session_negotiator),
            Arc::clone(&config.progress_remote),
            config.network_monitor.clone(),
            Arc::clone(&config.clock),
            self.shared.events.clone(),
            self.shared.tuning.sync.clone(),
        )?);

        let mut chapters = ChapterResolver::new(
            Arc::new(SqliteChapterCacheRepository::new(pool)),
            Arc::clone(&config.clock),
            self.shared.events.clone(),
            self.shared.tuning.chapters.clone(),
        );
        if let Some(source) = &config.item_source {
            chapters = chapters.with_item_source(Arc::clone(source));
        }

        let requeued = sync.init().await?;

        if self
            .shared
            .components
            .set(Components {
                sync: Arc::clone(&sync),
                chapters,
            })
            .is_err()
        {
            // Lost a race with a concurrent init.
            return Ok(());
        }

        self.shared.transport.start();

        let cancel = CancellationToken::new();
        let mut handles = Vec::new();

        let status = self.shared.transport.subscribe_status();
        let shared = Arc::clone(&self.shared);
        let token = cancel.clone();
        handles.push(tokio::spawn(async move {
            shared.run_autosave(status, token).await
        }));

        if config.lifecycle_observer.is_some() {
            let shared = Arc::clone(&self.shared);
            let token = cancel.clone();
            handles.push(tokio::spawn(async move {
                shared.watch_lifecycle(token).await
            }));
        }

        *self.tasks.lock() = Some((cancel, handles));
        info!(requeued, "Audiobook core initialized");
        Ok(())
    }

    /// Save the open book, flush the upload queue within the background
    /// deadline, close the session and release the players.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) {
        let tasks = self.tasks.lock().take();
        if let Some((cancel, handles)) = tasks {
            cancel.cancel();
            for handle in handles {
                if let Err(e) = handle.await {
                    warn!(error = %e, "Background task ended abnormally");
                }
            }
        }

        let _opening = self.shared.opening.lock().await;
        let book = self.shared.book.lock().take();
        if let Some(book) = book {
            let position = self.shared.save_final(&book).await;
            if let Some(components) = self.shared.components.get() {
                components.sync.shutdown().await;
            }
            self.shared.close_session(book.session_id, position).await;
        } else if let Some(components) = self.shared.components.get() {
            components.sync.shutdown().await;
        }

        self.shared.closes.close();
        self.shared.closes.wait().await;
        self.shared.closes.reopen();

        self.shared.transport.shutdown().await;
        if let Some(components) = self.shared.components.get() {
            components.chapters.wait_for_pending_writes().await;
        }
        info!("Audiobook core shut down");
    }

    /// Open a book known only by id.
    pub async fn open_book(&self, item_id: &str, auto_play: bool) -> Result<OpenedBook> {
        self.open_book_with_metadata(BookMetadata::untitled(item_id), auto_play)
            .await
    }

    /// Open a book, using `metadata` as the last-known record for chapter
    /// fallback.
    ///
    /// Any open book is saved first and its session closed in the
    /// background. The resume position is the session's unless unsynced
    /// local progress is newer than the server's.
    #[instrument(skip(self, metadata), fields(item_id = %metadata.item_id))]
    pub async fn open_book_with_metadata(
        &self,
        mut metadata: BookMetadata,
        auto_play: bool,
    ) -> Result<OpenedBook> {
        let shared = &self.shared;
        let components = shared.components()?;
        let _opening = shared.opening.lock().await;

        let previous = shared.book.lock().take();
        if let Some(previous) = previous {
            let position = shared.save_final(&previous).await;
            let closer = Arc::clone(shared);
            shared.closes.spawn(async move {
                closer.close_session(previous.session_id, position).await
            });
        }
        components.sync.set_active_item(None);

        let item_id = metadata.item_id.clone();
        let session = match timeout(
            shared.tuning.sync.request_timeout,
            shared.config.session_negotiator.start_session(&item_id),
        )
        .await
        {
            Ok(session) => session?,
            Err(_) => {
                return Err(BridgeError::Timeout(format!("starting session for {}", item_id)).into())
            }
        };
        let _ = shared.events.emit(CoreEvent::Session(SessionEvent::Opened {
            item_id: item_id.clone(),
            session_id: session.id.clone(),
        }));

        let duration = session.total_duration();
        if metadata.duration <= 0.0 {
            metadata.duration = duration;
        }

        let session_chapters: Vec<Chapter> =
            session.chapters.iter().cloned().map(Chapter::from).collect();
        let ChapterResolution {
            chapters,
            source: chapter_source,
        } = components
            .chapters
            .resolve(&metadata, Some(session_chapters.as_slice()))
            .await;

        let (resume_position, resume_source) = shared
            .resolve_resume(&item_id, session.resume_position)
            .await;
        let resume_position = resume_position.clamp(0.0, duration.max(0.0));

        let tracks: Vec<Track> = session.tracks.into_iter().map(Track::from).collect();
        metadata.chapters = chapters.clone();
        if let Err(e) = shared
            .transport
            .load(tracks, resume_position, metadata, auto_play)
            .await
        {
            let closer = Arc::clone(shared);
            let session_id = session.id.clone();
            shared
                .closes
                .spawn(async move { closer.close_session(session_id, None).await });
            return Err(e.into());
        }

        let opened = OpenedBook {
            item_id: item_id.clone(),
            session_id: session.id.clone(),
            duration,
            resume_position,
            resume_source,
            chapter_source,
            chapter_count: chapters.len(),
        };

        *shared.book.lock() = Some(OpenBook {
            item_id: item_id.clone(),
            session_id: session.id,
            duration,
            chapters,
        });
        components.sync.set_active_item(Some(&item_id));

        info!(
            resume_position,
            ?resume_source,
            chapters = opened.chapter_count,
            "Book opened"
        );
        Ok(opened)
    }

    /// Save and close the open book, keeping the core running.
    #[instrument(skip(self))]
    pub async fn close_book(&self) -> Result<()> {
        let components = self.shared.components()?;
        let _opening = self.shared.opening.lock().await;

        let book = self.shared.book.lock().take();
        let Some(book) = book else {
            return Ok(());
        };

        let position = self.shared.save_final(&book).await;
        components.sync.set_active_item(None);
        self.shared.transport.unload().await?;
        self.shared.close_session(book.session_id, position).await;
        Ok(())
    }

    // ========================================================================
    // Transport
    // ========================================================================

    pub async fn play(&self) -> Result<()> {
        Ok(self.shared.transport.play().await?)
    }

    pub async fn pause(&self) -> Result<()> {
        Ok(self.shared.transport.pause().await?)
    }

    pub async fn seek_to(&self, position: f64) -> Result<()> {
        Ok(self.shared.transport.seek_to(position).await?)
    }

    pub async fn skip(&self, delta_seconds: f64) -> Result<()> {
        Ok(self.shared.transport.skip(delta_seconds).await?)
    }

    pub async fn set_rate(&self, rate: f32) -> Result<()> {
        Ok(self.shared.transport.set_rate(rate).await?)
    }

    pub async fn begin_scrub(&self) -> Result<()> {
        Ok(self.shared.transport.begin_scrub().await?)
    }

    pub fn update_scrub(&self, position: f64) {
        self.shared.transport.update_scrub(position);
    }

    pub async fn end_scrub(&self) -> Result<()> {
        Ok(self.shared.transport.end_scrub().await?)
    }

    pub fn status(&self) -> PlaybackStatus {
        self.shared.transport.status()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<PlaybackStatus> {
        self.shared.transport.subscribe_status()
    }

    pub fn transport(&self) -> &TransportController {
        &self.shared.transport
    }

    // ========================================================================
    // Chapters
    // ========================================================================

    /// Chapters of the open book; empty when none is open or none resolved.
    pub fn chapters(&self) -> Vec<Chapter> {
        self.shared
            .book
            .lock()
            .as_ref()
            .map(|book| book.chapters.clone())
            .unwrap_or_default()
    }

    /// Chapter containing the current position.
    pub fn current_chapter(&self) -> Option<Chapter> {
        let position = self.status().position;
        let book = self.shared.book.lock();
        let chapters = &book.as_ref()?.chapters;
        chapter_at(chapters, position).map(|index| chapters[index].clone())
    }

    // ========================================================================
    // Progress
    // ========================================================================

    pub async fn save_progress_local(
        &self,
        item_id: &str,
        position: f64,
        duration: f64,
    ) -> Result<ProgressRecord> {
        let components = self.shared.components()?;
        Ok(components
            .sync
            .save_progress_local(item_id, position, duration)
            .await?)
    }

    /// Durable save. Uses the open session when `item_id` is the open book.
    pub async fn save_progress(&self, item_id: &str, position: f64, duration: f64) -> Result<()> {
        let components = self.shared.components()?;
        let session_id = self
            .shared
            .book
            .lock()
            .as_ref()
            .filter(|book| book.item_id == item_id)
            .map(|book| book.session_id.clone());
        Ok(components
            .sync
            .save_progress(item_id, position, duration, session_id.as_deref())
            .await?)
    }

    pub fn get_sync_status(&self) -> SyncStatus {
        match self.shared.components.get() {
            Some(components) => components.sync.get_sync_status(),
            None => SyncStatus::default(),
        }
    }

    /// Forward an app lifecycle transition. Leaving the foreground saves the
    /// open book durably before the forced flush.
    pub async fn handle_lifecycle(&self, state: LifecycleState) -> Result<()> {
        self.shared.components()?;
        self.shared.handle_lifecycle(state).await;
        Ok(())
    }

    pub fn subscribe_events(&self) -> Receiver<CoreEvent> {
        self.shared.events.subscribe()
    }

    /// Id of the open book.
    pub fn open_item_id(&self) -> Option<String> {
        self.shared.book.lock().as_ref().map(|book| book.item_id.clone())
    }
}

impl Drop for AudiobookCore {
    fn drop(&mut self) {
        if let Some((cancel, _)) = self.tasks.lock().take() {
            cancel.cancel();
        }
    }
}

// ============================================================================
// Internals
// ============================================================================

impl Shared {
    fn components(&self) -> Result<&Components> {
        self.components.get().ok_or(CoreError::NotInitialized)
    }

    fn open_ids(&self) -> Option<(String, String, f64)> {
        self.book
            .lock()
            .as_ref()
            .map(|book| (book.item_id.clone(), book.session_id.clone(), book.duration))
    }

    /// Resume position for a newly opened item.
    async fn resolve_resume(&self, item_id: &str, session_position: f64) -> (f64, ResumeSource) {
        let Ok(components) = self.components() else {
            return (session_position, ResumeSource::Session);
        };

        let local = match components.sync.load_progress(item_id).await {
            Ok(local) => local,
            Err(e) => {
                warn!(item_id, error = %e, "Failed to read local progress");
                None
            }
        };

        let Some(local) = local.filter(|record| !record.synced) else {
            return (session_position, ResumeSource::Session);
        };

        match components.sync.reconcile_with_remote(item_id).await {
            Ok(Some(winner)) if winner.synced => (winner.position, ResumeSource::Server),
            Ok(Some(winner)) => (winner.position, ResumeSource::Local),
            Ok(None) => (session_position, ResumeSource::Session),
            Err(e) => {
                debug!(item_id, error = %e, "Server progress unavailable, resuming from local");
                (local.position, ResumeSource::Local)
            }
        }
    }

    /// Durable save of the current position for `book`. Returns the position
    /// saved, if the transport still had the book loaded.
    async fn save_final(&self, book: &OpenBook) -> Option<f64> {
        if self.transport.item_id().as_deref() != Some(book.item_id.as_str()) {
            return None;
        }
        let position = self.transport.status().position;

        let components = self.components().ok()?;
        components.sync.set_playing(false);
        if let Err(e) = components
            .sync
            .save_progress(&book.item_id, position, book.duration, Some(&book.session_id))
            .await
        {
            warn!(item_id = %book.item_id, error = %e, "Failed to save progress");
        }
        Some(position)
    }

    async fn close_session(&self, session_id: String, final_position: Option<f64>) {
        let closed = timeout(
            self.tuning.sync.request_timeout,
            self.config
                .session_negotiator
                .close_session(&session_id, final_position),
        )
        .await;

        let event = match closed {
            Ok(Ok(())) => {
                debug!(session_id = %session_id, "Session closed");
                SessionEvent::Closed { session_id }
            }
            Ok(Err(e)) => {
                warn!(session_id = %session_id, error = %e, "Failed to close session");
                SessionEvent::CloseFailed {
                    session_id,
                    message: e.to_string(),
                }
            }
            Err(_) => {
                warn!(session_id = %session_id, "Session close timed out");
                SessionEvent::CloseFailed {
                    session_id,
                    message: "timed out".to_string(),
                }
            }
        };
        let _ = self.events.emit(CoreEvent::Session(event));
    }

    async fn handle_lifecycle(&self, state: LifecycleState) {
        let Ok(components) = self.components() else {
            return;
        };

        if state.is_leaving_foreground() {
            if let Some((item_id, session_id, duration)) = self.open_ids() {
                let position = self.transport.status().position;
                if let Err(e) = components
                    .sync
                    .save_progress(&item_id, position, duration, Some(&session_id))
                    .await
                {
                    warn!(item_id = %item_id, error = %e, "Failed to save progress before backgrounding");
                }
            }
        }

        components.sync.on_lifecycle(state).await;
    }

    async fn run_autosave(
        self: Arc<Self>,
        mut status: watch::Receiver<PlaybackStatus>,
        cancel: CancellationToken,
    ) {
        let Ok(components) = self.components() else {
            return;
        };
        let mut policy = AutosavePolicy::new(self.tuning.autosave_interval);
        let mut reported_playing = false;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                changed = status.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }

            let current = *status.borrow_and_update();
            let Some((item_id, session_id, _)) = self.open_ids() else {
                policy.reset();
                continue;
            };

            if current.is_playing != reported_playing {
                reported_playing = current.is_playing;
                components.sync.set_playing(reported_playing);
            }

            let result = match policy.observe(&item_id, &current, Instant::now()) {
                SaveAction::None => continue,
                SaveAction::Local => components
                    .sync
                    .save_progress_local(&item_id, current.position, current.duration)
                    .await
                    .map(|_| ()),
                SaveAction::Durable => {
                    components
                        .sync
                        .save_progress(
                            &item_id,
                            current.position,
                            current.duration,
                            Some(&session_id),
                        )
                        .await
                }
            };

            if let Err(e) = result {
                warn!(item_id = %item_id, error = %e, "Autosave failed");
            }
        }
        debug!("Autosave stopped");
    }

    async fn watch_lifecycle(self: Arc<Self>, cancel: CancellationToken) {
        let Some(observer) = self.config.lifecycle_observer.clone() else {
            return;
        };
        let mut changes = match observer.subscribe_changes().await {
            Ok(changes) => changes,
            Err(e) => {
                warn!(error = %e, "Lifecycle observation unavailable");
                return;
            }
        };

        loop {
            let state = tokio::select! {
                _ = cancel.cancelled() => break,
                state = changes.next() => state,
            };
            match state {
                Some(state) => {
                    debug!(?state, "Lifecycle changed");
                    self.handle_lifecycle(state).await;
                }
                None => break,
            }
        }
    }
}
