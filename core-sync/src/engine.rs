//! # Progress Sync Engine
//!
//! Makes listening progress durable: every save lands in the local store
//! first, then reaches the server through a debounced, retried upload queue.
//!
//! ## Overview
//!
//! The `ProgressSyncEngine` is the only writer of the progress store and the
//! upload queue. It:
//! - Upserts local records (`synced = false`) without touching the network
//! - Queues durable saves and uploads them from a single worker task
//! - Prefers the open session's sync call and falls back to item progress
//! - Resolves conflicts per [`ConflictPolicy`](crate::ConflictPolicy)
//! - Backs off on failure and gives up after the configured retries
//! - Flushes on the way to the background and rescans on return
//!
//! ## Workflow
//!
//! 1. `save_progress` writes the record and queues the item
//! 2. The worker sleeps until the earliest deadline or a wake-up
//! 3. Due items are claimed and uploaded with bounded concurrency
//! 4. Success marks the record synced if nothing newer was written meanwhile
//! 5. Failure schedules a retry or, once exhausted, leaves the record unsynced
//!
//! ## Usage
//!
//! ```rust,ignore
//! let engine = ProgressSyncEngine::new(store, negotiator, remote, None, clock, events, SyncConfig::default())?;
//! engine.init().await?;
//!
//! engine.save_progress("li_8x2k", 1190.0, 36000.0, Some("ses_1")).await?;
//! engine.on_lifecycle(LifecycleState::Background).await;
//! ```

use crate::config::SyncConfig;
use crate::conflict_resolver::{adopt_server, ConflictResolver, Resolution};
use crate::error::{Result, SyncError};
use crate::queue::{Claim, FailureOutcome, SyncQueue};
use bridge_traits::background::LifecycleState;
use bridge_traits::error::BridgeError;
use bridge_traits::network::NetworkMonitor;
use bridge_traits::server::{ProgressRemote, ProgressUpdate, RemoteProgress, SessionNegotiator};
use bridge_traits::time::Clock;
use core_library::models::ProgressRecord;
use core_library::repositories::ProgressRepository;
use core_runtime::events::{CoreEvent, EventBus, SyncEvent};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, instrument, warn};

/// Queue snapshot for hosts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SyncStatus {
    pub queue_size: usize,
    pub is_running: bool,
}

/// Result of one upload attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadOutcome {
    Uploaded { via_session: bool },
    /// Server progress was newer and replaced the local record.
    ServerKept,
    /// The server no longer knows the item.
    Dropped,
    /// Nothing to send: the record was missing or already synced.
    Skipped,
    Failed,
}

enum Dispatch {
    /// Offline; nothing was claimed.
    Deferred,
    Started(Vec<JoinHandle<UploadOutcome>>),
}

enum Sent {
    Uploaded { via_session: bool },
    ServerNewer(RemoteProgress),
}

#[derive(Default)]
struct Activity {
    item_id: Option<String>,
    playing: bool,
}

struct Shared {
    store: Arc<dyn ProgressRepository>,
    negotiator: Arc<dyn SessionNegotiator>,
    remote: Arc<dyn ProgressRemote>,
    network: Option<Arc<dyn NetworkMonitor>>,
    clock: Arc<dyn Clock>,
    events: EventBus,
    config: SyncConfig,
    resolver: ConflictResolver,
    queue: Mutex<SyncQueue>,
    activity: Mutex<Activity>,
    wake: Notify,
    permits: Semaphore,
    uploads: TaskTracker,
}

/// Local-first progress store with background upload.
pub struct ProgressSyncEngine {
    shared: Arc<Shared>,
    worker: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl ProgressSyncEngine {
    /// Create an engine. Nothing runs until [`init`](Self::init).
    ///
    /// # Arguments
    ///
    /// * `store` - Durable progress repository
    /// * `negotiator` - Session sync, the preferred upload path
    /// * `remote` - Direct item progress, the fallback path
    /// * `network` - Optional connectivity probe; offline defers uploads
    /// * `clock` - Source of record timestamps
    /// * `events` - Event bus for sync notices
    /// * `config` - Queue and retry tunables
    pub fn new(
        store: Arc<dyn ProgressRepository>,
        negotiator: Arc<dyn SessionNegotiator>,
        remote: Arc<dyn ProgressRemote>,
        network: Option<Arc<dyn NetworkMonitor>>,
        clock: Arc<dyn Clock>,
        events: EventBus,
        config: SyncConfig,
    ) -> Result<Self> {
        config.validate().map_err(SyncError::Config)?;

        Ok(Self {
            shared: Arc::new(Shared {
                store,
                negotiator,
                remote,
                network,
                clock,
                events,
                resolver: ConflictResolver::new(config.conflict_policy),
                queue: Mutex::new(SyncQueue::new(&config)),
                activity: Mutex::new(Activity::default()),
                wake: Notify::new(),
                permits: Semaphore::new(config.max_concurrent_uploads),
                uploads: TaskTracker::new(),
                config,
            }),
            worker: Mutex::new(None),
        })
    }

    /// Re-queue unsynced records from the store and start the worker.
    ///
    /// Returns the number of records queued.
    #[instrument(skip(self))]
    pub async fn init(&self) -> Result<usize> {
        let requeued = self.shared.rescan().await?;

        let mut worker = self.worker.lock();
        if worker.is_none() {
            let cancel = CancellationToken::new();
            let shared = Arc::clone(&self.shared);
            let token = cancel.clone();
            let handle = tokio::spawn(async move { shared.run_worker(token).await });
            *worker = Some((cancel, handle));
        }
        drop(worker);

        info!(requeued, "Progress sync engine started");
        Ok(requeued)
    }

    /// Force-flush within the background deadline, then stop the worker and
    /// wait for uploads still in flight.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) {
        self.flush_with_deadline().await;

        let worker = self.worker.lock().take();
        if let Some((cancel, handle)) = worker {
            cancel.cancel();
            if let Err(e) = handle.await {
                warn!(error = %e, "Sync worker ended abnormally");
            }
        }

        self.shared.uploads.close();
        self.shared.uploads.wait().await;
        self.shared.uploads.reopen();
        info!("Progress sync engine stopped");
    }

    /// Persist progress locally. Never touches the network.
    ///
    /// A record older than the stored one is ignored, not an error.
    #[instrument(skip(self), fields(item_id = %item_id))]
    pub async fn save_progress_local(
        &self,
        item_id: &str,
        position: f64,
        duration: f64,
    ) -> Result<ProgressRecord> {
        let record = self.shared.record_for(item_id, position, duration);
        if !self.shared.store.upsert(&record).await? {
            debug!("Newer local progress already stored");
        }
        Ok(record)
    }

    /// Persist progress locally and queue it for upload.
    #[instrument(skip(self), fields(item_id = %item_id))]
    pub async fn save_progress(
        &self,
        item_id: &str,
        position: f64,
        duration: f64,
        session_id: Option<&str>,
    ) -> Result<()> {
        let record = self.save_progress_local(item_id, position, duration).await?;

        let added = self.shared.queue.lock().enqueue(
            item_id,
            session_id.map(str::to_string),
            Instant::now(),
        );
        if added {
            debug!(position = record.position, "Progress queued for upload");
        }

        let _ = self.shared.events.emit(CoreEvent::Sync(SyncEvent::Enqueued {
            item_id: item_id.to_string(),
            position: record.position,
        }));
        self.shared.wake.notify_one();
        Ok(())
    }

    pub fn get_sync_status(&self) -> SyncStatus {
        SyncStatus {
            queue_size: self.shared.queue.lock().len(),
            is_running: self
                .worker
                .lock()
                .as_ref()
                .is_some_and(|(_, handle)| !handle.is_finished()),
        }
    }

    /// Name the item being listened to. Its uploads wait while playing.
    pub fn set_active_item(&self, item_id: Option<&str>) {
        self.shared.activity.lock().item_id = item_id.map(str::to_string);
        self.shared.wake.notify_one();
    }

    pub fn set_playing(&self, playing: bool) {
        self.shared.activity.lock().playing = playing;
        if !playing {
            self.shared.wake.notify_one();
        }
    }

    /// React to the app moving between foreground and background.
    #[instrument(skip(self))]
    pub async fn on_lifecycle(&self, state: LifecycleState) {
        if state.is_leaving_foreground() {
            self.flush_with_deadline().await;
            return;
        }

        match self.shared.rescan().await {
            Ok(requeued) => debug!(requeued, "Rescanned unsynced progress"),
            Err(e) => warn!(error = %e, "Failed to rescan unsynced progress"),
        }
    }

    /// Upload due items now and wait for them.
    ///
    /// `force` uploads everything queued, ignoring debounce, backoff, the
    /// active-item hold and connectivity. Returns the number uploaded.
    #[instrument(skip(self))]
    pub async fn flush(&self, force: bool) -> usize {
        let handles = match self.shared.dispatch(force).await {
            Dispatch::Deferred => return 0,
            Dispatch::Started(handles) => handles,
        };

        let mut uploaded = 0;
        for handle in handles {
            if let Ok(UploadOutcome::Uploaded { .. } | UploadOutcome::ServerKept) = handle.await {
                uploaded += 1;
            }
        }
        uploaded
    }

    /// Stored progress for an item.
    pub async fn load_progress(&self, item_id: &str) -> Result<Option<ProgressRecord>> {
        Ok(self.shared.store.find(item_id).await?)
    }

    /// Compare the local record with server progress and keep the newer.
    ///
    /// A newer server value overwrites the local record as synced. A newer
    /// unsynced local value is queued for upload.
    #[instrument(skip(self), fields(item_id = %item_id))]
    pub async fn reconcile_with_remote(&self, item_id: &str) -> Result<Option<ProgressRecord>> {
        let shared = &self.shared;
        let local = shared.store.find(item_id).await?;
        let server = timeout(shared.config.request_timeout, shared.remote.get_progress(item_id))
            .await
            .map_err(|_| SyncError::Timeout(format!("progress read for {}", item_id)))??;

        let server = match (server, local.as_ref()) {
            (None, _) => None,
            (Some(server), Some(local)) if server.last_update <= local.local_updated_at => None,
            (Some(server), _) => Some(server),
        };

        let Some(server) = server else {
            if let Some(local) = local.as_ref().filter(|r| !r.synced) {
                shared
                    .queue
                    .lock()
                    .enqueue_if_absent(&local.item_id, Instant::now());
                shared.wake.notify_one();
            }
            return Ok(local);
        };

        let adopted = adopt_server(&server);
        shared.store.upsert(&adopted).await?;
        shared.queue.lock().remove(item_id);

        if let Some(local) = local.filter(|r| !r.synced) {
            info!(
                local_position = local.position,
                server_position = server.position,
                "Server progress newer than local"
            );
            let _ = shared.events.emit(CoreEvent::Sync(SyncEvent::ConflictResolved {
                item_id: item_id.to_string(),
                local_updated_at: local.local_updated_at,
                server_updated_at: server.last_update,
                server_position: server.position,
            }));
        }
        Ok(Some(adopted))
    }

    pub fn config(&self) -> &SyncConfig {
        &self.shared.config
    }

    async fn flush_with_deadline(&self) {
        let deadline = self.shared.config.background_flush_timeout;
        match timeout(deadline, self.flush(true)).await {
            Ok(uploaded) => debug!(uploaded, "Forced flush complete"),
            Err(_) => {
                let pending = self.shared.queue.lock().len();
                warn!(pending, "Forced flush hit its deadline");
                let _ = self
                    .shared
                    .events
                    .emit(CoreEvent::Sync(SyncEvent::FlushTimedOut { pending }));
            }
        }
    }
}

impl Drop for ProgressSyncEngine {
    fn drop(&mut self) {
        if let Some((cancel, _)) = self.worker.lock().take() {
            cancel.cancel();
        }
    }
}

// ============================================================================
// Worker
// ============================================================================

impl Shared {
    fn emit(&self, event: SyncEvent) {
        let _ = self.events.emit(CoreEvent::Sync(event));
    }

    fn record_for(&self, item_id: &str, position: f64, duration: f64) -> ProgressRecord {
        let position = if duration > 0.0 {
            position.clamp(0.0, duration)
        } else {
            position.max(0.0)
        };
        let finished = duration > 0.0 && position >= duration;
        ProgressRecord::new(item_id, position, duration, self.clock.unix_timestamp_millis())
            .finished(finished)
    }

    /// The active item while it is playing.
    fn held_back(&self) -> Option<String> {
        let activity = self.activity.lock();
        if activity.playing {
            activity.item_id.clone()
        } else {
            None
        }
    }

    async fn is_online(&self) -> bool {
        match &self.network {
            Some(monitor) => monitor.is_connected().await,
            None => true,
        }
    }

    async fn rescan(&self) -> Result<usize> {
        let unsynced = self.store.find_unsynced().await?;
        let now = Instant::now();

        let added = {
            let mut queue = self.queue.lock();
            unsynced
                .iter()
                .filter(|record| queue.enqueue_if_absent(&record.item_id, now))
                .count()
        };

        if added > 0 {
            self.wake.notify_one();
        }
        Ok(added)
    }

    async fn run_worker(self: Arc<Self>, cancel: CancellationToken) {
        debug!("Sync worker started");
        loop {
            let deadline = {
                let skip = self.held_back();
                self.queue.lock().next_deadline(skip.as_deref())
            };
            let until_due = async {
                match deadline {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.wake.notified() => {}
                _ = until_due => {}
            }

            if let Dispatch::Deferred = self.dispatch(false).await {
                debug!("Offline, deferring progress uploads");
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = self.wake.notified() => {}
                    _ = tokio::time::sleep(self.config.offline_recheck) => {}
                }
            }
        }
        debug!("Sync worker stopped");
    }

    /// Claim due items and spawn their uploads.
    async fn dispatch(self: &Arc<Self>, force: bool) -> Dispatch {
        if !force && !self.is_online().await {
            let queued = !self.queue.lock().is_empty();
            if queued {
                return Dispatch::Deferred;
            }
        }

        let skip = self.held_back();
        let claims: Vec<Claim> = {
            let mut queue = self.queue.lock();
            let ready = queue.ready(Instant::now(), force, skip.as_deref());
            ready.iter().filter_map(|id| queue.claim(id)).collect()
        };

        let handles = claims
            .into_iter()
            .map(|claim| {
                let shared = Arc::clone(self);
                self.uploads.spawn(async move { shared.upload(claim).await })
            })
            .collect();
        Dispatch::Started(handles)
    }

    #[instrument(skip(self, claim), fields(item_id = %claim.item_id))]
    async fn upload(self: Arc<Self>, claim: Claim) -> UploadOutcome {
        let _permit = self.permits.acquire().await.ok();

        let outcome = match self.store.find(&claim.item_id).await {
            Ok(Some(record)) if !record.synced => self.send_record(&claim, record).await,
            Ok(_) => {
                self.queue.lock().complete(&claim);
                UploadOutcome::Skipped
            }
            Err(e) => self.fail(&claim, e.into()),
        };

        self.wake.notify_one();
        outcome
    }

    async fn send_record(&self, claim: &Claim, record: ProgressRecord) -> UploadOutcome {
        let sent = match timeout(
            self.config.request_timeout,
            self.send(&record, claim.session_id.as_deref()),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(SyncError::Timeout(format!(
                "upload exceeded {:?}",
                self.config.request_timeout
            ))),
        };

        match sent {
            Ok(Sent::Uploaded { via_session }) => {
                self.mark_synced(&record).await;
                self.queue.lock().complete(claim);
                info!(position = record.position, via_session, "Progress synced");
                self.emit(SyncEvent::Uploaded {
                    item_id: record.item_id,
                    position: record.position,
                    via_session,
                });
                UploadOutcome::Uploaded { via_session }
            }
            Ok(Sent::ServerNewer(server)) => {
                if let Err(e) = self.store.upsert(&adopt_server(&server)).await {
                    warn!(error = %e, "Failed to adopt server progress locally");
                }
                self.queue.lock().complete(claim);
                info!(
                    local_position = record.position,
                    server_position = server.position,
                    "Server progress newer, local write discarded"
                );
                self.emit(SyncEvent::ConflictResolved {
                    item_id: record.item_id,
                    local_updated_at: record.local_updated_at,
                    server_updated_at: server.last_update,
                    server_position: server.position,
                });
                UploadOutcome::ServerKept
            }
            Err(e) if e.is_terminal() => {
                self.mark_synced(&record).await;
                self.queue.lock().remove(&claim.item_id);
                warn!(error = %e, "Server no longer knows the item, dropping progress");
                self.emit(SyncEvent::Dropped {
                    item_id: record.item_id,
                });
                UploadOutcome::Dropped
            }
            Err(e) => self.fail(claim, e),
        }
    }

    /// Push one record. Session sync first, item progress on a missing session.
    async fn send(&self, record: &ProgressRecord, session_id: Option<&str>) -> Result<Sent> {
        if self.resolver.needs_server_read() {
            let server = self.remote.get_progress(&record.item_id).await?;
            if let Resolution::KeepServer(server) = self.resolver.resolve(record, server.as_ref()) {
                return Ok(Sent::ServerNewer(server));
            }
        }

        if let Some(session_id) = session_id {
            match self.negotiator.sync_session(session_id, record.position, 0.0).await {
                Ok(()) => return Ok(Sent::Uploaded { via_session: true }),
                Err(BridgeError::NotFound(_)) => {
                    debug!(session_id, "Session gone, falling back to item progress");
                }
                Err(e) => return Err(e.into()),
            }
        }

        let update = ProgressUpdate::new(record.position, record.duration, record.is_finished);
        self.remote.update_progress(&record.item_id, &update).await?;
        Ok(Sent::Uploaded { via_session: false })
    }

    async fn mark_synced(&self, record: &ProgressRecord) {
        match self
            .store
            .mark_synced(&record.item_id, record.local_updated_at)
            .await
        {
            Ok(true) => {}
            Ok(false) => debug!("Newer local write landed during upload, keeping unsynced"),
            Err(e) => warn!(error = %e, "Failed to mark progress synced"),
        }
    }

    fn fail(&self, claim: &Claim, error: SyncError) -> UploadOutcome {
        let outcome = self.queue.lock().record_failure(claim, Instant::now());
        match outcome {
            FailureOutcome::Retry { attempt, delay } => {
                let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
                warn!(attempt, delay_ms, error = %error, "Progress upload failed, retry scheduled");
                self.emit(SyncEvent::RetryScheduled {
                    item_id: claim.item_id.clone(),
                    attempt,
                    delay_ms,
                });
            }
            FailureOutcome::Exhausted { failures } => {
                warn!(failures, error = %error, "Progress upload gave up, kept locally");
                self.emit(SyncEvent::RetriesExhausted {
                    item_id: claim.item_id.clone(),
                    message: error.to_string(),
                });
            }
            FailureOutcome::Superseded => {
                debug!(error = %error, "Upload failed after a newer change, requeued");
            }
        }
        UploadOutcome::Failed
    }
}
