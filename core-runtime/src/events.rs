//! # Event Bus System
//!
//! Typed events published by the transport controller, the durability engine
//! and the chapter resolver, fanned out over `tokio::sync::broadcast`.
//!
//! ## Overview
//!
//! Events are informational. Nothing in the core waits on a subscriber, and
//! emitting with no subscribers is not an error worth reporting, so emitters
//! discard the result of `emit`.
//!
//! ```text
//! ┌──────────────────┐  emit   ┌───────────┐  subscribe  ┌────────────┐
//! │ TransportControl ├────────>│           ├────────────>│ UI layer   │
//! └──────────────────┘         │ EventBus  │             └────────────┘
//! ┌──────────────────┐  emit   │ (broadcast│  subscribe  ┌────────────┐
//! │ ProgressSync     ├────────>│  channel) ├────────────>│ Telemetry  │
//! └──────────────────┘         │           │             └────────────┘
//! ┌──────────────────┐  emit   │           │
//! │ ChapterResolver  ├────────>│           │
//! └──────────────────┘         └───────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{CoreEvent, EventBus, EventStream, SyncEvent};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let bus = EventBus::new(64);
//! let mut notices = EventStream::new(bus.subscribe())
//!     .filter(|e| matches!(e, CoreEvent::Sync(SyncEvent::RetriesExhausted { .. })));
//!
//! bus.emit(CoreEvent::Sync(SyncEvent::RetriesExhausted {
//!     item_id: "li_1".to_string(),
//!     message: "server unreachable".to_string(),
//! }))
//! .ok();
//!
//! assert!(notices.recv().await.is_ok());
//! # }
//! ```
//!
//! ## Error Handling
//!
//! - **`RecvError::Lagged(n)`**: subscriber fell behind by `n` events; keep reading.
//! - **`RecvError::Closed`**: every sender was dropped; the core shut down.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 128;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event enum encompassing all event categories.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Transport controller events
    Playback(PlaybackEvent),
    /// Progress durability events
    Sync(SyncEvent),
    /// Chapter resolution events
    Chapters(ChapterEvent),
    /// Remote playback session lifecycle
    Session(SessionEvent),
}

impl CoreEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Playback(e) => e.description(),
            CoreEvent::Sync(e) => e.description(),
            CoreEvent::Chapters(e) => e.description(),
            CoreEvent::Session(e) => e.description(),
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Playback(PlaybackEvent::LoadFailed { .. }) => EventSeverity::Error,
            CoreEvent::Playback(PlaybackEvent::Stuck { .. }) => EventSeverity::Warning,
            CoreEvent::Sync(SyncEvent::RetriesExhausted { .. }) => EventSeverity::Warning,
            CoreEvent::Sync(SyncEvent::FlushTimedOut { .. }) => EventSeverity::Warning,
            CoreEvent::Session(SessionEvent::CloseFailed { .. }) => EventSeverity::Warning,
            CoreEvent::Sync(SyncEvent::ConflictResolved { .. }) => EventSeverity::Info,
            CoreEvent::Playback(PlaybackEvent::Finished { .. }) => EventSeverity::Info,
            CoreEvent::Playback(PlaybackEvent::Loaded { .. }) => EventSeverity::Info,
            CoreEvent::Chapters(ChapterEvent::StaleCacheDetected { .. }) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

// ============================================================================
// Playback Events
// ============================================================================

/// Events emitted by the transport controller. Positions are global seconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event")]
pub enum PlaybackEvent {
    /// A book finished loading and is ready to play.
    Loaded {
        item_id: String,
        track_count: usize,
        duration: f64,
    },
    Started {
        item_id: String,
        position: f64,
    },
    Paused {
        item_id: String,
        position: f64,
    },
    /// Playback moved to another physical track.
    TrackChanged {
        item_id: String,
        from_index: usize,
        to_index: usize,
        /// Whether the preloaded player was swapped in.
        gapless: bool,
    },
    Seeked {
        item_id: String,
        position: f64,
    },
    /// Position stopped advancing while nominally playing.
    Stuck {
        item_id: String,
        position: f64,
    },
    /// Position advanced again after a stuck report.
    Recovered {
        item_id: String,
        position: f64,
    },
    /// The last track completed near the end of the book.
    Finished {
        item_id: String,
    },
    /// A track failed to load after its retry.
    LoadFailed {
        item_id: String,
        track_index: usize,
        message: String,
    },
    Unloaded {
        item_id: String,
    },
}

impl PlaybackEvent {
    fn description(&self) -> &str {
        match self {
            PlaybackEvent::Loaded { .. } => "Book loaded",
            PlaybackEvent::Started { .. } => "Playback started",
            PlaybackEvent::Paused { .. } => "Playback paused",
            PlaybackEvent::TrackChanged { .. } => "Track changed",
            PlaybackEvent::Seeked { .. } => "Seek completed",
            PlaybackEvent::Stuck { .. } => "Playback stuck",
            PlaybackEvent::Recovered { .. } => "Playback recovered",
            PlaybackEvent::Finished { .. } => "Book finished",
            PlaybackEvent::LoadFailed { .. } => "Track load failed",
            PlaybackEvent::Unloaded { .. } => "Book unloaded",
        }
    }
}

// ============================================================================
// Sync Events
// ============================================================================

/// Events emitted by the progress durability engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event")]
pub enum SyncEvent {
    /// A durable save was queued for upload.
    Enqueued {
        item_id: String,
        position: f64,
    },
    /// Progress reached the server.
    Uploaded {
        item_id: String,
        position: f64,
        /// `true` when the session sync call succeeded, `false` for the
        /// direct item-progress fallback.
        via_session: bool,
    },
    /// Server progress was newer than the pending local write.
    ConflictResolved {
        item_id: String,
        local_updated_at: i64,
        server_updated_at: i64,
        server_position: f64,
    },
    RetryScheduled {
        item_id: String,
        attempt: u32,
        delay_ms: u64,
    },
    /// Uploads gave up; progress stays saved locally and syncs later.
    RetriesExhausted {
        item_id: String,
        message: String,
    },
    /// The server no longer knows the item; the queued write was discarded.
    Dropped {
        item_id: String,
    },
    /// A background flush hit its deadline with items still pending.
    FlushTimedOut {
        pending: usize,
    },
}

impl SyncEvent {
    fn description(&self) -> &str {
        match self {
            SyncEvent::Enqueued { .. } => "Progress queued for sync",
            SyncEvent::Uploaded { .. } => "Progress synced",
            SyncEvent::ConflictResolved { .. } => "Server progress was newer",
            SyncEvent::RetryScheduled { .. } => "Progress sync retry scheduled",
            SyncEvent::RetriesExhausted { .. } => {
                "Progress saved locally, will sync later"
            }
            SyncEvent::Dropped { .. } => "Progress sync dropped for missing item",
            SyncEvent::FlushTimedOut { .. } => "Background flush timed out",
        }
    }
}

// ============================================================================
// Chapter Events
// ============================================================================

/// Events emitted by the chapter resolution chain.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum ChapterEvent {
    Resolved {
        item_id: String,
        /// `session`, `cache`, `metadata`, `server` or `none`.
        source: String,
        count: usize,
    },
    /// Cached chapters disagree with the session's chapters.
    StaleCacheDetected {
        item_id: String,
        cached_count: usize,
        fresh_count: usize,
    },
}

impl ChapterEvent {
    fn description(&self) -> &str {
        match self {
            ChapterEvent::Resolved { .. } => "Chapters resolved",
            ChapterEvent::StaleCacheDetected { .. } => "Cached chapters are stale",
        }
    }
}

// ============================================================================
// Session Events
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum SessionEvent {
    Opened { item_id: String, session_id: String },
    Closed { session_id: String },
    CloseFailed { session_id: String, message: String },
}

impl SessionEvent {
    fn description(&self) -> &str {
        match self {
            SessionEvent::Opened { .. } => "Playback session opened",
            SessionEvent::Closed { .. } => "Playback session closed",
            SessionEvent::CloseFailed { .. } => "Playback session close failed",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central broadcast channel for [`CoreEvent`]s. Cheap to clone.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a new event bus buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event, or an error
    /// if there are none.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Creates a new subscriber. Past events are not replayed.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// A wrapper around `broadcast::Receiver` with optional filtering.
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    /// Only events matching `predicate` will be returned.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    fn accepts(&self, event: &CoreEvent) -> bool {
        self.filter.as_ref().map_or(true, |f| f(event))
    }

    /// Receives the next event that passes the filter.
    ///
    /// # Errors
    ///
    /// Returns `RecvError::Lagged(n)` if the subscriber fell behind by `n` events.
    /// Returns `RecvError::Closed` if all senders have been dropped.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.accepts(&event) {
                return Ok(event);
            }
        }
    }

    /// Attempts to receive an event without waiting.
    ///
    /// Returns `None` if no matching events are currently available.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.accepts(&event) {
                        return Some(Ok(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn started(item: &str) -> CoreEvent {
        CoreEvent::Playback(PlaybackEvent::Started {
            item_id: item.to_string(),
            position: 12.5,
        })
    }

    #[tokio::test]
    async fn test_event_emission_no_subscribers() {
        let bus = EventBus::new(10);
        assert_eq!(bus.subscriber_count(), 0);
        assert!(bus.emit(started("li_1")).is_err());
    }

    #[tokio::test]
    async fn test_multiple_subscribers_receive_same_event() {
        let bus = EventBus::new(10);
        let mut sub1 = bus.subscribe();
        let mut sub2 = bus.subscribe();

        let event = CoreEvent::Sync(SyncEvent::Enqueued {
            item_id: "li_1".to_string(),
            position: 300.0,
        });

        assert_eq!(bus.emit(event.clone()).unwrap(), 2);
        assert_eq!(sub1.recv().await.unwrap(), event);
        assert_eq!(sub2.recv().await.unwrap(), event);
    }

    #[tokio::test]
    async fn test_event_stream_with_filter() {
        let bus = EventBus::new(10);
        let mut stream = EventStream::new(bus.subscribe())
            .filter(|event| matches!(event, CoreEvent::Chapters(_)));

        bus.emit(started("li_1")).ok();

        let chapters = CoreEvent::Chapters(ChapterEvent::Resolved {
            item_id: "li_1".to_string(),
            source: "cache".to_string(),
            count: 12,
        });
        bus.emit(chapters.clone()).ok();

        assert_eq!(stream.recv().await.unwrap(), chapters);
    }

    #[tokio::test]
    async fn test_lagged_subscriber() {
        let bus = EventBus::new(2);
        let mut sub = bus.subscribe();

        for i in 0..5 {
            bus.emit(CoreEvent::Sync(SyncEvent::RetryScheduled {
                item_id: "li_1".to_string(),
                attempt: i,
                delay_ms: 1000,
            }))
            .ok();
        }

        assert!(matches!(sub.recv().await, Err(RecvError::Lagged(_))));
    }

    #[test]
    fn test_event_severity() {
        let exhausted = CoreEvent::Sync(SyncEvent::RetriesExhausted {
            item_id: "li_1".to_string(),
            message: "HTTP 503".to_string(),
        });
        assert_eq!(exhausted.severity(), EventSeverity::Warning);
        assert_eq!(
            exhausted.description(),
            "Progress saved locally, will sync later"
        );

        let failed = CoreEvent::Playback(PlaybackEvent::LoadFailed {
            item_id: "li_1".to_string(),
            track_index: 2,
            message: "timeout".to_string(),
        });
        assert_eq!(failed.severity(), EventSeverity::Error);

        assert_eq!(started("li_1").severity(), EventSeverity::Debug);
    }

    #[tokio::test]
    async fn test_concurrent_publishers() {
        let bus = EventBus::new(100);
        let mut sub = bus.subscribe();

        let bus1 = bus.clone();
        let bus2 = bus.clone();

        let handle1 = tokio::spawn(async move {
            for i in 0..10 {
                bus1.emit(CoreEvent::Playback(PlaybackEvent::Seeked {
                    item_id: "li_1".to_string(),
                    position: i as f64,
                }))
                .ok();
            }
        });

        let handle2 = tokio::spawn(async move {
            for _ in 0..10 {
                bus2.emit(CoreEvent::Sync(SyncEvent::Dropped {
                    item_id: "li_2".to_string(),
                }))
                .ok();
            }
        });

        handle1.await.ok();
        handle2.await.ok();

        let mut count = 0;
        while sub.try_recv().is_ok() {
            count += 1;
        }
        assert_eq!(count, 20);
    }

    #[test]
    fn test_event_serialization() {
        let event = CoreEvent::Sync(SyncEvent::ConflictResolved {
            item_id: "li_9".to_string(),
            local_updated_at: 1_000,
            server_updated_at: 2_000,
            server_position: 812.25,
        });

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"Sync\""));
        assert!(json.contains("\"event\":\"ConflictResolved\""));

        let back: CoreEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }

    #[tokio::test]
    async fn test_try_recv_with_event() {
        let bus = EventBus::default();
        let mut stream = EventStream::new(bus.subscribe());
        assert!(stream.try_recv().is_none());

        bus.emit(started("li_3")).ok();

        let received = stream.try_recv().unwrap().unwrap();
        assert_eq!(received, started("li_3"));
    }
}
