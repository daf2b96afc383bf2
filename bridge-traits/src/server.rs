//! Remote Library Server Abstractions
//!
//! Contracts for the media server that owns playback sessions and the
//! canonical copy of listening progress. The core consumes only the fields
//! declared here; wire formats live in provider crates.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// One physical audio file of a book as described by a playback session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionTrack {
    pub index: usize,
    /// Offset of the first sample of this file on the whole-book timeline.
    pub start_offset: f64,
    pub duration: f64,
    pub content_url: String,
    pub mime_type: Option<String>,
}

/// Chapter marker as reported by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionChapter {
    pub id: String,
    pub start: f64,
    pub end: f64,
    pub title: String,
}

/// Playback session opened on the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackSession {
    pub id: String,
    pub item_id: String,
    pub tracks: Vec<SessionTrack>,
    pub chapters: Vec<SessionChapter>,
    /// Position the server believes playback should resume from.
    pub resume_position: f64,
}

impl PlaybackSession {
    /// Sum of all track durations.
    pub fn total_duration(&self) -> f64 {
        self.tracks.iter().map(|t| t.duration).sum()
    }
}

/// Server-side progress for a library item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteProgress {
    pub item_id: String,
    pub position: f64,
    pub duration: f64,
    /// Milliseconds since the Unix epoch.
    pub last_update: i64,
    pub is_finished: bool,
}

/// Idempotent progress write sent directly to the item, bypassing sessions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub position: f64,
    pub duration: f64,
    /// `position / duration`, clamped to `0.0..=1.0`.
    pub progress: f64,
    pub is_finished: bool,
}

impl ProgressUpdate {
    pub fn new(position: f64, duration: f64, is_finished: bool) -> Self {
        let progress = if duration > 0.0 {
            (position / duration).clamp(0.0, 1.0)
        } else {
            0.0
        };
        Self {
            position,
            duration,
            progress,
            is_finished,
        }
    }
}

/// Library item record as returned by a full item fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteItem {
    pub id: String,
    pub title: String,
    pub author: Option<String>,
    pub duration: f64,
    pub chapters: Vec<SessionChapter>,
}

/// Opens and closes remote playback sessions.
///
/// # Example
///
/// ```ignore
/// let session = negotiator.start_session("li_8x2k").await?;
/// negotiator.sync_session(&session.id, 120.0, 15.0).await?;
/// negotiator.close_session(&session.id, Some(135.0)).await?;
/// ```
#[async_trait]
pub trait SessionNegotiator: Send + Sync {
    /// Start a playback session for an item.
    async fn start_session(&self, item_id: &str) -> Result<PlaybackSession>;

    /// Report position for an open session.
    ///
    /// Returns [`BridgeError::NotFound`](crate::error::BridgeError::NotFound)
    /// once the server has discarded the session.
    async fn sync_session(&self, session_id: &str, position: f64, time_listened: f64)
        -> Result<()>;

    /// Close a session, optionally reporting a final position.
    async fn close_session(&self, session_id: &str, final_position: Option<f64>) -> Result<()>;
}

/// Direct access to per-item progress on the server.
#[async_trait]
pub trait ProgressRemote: Send + Sync {
    /// Fetch server progress. `Ok(None)` when the user never listened.
    async fn get_progress(&self, item_id: &str) -> Result<Option<RemoteProgress>>;

    /// Write progress for an item.
    async fn update_progress(&self, item_id: &str, update: &ProgressUpdate) -> Result<()>;
}

/// Fetches full library item records.
#[async_trait]
pub trait LibraryItemSource: Send + Sync {
    async fn fetch_item(&self, item_id: &str) -> Result<RemoteItem>;
}
