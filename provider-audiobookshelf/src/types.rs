//! Audiobookshelf API wire types
//!
//! Only the fields the core consumes are modelled; unknown fields are
//! ignored.

use bridge_traits::server::{
    PlaybackSession, RemoteItem, RemoteProgress, SessionChapter, SessionTrack,
};
use serde::{Deserialize, Serialize};

/// Body of `POST /api/items/{id}/play`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayRequest {
    pub device_info: DeviceInfo,
    pub force_direct_play: bool,
    pub force_transcode: bool,
    pub supported_mime_types: Vec<String>,
    pub media_player: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub client_name: String,
    pub client_version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
}

/// Playback session as returned by the play endpoint
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AbsPlaybackSession {
    pub id: String,
    pub library_item_id: String,
    #[serde(default)]
    pub current_time: f64,
    #[serde(default)]
    pub audio_tracks: Vec<AbsAudioTrack>,
    #[serde(default)]
    pub chapters: Vec<AbsChapter>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AbsAudioTrack {
    pub index: usize,
    #[serde(default)]
    pub start_offset: f64,
    pub duration: f64,
    pub content_url: String,
    #[serde(default)]
    pub mime_type: Option<String>,
}

/// Chapter ids are numbers on the wire.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ChapterId {
    Number(i64),
    Text(String),
}

impl std::fmt::Display for ChapterId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChapterId::Number(n) => write!(f, "{}", n),
            ChapterId::Text(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AbsChapter {
    pub id: ChapterId,
    pub start: f64,
    pub end: f64,
    #[serde(default)]
    pub title: String,
}

/// Body of `POST /api/session/{id}/sync`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSyncRequest {
    pub current_time: f64,
    pub time_listened: f64,
}

/// Body of `POST /api/session/{id}/close`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionCloseRequest {
    pub current_time: f64,
}

/// `GET /api/me/progress/{id}`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaProgress {
    pub library_item_id: String,
    #[serde(default)]
    pub current_time: f64,
    #[serde(default)]
    pub duration: f64,
    #[serde(default)]
    pub is_finished: bool,
    /// Milliseconds since the Unix epoch
    pub last_update: i64,
}

/// Body of `PATCH /api/me/progress/{id}`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressPatch {
    pub current_time: f64,
    pub duration: f64,
    pub progress: f64,
    pub is_finished: bool,
}

/// `GET /api/items/{id}?expanded=1`
#[derive(Debug, Clone, Deserialize)]
pub struct LibraryItem {
    pub id: String,
    pub media: BookMedia,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BookMedia {
    #[serde(default)]
    pub metadata: BookMediaMetadata,
    #[serde(default)]
    pub duration: f64,
    #[serde(default)]
    pub chapters: Vec<AbsChapter>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookMediaMetadata {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub author_name: Option<String>,
}

// ============================================================================
// Conversions
// ============================================================================

impl From<AbsChapter> for SessionChapter {
    fn from(chapter: AbsChapter) -> Self {
        Self {
            id: chapter.id.to_string(),
            start: chapter.start,
            end: chapter.end,
            title: chapter.title,
        }
    }
}

impl AbsPlaybackSession {
    /// Convert, resolving relative content URLs with `resolve`.
    pub fn into_session(self, resolve: impl Fn(&str) -> String) -> PlaybackSession {
        let mut tracks: Vec<SessionTrack> = self
            .audio_tracks
            .into_iter()
            .map(|track| SessionTrack {
                index: track.index,
                start_offset: track.start_offset,
                duration: track.duration,
                content_url: resolve(&track.content_url),
                mime_type: track.mime_type,
            })
            .collect();
        tracks.sort_by(|a, b| a.start_offset.total_cmp(&b.start_offset));

        PlaybackSession {
            id: self.id,
            item_id: self.library_item_id,
            tracks,
            chapters: self.chapters.into_iter().map(SessionChapter::from).collect(),
            resume_position: self.current_time,
        }
    }
}

impl From<MediaProgress> for RemoteProgress {
    fn from(progress: MediaProgress) -> Self {
        Self {
            item_id: progress.library_item_id,
            position: progress.current_time,
            duration: progress.duration,
            last_update: progress.last_update,
            is_finished: progress.is_finished,
        }
    }
}

impl From<LibraryItem> for RemoteItem {
    fn from(item: LibraryItem) -> Self {
        Self {
            id: item.id,
            title: item.media.metadata.title.unwrap_or_default(),
            author: item.media.metadata.author_name,
            duration: item.media.duration,
            chapters: item
                .media
                .chapters
                .into_iter()
                .map(SessionChapter::from)
                .collect(),
        }
    }
}
