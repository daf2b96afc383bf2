//! Domain models for books, chapters and listening progress
//!
//! Positions and durations are seconds on the whole-book timeline.
//! Timestamps are milliseconds since the Unix epoch.

use bridge_traits::server::{RemoteItem, SessionChapter, SessionTrack};
use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// Tracks
// =============================================================================

/// One physical audio file of a loaded book
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub index: usize,
    /// Offset of this file on the whole-book timeline
    pub start_offset: f64,
    pub duration: f64,
    pub content_url: String,
    pub mime_type: Option<String>,
}

impl Track {
    /// Global position at which this track ends
    pub fn end_offset(&self) -> f64 {
        self.start_offset + self.duration
    }

    /// Validate track data
    pub fn validate(&self) -> Result<(), String> {
        if !self.start_offset.is_finite() || self.start_offset < 0.0 {
            return Err(format!(
                "Track {} has invalid start offset {}",
                self.index, self.start_offset
            ));
        }

        if !self.duration.is_finite() || self.duration < 0.0 {
            return Err(format!(
                "Track {} has invalid duration {}",
                self.index, self.duration
            ));
        }

        if self.content_url.trim().is_empty() {
            return Err(format!("Track {} has no content URL", self.index));
        }

        Ok(())
    }
}

impl From<SessionTrack> for Track {
    fn from(track: SessionTrack) -> Self {
        Self {
            index: track.index,
            start_offset: track.start_offset,
            duration: track.duration,
            content_url: track.content_url,
            mime_type: track.mime_type,
        }
    }
}

// =============================================================================
// Chapters
// =============================================================================

/// A titled span of the book timeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chapter {
    pub id: String,
    pub start: f64,
    pub end: f64,
    pub title: String,
}

impl Chapter {
    pub fn new(id: impl Into<String>, start: f64, end: f64, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            start,
            end,
            title: title.into(),
        }
    }

    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    /// Whether `position` falls inside `[start, end)`
    pub fn contains(&self, position: f64) -> bool {
        position >= self.start && position < self.end
    }
}

impl From<SessionChapter> for Chapter {
    fn from(chapter: SessionChapter) -> Self {
        Self {
            id: chapter.id,
            start: chapter.start,
            end: chapter.end,
            title: chapter.title,
        }
    }
}

/// Where a resolved chapter list came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChapterSource {
    Session,
    Cache,
    Metadata,
    Server,
}

impl ChapterSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChapterSource::Session => "session",
            ChapterSource::Cache => "cache",
            ChapterSource::Metadata => "metadata",
            ChapterSource::Server => "server",
        }
    }
}

impl fmt::Display for ChapterSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Chapter list stored in the local fallback cache
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedChapters {
    pub item_id: String,
    pub chapters: Vec<Chapter>,
    /// When the list was written, in ms since epoch
    pub cached_at: i64,
}

impl CachedChapters {
    /// Age of the entry relative to `now_ms`
    pub fn age_millis(&self, now_ms: i64) -> i64 {
        now_ms.saturating_sub(self.cached_at)
    }
}

// =============================================================================
// Book metadata
// =============================================================================

/// Last-known record of a book
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookMetadata {
    pub item_id: String,
    pub title: String,
    pub author: Option<String>,
    pub duration: f64,
    pub chapters: Vec<Chapter>,
}

impl BookMetadata {
    /// Minimal metadata for an item known only by id
    pub fn untitled(item_id: impl Into<String>) -> Self {
        Self {
            item_id: item_id.into(),
            title: String::new(),
            author: None,
            duration: 0.0,
            chapters: Vec::new(),
        }
    }
}

impl From<RemoteItem> for BookMetadata {
    fn from(item: RemoteItem) -> Self {
        Self {
            item_id: item.id,
            title: item.title,
            author: item.author,
            duration: item.duration,
            chapters: item.chapters.into_iter().map(Chapter::from).collect(),
        }
    }
}

// =============================================================================
// Progress
// =============================================================================

/// Durable listening progress for one book
///
/// `local_updated_at` is the conflict clock: a write only replaces a stored
/// record when its timestamp is not older.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressRecord {
    pub item_id: String,
    pub position: f64,
    pub duration: f64,
    pub local_updated_at: i64,
    pub synced: bool,
    pub is_finished: bool,
}

impl ProgressRecord {
    /// New unsynced record stamped at `now_ms`
    pub fn new(item_id: impl Into<String>, position: f64, duration: f64, now_ms: i64) -> Self {
        Self {
            item_id: item_id.into(),
            position,
            duration,
            local_updated_at: now_ms,
            synced: false,
            is_finished: false,
        }
    }

    pub fn finished(mut self, is_finished: bool) -> Self {
        self.is_finished = is_finished;
        self
    }

    /// Fraction listened, clamped to `0.0..=1.0`
    pub fn fraction(&self) -> f64 {
        if self.duration > 0.0 {
            (self.position / self.duration).clamp(0.0, 1.0)
        } else {
            0.0
        }
    }

    /// Validate progress data
    pub fn validate(&self) -> Result<(), String> {
        if self.item_id.trim().is_empty() {
            return Err("Progress item id cannot be empty".to_string());
        }

        if !self.position.is_finite() || self.position < 0.0 {
            return Err(format!("Invalid progress position {}", self.position));
        }

        if !self.duration.is_finite() || self.duration < 0.0 {
            return Err(format!("Invalid progress duration {}", self.duration));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_track_validation() {
        let track = Track {
            index: 0,
            start_offset: 0.0,
            duration: 600.0,
            content_url: "/file/0".to_string(),
            mime_type: None,
        };
        assert!(track.validate().is_ok());
        assert_eq!(track.end_offset(), 600.0);

        let bad = Track {
            duration: f64::NAN,
            ..track.clone()
        };
        assert!(bad.validate().is_err());

        let no_url = Track {
            content_url: " ".to_string(),
            ..track
        };
        assert!(no_url.validate().is_err());
    }

    #[test]
    fn test_chapter_contains_is_half_open() {
        let chapter = Chapter::new("1", 10.0, 20.0, "One");
        assert!(chapter.contains(10.0));
        assert!(chapter.contains(19.99));
        assert!(!chapter.contains(20.0));
        assert_eq!(chapter.duration(), 10.0);
    }

    #[test]
    fn test_progress_fraction() {
        let record = ProgressRecord::new("li_1", 300.0, 1200.0, 1_000);
        assert!((record.fraction() - 0.25).abs() < f64::EPSILON);
        assert!(!record.synced);

        let unknown = ProgressRecord::new("li_1", 300.0, 0.0, 1_000);
        assert_eq!(unknown.fraction(), 0.0);
    }

    #[test]
    fn test_progress_validation() {
        assert!(ProgressRecord::new("li_1", 1.0, 2.0, 0).validate().is_ok());
        assert!(ProgressRecord::new("", 1.0, 2.0, 0).validate().is_err());
        assert!(ProgressRecord::new("li_1", -1.0, 2.0, 0).validate().is_err());
    }

    #[test]
    fn test_remote_item_conversion() {
        let item = RemoteItem {
            id: "li_1".into(),
            title: "Dune".into(),
            author: Some("Frank Herbert".into()),
            duration: 3600.0,
            chapters: vec![SessionChapter {
                id: "0".into(),
                start: 0.0,
                end: 3600.0,
                title: "Book One".into(),
            }],
        };

        let book = BookMetadata::from(item);
        assert_eq!(book.item_id, "li_1");
        assert_eq!(book.chapters.len(), 1);
        assert_eq!(book.chapters[0].title, "Book One");
    }

    #[test]
    fn test_chapter_source_serializes_snake_case() {
        let json = serde_json::to_string(&ChapterSource::Metadata).unwrap();
        assert_eq!(json, "\"metadata\"");
        assert_eq!(ChapterSource::Session.to_string(), "session");
    }
}
