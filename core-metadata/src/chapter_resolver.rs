//! # Chapter Resolution Chain
//!
//! Picks the chapter list for a book from the first source that has one.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐
//! │ ChapterResolver  │
//! └────────┬─────────┘
//!          │  1. session chapters  (authoritative, cached in background)
//!          │  2. chapter cache     (within TTL)
//!          │  3. book metadata
//!          │  4. LibraryItemSource (one re-fetch, only when 1-3 are empty)
//!          │
//!          ├──> ChapterCacheRepository (fire-and-forget write-back)
//!          └──> EventBus (Resolved / StaleCacheDetected)
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! let resolver = ChapterResolver::new(cache, clock, events, ChapterConfig::default())
//!     .with_item_source(server);
//!
//! let resolution = resolver.resolve(&book, Some(&session_chapters)).await;
//! let current = chapter_at(&resolution.chapters, status.position);
//! ```

use crate::config::ChapterConfig;
use crate::error::{MetadataError, Result};
use bridge_traits::server::LibraryItemSource;
use bridge_traits::time::Clock;
use core_library::models::{BookMetadata, CachedChapters, Chapter, ChapterSource};
use core_library::repositories::ChapterCacheRepository;
use core_runtime::events::{ChapterEvent, CoreEvent, EventBus};
use std::sync::Arc;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, instrument, warn};

// =============================================================================
// Pure helpers
// =============================================================================

/// Normalize a raw chapter list.
///
/// - drops entries with non-finite or negative bounds, or `start >= end`
/// - sorts by start
/// - trims an overlapping chapter to begin at the previous end, dropping it
///   if nothing is left
/// - titles blank chapters `Chapter N` and fills blank ids with `N`, where
///   `N` is the 1-based position in the result
pub fn sanitize_chapters(chapters: Vec<Chapter>) -> Vec<Chapter> {
    let mut valid: Vec<Chapter> = chapters
        .into_iter()
        .filter(|c| c.start.is_finite() && c.end.is_finite() && c.start >= 0.0 && c.start < c.end)
        .collect();
    valid.sort_by(|a, b| a.start.total_cmp(&b.start));

    let mut result: Vec<Chapter> = Vec::with_capacity(valid.len());
    for mut chapter in valid {
        if let Some(prev) = result.last() {
            if chapter.start < prev.end {
                chapter.start = prev.end;
            }
        }
        if chapter.start >= chapter.end {
            continue;
        }
        result.push(chapter);
    }

    for (i, chapter) in result.iter_mut().enumerate() {
        let number = i + 1;
        if chapter.title.trim().is_empty() {
            chapter.title = format!("Chapter {}", number);
        }
        if chapter.id.trim().is_empty() {
            chapter.id = number.to_string();
        }
    }

    result
}

/// Whether a cached chapter list disagrees with a fresh one.
///
/// True when the counts differ by more than 2, or any paired chapter start
/// or end differs by more than one second.
pub fn are_chapters_stale(cached: &[Chapter], fresh: &[Chapter]) -> bool {
    let config = ChapterConfig::default();
    stale_with(
        cached,
        fresh,
        config.stale_count_delta,
        config.stale_boundary_secs,
    )
}

fn stale_with(cached: &[Chapter], fresh: &[Chapter], count_delta: usize, boundary: f64) -> bool {
    if cached.len().abs_diff(fresh.len()) > count_delta {
        return true;
    }

    cached.iter().zip(fresh).any(|(old, new)| {
        (old.start - new.start).abs() > boundary || (old.end - new.end).abs() > boundary
    })
}

/// Index of the chapter containing `position`, if any.
///
/// `chapters` must be sorted and non-overlapping, as produced by
/// [`sanitize_chapters`].
pub fn chapter_at(chapters: &[Chapter], position: f64) -> Option<usize> {
    let idx = chapters.partition_point(|c| c.start <= position);
    if idx == 0 {
        return None;
    }
    let candidate = idx - 1;
    chapters[candidate].contains(position).then_some(candidate)
}

// =============================================================================
// Resolver
// =============================================================================

/// Result of a chapter resolution.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ChapterResolution {
    pub chapters: Vec<Chapter>,
    /// `None` when every source came up empty.
    pub source: Option<ChapterSource>,
}

impl ChapterResolution {
    fn empty() -> Self {
        Self::default()
    }

    fn found(chapters: Vec<Chapter>, source: ChapterSource) -> Self {
        Self {
            chapters,
            source: Some(source),
        }
    }
}

/// Resolves chapters for a book through the fallback chain.
pub struct ChapterResolver {
    cache: Arc<dyn ChapterCacheRepository>,
    item_source: Option<Arc<dyn LibraryItemSource>>,
    clock: Arc<dyn Clock>,
    events: EventBus,
    config: ChapterConfig,
    writes: TaskTracker,
}

impl ChapterResolver {
    pub fn new(
        cache: Arc<dyn ChapterCacheRepository>,
        clock: Arc<dyn Clock>,
        events: EventBus,
        config: ChapterConfig,
    ) -> Self {
        Self {
            cache,
            item_source: None,
            clock,
            events,
            config,
            writes: TaskTracker::new(),
        }
    }

    /// Enable the one-shot server re-fetch fallback.
    pub fn with_item_source(mut self, source: Arc<dyn LibraryItemSource>) -> Self {
        self.item_source = Some(source);
        self
    }

    pub fn config(&self) -> &ChapterConfig {
        &self.config
    }

    /// Resolve chapters for `book`.
    ///
    /// Never fails: errors from any source are logged and the next source
    /// is tried. Cache writes happen in the background.
    #[instrument(skip(self, book, session_chapters), fields(item_id = %book.item_id))]
    pub async fn resolve(
        &self,
        book: &BookMetadata,
        session_chapters: Option<&[Chapter]>,
    ) -> ChapterResolution {
        let item_id = book.item_id.as_str();

        // 1. Session
        if let Some(raw) = session_chapters {
            let chapters = sanitize_chapters(raw.to_vec());
            if !chapters.is_empty() {
                self.write_back(item_id, &chapters, true);
                return self.finish(item_id, ChapterResolution::found(chapters, ChapterSource::Session));
            }
        }

        // 2. Cache
        if let Some(chapters) = self.load_cached(item_id).await {
            return self.finish(item_id, ChapterResolution::found(chapters, ChapterSource::Cache));
        }

        // 3. Metadata
        let chapters = sanitize_chapters(book.chapters.clone());
        if !chapters.is_empty() {
            self.write_back(item_id, &chapters, false);
            return self.finish(item_id, ChapterResolution::found(chapters, ChapterSource::Metadata));
        }

        // 4. Server
        match self.fetch_remote(item_id).await {
            Ok(chapters) if !chapters.is_empty() => {
                self.write_back(item_id, &chapters, false);
                return self.finish(item_id, ChapterResolution::found(chapters, ChapterSource::Server));
            }
            Ok(_) => debug!(item_id, "Server record has no chapters"),
            Err(e) => warn!(item_id, error = %e, "Chapter re-fetch failed"),
        }

        self.finish(item_id, ChapterResolution::empty())
    }

    /// Wait until every background cache write issued so far has finished.
    pub async fn wait_for_pending_writes(&self) {
        self.writes.close();
        self.writes.wait().await;
        self.writes.reopen();
    }

    async fn load_cached(&self, item_id: &str) -> Option<Vec<Chapter>> {
        let entry = match self.cache.get(item_id).await {
            Ok(Some(entry)) => entry,
            Ok(None) => return None,
            Err(e) => {
                warn!(item_id, error = %e, "Failed to read chapter cache");
                return None;
            }
        };

        let age = entry.age_millis(self.clock.unix_timestamp_millis());
        if age > self.config.cache_ttl_millis() {
            debug!(item_id, age_ms = age, "Cached chapters expired");
            return None;
        }

        let chapters = sanitize_chapters(entry.chapters);
        (!chapters.is_empty()).then_some(chapters)
    }

    async fn fetch_remote(&self, item_id: &str) -> Result<Vec<Chapter>> {
        let source = self
            .item_source
            .as_ref()
            .ok_or_else(|| MetadataError::SourceUnavailable("no library item source".into()))?;

        let item = tokio::time::timeout(self.config.remote_fetch_timeout, source.fetch_item(item_id))
            .await
            .map_err(|_| MetadataError::Timeout(format!("fetch_item {}", item_id)))??;

        let book = BookMetadata::from(item);
        Ok(sanitize_chapters(book.chapters))
    }

    /// Persist `chapters` in the background.
    ///
    /// With `check_stale` the previous cache entry is compared first and a
    /// mismatch is reported before it is overwritten.
    fn write_back(&self, item_id: &str, chapters: &[Chapter], check_stale: bool) {
        let cache = Arc::clone(&self.cache);
        let events = self.events.clone();
        let entry = CachedChapters {
            item_id: item_id.to_string(),
            chapters: chapters.to_vec(),
            cached_at: self.clock.unix_timestamp_millis(),
        };
        let count_delta = self.config.stale_count_delta;
        let boundary = self.config.stale_boundary_secs;

        self.writes.spawn(async move {
            if check_stale {
                if let Ok(Some(previous)) = cache.get(&entry.item_id).await {
                    if !previous.chapters.is_empty()
                        && stale_with(&previous.chapters, &entry.chapters, count_delta, boundary)
                    {
                        info!(
                            item_id = %entry.item_id,
                            cached = previous.chapters.len(),
                            fresh = entry.chapters.len(),
                            "Replacing stale cached chapters"
                        );
                        let _ = events.emit(CoreEvent::Chapters(ChapterEvent::StaleCacheDetected {
                            item_id: entry.item_id.clone(),
                            cached_count: previous.chapters.len(),
                            fresh_count: entry.chapters.len(),
                        }));
                    }
                }
            }

            if let Err(e) = cache.put(&entry).await {
                warn!(item_id = %entry.item_id, error = %e, "Failed to cache chapters");
            }
        });
    }

    fn finish(&self, item_id: &str, resolution: ChapterResolution) -> ChapterResolution {
        let source = resolution.source.map(|s| s.as_str()).unwrap_or("none");
        debug!(item_id, source, count = resolution.chapters.len(), "Chapters resolved");

        let _ = self.events.emit(CoreEvent::Chapters(ChapterEvent::Resolved {
            item_id: item_id.to_string(),
            source: source.to_string(),
            count: resolution.chapters.len(),
        }));

        resolution
    }
}
