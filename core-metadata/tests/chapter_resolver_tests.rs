//! Integration tests for the chapter resolution chain

use async_trait::async_trait;
use bridge_traits::error::{BridgeError, Result as BridgeResult};
use bridge_traits::server::{LibraryItemSource, RemoteItem, SessionChapter};
use bridge_traits::time::ManualClock;
use core_library::db::create_test_pool;
use core_library::models::{BookMetadata, CachedChapters, Chapter, ChapterSource};
use core_library::repositories::{ChapterCacheRepository, SqliteChapterCacheRepository};
use core_library::{LibraryError, Result as LibraryResult};
use core_metadata::{ChapterConfig, ChapterResolver};
use core_runtime::events::{ChapterEvent, CoreEvent, EventBus};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const DAY_MS: i64 = 24 * 60 * 60 * 1000;
const NOW_MS: i64 = 1_700_000_000_000;

// ============================================================================
// Mocks
// ============================================================================

struct MockItemSource {
    chapters: Vec<SessionChapter>,
    fail: bool,
    calls: AtomicUsize,
}

impl MockItemSource {
    fn with_chapters(count: usize) -> Self {
        Self {
            chapters: (0..count)
                .map(|i| SessionChapter {
                    id: i.to_string(),
                    start: i as f64 * 100.0,
                    end: (i + 1) as f64 * 100.0,
                    title: format!("Remote {}", i + 1),
                })
                .collect(),
            fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    fn failing() -> Self {
        Self {
            chapters: Vec::new(),
            fail: true,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl LibraryItemSource for MockItemSource {
    async fn fetch_item(&self, item_id: &str) -> BridgeResult<RemoteItem> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(BridgeError::OperationFailed("HTTP 500 error".into()));
        }
        Ok(RemoteItem {
            id: item_id.to_string(),
            title: "Remote".into(),
            author: None,
            duration: self.chapters.len() as f64 * 100.0,
            chapters: self.chapters.clone(),
        })
    }
}

/// Cache that always fails; resolution must still succeed.
struct BrokenCache;

#[async_trait]
impl ChapterCacheRepository for BrokenCache {
    async fn get(&self, _item_id: &str) -> LibraryResult<Option<CachedChapters>> {
        Err(LibraryError::Migration("disk I/O error".into()))
    }

    async fn put(&self, _entry: &CachedChapters) -> LibraryResult<()> {
        Err(LibraryError::Migration("disk I/O error".into()))
    }

    async fn delete(&self, _item_id: &str) -> LibraryResult<bool> {
        Ok(false)
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn chapters(count: usize, length: f64) -> Vec<Chapter> {
    (0..count)
        .map(|i| {
            Chapter::new(
                i.to_string(),
                i as f64 * length,
                (i + 1) as f64 * length,
                format!("Chapter {}", i + 1),
            )
        })
        .collect()
}

fn book(item_id: &str, chapters: Vec<Chapter>) -> BookMetadata {
    BookMetadata {
        chapters,
        ..BookMetadata::untitled(item_id)
    }
}

struct Harness {
    resolver: ChapterResolver,
    cache: Arc<SqliteChapterCacheRepository>,
    clock: Arc<ManualClock>,
    events: EventBus,
}

async fn harness(item_source: Option<Arc<MockItemSource>>) -> Harness {
    let pool = create_test_pool().await.unwrap();
    let cache = Arc::new(SqliteChapterCacheRepository::new(pool));
    let clock = Arc::new(ManualClock::new(NOW_MS));
    let events = EventBus::new(32);

    let mut resolver = ChapterResolver::new(
        cache.clone(),
        clock.clone(),
        events.clone(),
        ChapterConfig::default(),
    );
    if let Some(source) = item_source {
        resolver = resolver.with_item_source(source);
    }

    Harness {
        resolver,
        cache,
        clock,
        events,
    }
}

fn resolved_sources(rx: &mut tokio::sync::broadcast::Receiver<CoreEvent>) -> Vec<String> {
    let mut sources = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let CoreEvent::Chapters(ChapterEvent::Resolved { source, .. }) = event {
            sources.push(source);
        }
    }
    sources
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_session_chapters_win_and_are_cached() {
    let h = harness(None).await;
    let mut rx = h.events.subscribe();
    let session = chapters(3, 600.0);

    let resolution = h
        .resolver
        .resolve(&book("li_1", chapters(1, 60.0)), Some(&session))
        .await;

    assert_eq!(resolution.source, Some(ChapterSource::Session));
    assert_eq!(resolution.chapters, session);

    h.resolver.wait_for_pending_writes().await;
    let cached = h.cache.get("li_1").await.unwrap().unwrap();
    assert_eq!(cached.chapters, session);
    assert_eq!(cached.cached_at, NOW_MS);

    assert_eq!(resolved_sources(&mut rx), vec!["session".to_string()]);
}

#[tokio::test]
async fn test_cache_used_when_session_has_no_chapters() {
    let h = harness(None).await;
    h.cache
        .put(&CachedChapters {
            item_id: "li_1".into(),
            chapters: chapters(4, 300.0),
            cached_at: NOW_MS - DAY_MS,
        })
        .await
        .unwrap();

    let resolution = h
        .resolver
        .resolve(&book("li_1", chapters(1, 60.0)), Some(&[]))
        .await;

    assert_eq!(resolution.source, Some(ChapterSource::Cache));
    assert_eq!(resolution.chapters.len(), 4);
}

#[tokio::test]
async fn test_expired_cache_falls_through_to_metadata() {
    let h = harness(None).await;
    h.cache
        .put(&CachedChapters {
            item_id: "li_1".into(),
            chapters: chapters(4, 300.0),
            cached_at: NOW_MS,
        })
        .await
        .unwrap();
    h.clock.advance_millis(8 * DAY_MS);

    let resolution = h
        .resolver
        .resolve(&book("li_1", chapters(2, 60.0)), None)
        .await;

    assert_eq!(resolution.source, Some(ChapterSource::Metadata));
    assert_eq!(resolution.chapters.len(), 2);

    // Metadata result replaces the expired entry
    h.resolver.wait_for_pending_writes().await;
    let cached = h.cache.get("li_1").await.unwrap().unwrap();
    assert_eq!(cached.chapters.len(), 2);
}

#[tokio::test]
async fn test_cached_chapters_are_sanitized() {
    let h = harness(None).await;
    h.cache
        .put(&CachedChapters {
            item_id: "li_1".into(),
            chapters: vec![
                Chapter::new("a", 0.0, 100.0, ""),
                Chapter::new("b", 50.0, 50.0, "broken"),
                Chapter::new("c", 100.0, 200.0, "Two"),
            ],
            cached_at: NOW_MS,
        })
        .await
        .unwrap();

    let resolution = h.resolver.resolve(&book("li_1", Vec::new()), None).await;

    assert_eq!(resolution.source, Some(ChapterSource::Cache));
    let titles: Vec<_> = resolution.chapters.iter().map(|c| c.title.as_str()).collect();
    assert_eq!(titles, vec!["Chapter 1", "Two"]);
}

#[tokio::test]
async fn test_server_fetched_only_when_local_sources_empty() {
    let source = Arc::new(MockItemSource::with_chapters(5));
    let h = harness(Some(source.clone())).await;

    let with_metadata = h
        .resolver
        .resolve(&book("li_1", chapters(2, 60.0)), None)
        .await;
    assert_eq!(with_metadata.source, Some(ChapterSource::Metadata));
    assert_eq!(source.calls.load(Ordering::SeqCst), 0);

    let remote = h.resolver.resolve(&book("li_2", Vec::new()), None).await;
    assert_eq!(remote.source, Some(ChapterSource::Server));
    assert_eq!(remote.chapters.len(), 5);
    assert_eq!(source.calls.load(Ordering::SeqCst), 1);

    h.resolver.wait_for_pending_writes().await;
    assert!(h.cache.get("li_2").await.unwrap().is_some());
}

#[tokio::test]
async fn test_exhausted_chain_returns_empty_without_error() {
    let source = Arc::new(MockItemSource::failing());
    let h = harness(Some(source.clone())).await;
    let mut rx = h.events.subscribe();

    let resolution = h.resolver.resolve(&book("li_1", Vec::new()), None).await;

    assert!(resolution.chapters.is_empty());
    assert_eq!(resolution.source, None);
    assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    assert_eq!(resolved_sources(&mut rx), vec!["none".to_string()]);
}

#[tokio::test]
async fn test_stale_cache_is_reported_and_replaced() {
    let h = harness(None).await;
    let mut rx = h.events.subscribe();
    h.cache
        .put(&CachedChapters {
            item_id: "li_1".into(),
            chapters: chapters(10, 60.0),
            cached_at: NOW_MS - DAY_MS,
        })
        .await
        .unwrap();

    let fresh = chapters(3, 600.0);
    h.resolver.resolve(&book("li_1", Vec::new()), Some(&fresh)).await;
    h.resolver.wait_for_pending_writes().await;

    let mut stale = None;
    while let Ok(event) = rx.try_recv() {
        if let CoreEvent::Chapters(ChapterEvent::StaleCacheDetected {
            cached_count,
            fresh_count,
            ..
        }) = event
        {
            stale = Some((cached_count, fresh_count));
        }
    }
    assert_eq!(stale, Some((10, 3)));
    assert_eq!(h.cache.get("li_1").await.unwrap().unwrap().chapters, fresh);
}

#[tokio::test]
async fn test_cache_failures_do_not_surface() {
    let resolver = ChapterResolver::new(
        Arc::new(BrokenCache),
        Arc::new(ManualClock::new(NOW_MS)),
        EventBus::new(8),
        ChapterConfig::default(),
    );

    let session = chapters(2, 60.0);
    let resolution = resolver.resolve(&book("li_1", Vec::new()), Some(&session)).await;
    assert_eq!(resolution.source, Some(ChapterSource::Session));

    let resolution = resolver.resolve(&book("li_1", chapters(1, 30.0)), None).await;
    assert_eq!(resolution.source, Some(ChapterSource::Metadata));

    resolver.wait_for_pending_writes().await;
}
