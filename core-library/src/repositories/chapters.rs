//! Chapter cache repository trait and implementation

use crate::error::Result;
use crate::models::{CachedChapters, Chapter};
use crate::LibraryError;
use async_trait::async_trait;
use sqlx::{FromRow, SqlitePool};

/// Fallback store for chapter lists, one entry per book
#[async_trait]
pub trait ChapterCacheRepository: Send + Sync {
    /// Cached chapters for a book, regardless of age
    async fn get(&self, item_id: &str) -> Result<Option<CachedChapters>>;

    /// Replace the cached chapters for a book
    async fn put(&self, entry: &CachedChapters) -> Result<()>;

    /// Drop the cached chapters for a book
    ///
    /// # Returns
    /// - `Ok(true)` if an entry was deleted
    /// - `Ok(false)` if nothing was cached
    async fn delete(&self, item_id: &str) -> Result<bool>;
}

/// SQLite implementation of ChapterCacheRepository
///
/// Chapters are stored as one JSON array per book.
pub struct SqliteChapterCacheRepository {
    pool: SqlitePool,
}

impl SqliteChapterCacheRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct ChapterCacheRow {
    item_id: String,
    chapters_json: String,
    cached_at: i64,
}

impl TryFrom<ChapterCacheRow> for CachedChapters {
    type Error = LibraryError;

    fn try_from(row: ChapterCacheRow) -> Result<Self> {
        let chapters: Vec<Chapter> = serde_json::from_str(&row.chapters_json)?;
        Ok(CachedChapters {
            item_id: row.item_id,
            chapters,
            cached_at: row.cached_at,
        })
    }
}

#[async_trait]
impl ChapterCacheRepository for SqliteChapterCacheRepository {
    async fn get(&self, item_id: &str) -> Result<Option<CachedChapters>> {
        let row = sqlx::query_as::<_, ChapterCacheRow>(
            "SELECT item_id, chapters_json, cached_at FROM chapter_cache WHERE item_id = ?",
        )
        .bind(item_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(CachedChapters::try_from).transpose()
    }

    async fn put(&self, entry: &CachedChapters) -> Result<()> {
        let json = serde_json::to_string(&entry.chapters)?;

        sqlx::query(
            r#"
            INSERT INTO chapter_cache (item_id, chapters_json, cached_at)
            VALUES (?, ?, ?)
            ON CONFLICT(item_id) DO UPDATE SET
                chapters_json = excluded.chapters_json,
                cached_at = excluded.cached_at
            "#,
        )
        .bind(&entry.item_id)
        .bind(json)
        .bind(entry.cached_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete(&self, item_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM chapter_cache WHERE item_id = ?")
            .bind(item_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_test_pool;

    fn entry(item_id: &str, cached_at: i64) -> CachedChapters {
        CachedChapters {
            item_id: item_id.to_string(),
            chapters: vec![
                Chapter::new("0", 0.0, 600.0, "Opening Credits"),
                Chapter::new("1", 600.0, 1800.0, "Chapter 1"),
            ],
            cached_at,
        }
    }

    #[tokio::test]
    async fn test_put_and_get() {
        let repo = SqliteChapterCacheRepository::new(create_test_pool().await.unwrap());
        repo.put(&entry("li_1", 1_000)).await.unwrap();

        let cached = repo.get("li_1").await.unwrap().unwrap();
        assert_eq!(cached, entry("li_1", 1_000));
        assert!(repo.get("li_2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_put_replaces_existing_entry() {
        let repo = SqliteChapterCacheRepository::new(create_test_pool().await.unwrap());
        repo.put(&entry("li_1", 1_000)).await.unwrap();

        let mut newer = entry("li_1", 2_000);
        newer.chapters.truncate(1);
        repo.put(&newer).await.unwrap();

        let cached = repo.get("li_1").await.unwrap().unwrap();
        assert_eq!(cached.chapters.len(), 1);
        assert_eq!(cached.cached_at, 2_000);
    }

    #[tokio::test]
    async fn test_corrupt_json_surfaces_serialization_error() {
        let pool = create_test_pool().await.unwrap();
        sqlx::query("INSERT INTO chapter_cache (item_id, chapters_json, cached_at) VALUES ('li_1', 'not json', 0)")
            .execute(&pool)
            .await
            .unwrap();

        let repo = SqliteChapterCacheRepository::new(pool);
        let result = repo.get("li_1").await;
        assert!(matches!(result, Err(LibraryError::Serialization(_))));
    }

    #[tokio::test]
    async fn test_delete() {
        let repo = SqliteChapterCacheRepository::new(create_test_pool().await.unwrap());
        repo.put(&entry("li_1", 1_000)).await.unwrap();

        assert!(repo.delete("li_1").await.unwrap());
        assert!(repo.get("li_1").await.unwrap().is_none());
    }
}
