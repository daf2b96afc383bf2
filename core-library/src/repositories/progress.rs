//! Progress repository trait and implementation

use crate::error::{LibraryError, Result};
use crate::models::ProgressRecord;
use async_trait::async_trait;
use sqlx::{FromRow, SqlitePool};

// ============================================================================
// Repository Trait
// ============================================================================

/// Durable per-book progress store
///
/// Writes are last-write-wins on `local_updated_at`: a record older than the
/// stored one is ignored, never an error.
#[async_trait]
pub trait ProgressRepository: Send + Sync {
    /// Insert or replace the record for `record.item_id`
    ///
    /// # Returns
    /// - `Ok(true)` if the record was written
    /// - `Ok(false)` if a newer record is already stored
    ///
    /// # Errors
    /// Returns error if validation fails or a database error occurs
    async fn upsert(&self, record: &ProgressRecord) -> Result<bool>;

    /// Find the record for a book
    async fn find(&self, item_id: &str) -> Result<Option<ProgressRecord>>;

    /// All records not yet confirmed by the server, oldest first
    async fn find_unsynced(&self) -> Result<Vec<ProgressRecord>>;

    /// Mark a record synced if it still carries `local_updated_at`
    ///
    /// A newer local write that landed while the upload was in flight keeps
    /// the record unsynced.
    ///
    /// # Returns
    /// - `Ok(true)` if the record was marked
    /// - `Ok(false)` if it was missing or has moved on
    async fn mark_synced(&self, item_id: &str, local_updated_at: i64) -> Result<bool>;

    /// Delete the record for a book
    async fn delete(&self, item_id: &str) -> Result<bool>;
}

// ============================================================================
// SQLite Implementation
// ============================================================================

/// SQLite implementation of ProgressRepository
pub struct SqliteProgressRepository {
    pool: SqlitePool,
}

impl SqliteProgressRepository {
    /// Create a new SQLite progress repository
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

/// Database row representation of a progress record
#[derive(Debug, FromRow)]
struct ProgressRow {
    item_id: String,
    position: f64,
    duration: f64,
    local_updated_at: i64,
    synced: i64,
    is_finished: i64,
}

impl From<ProgressRow> for ProgressRecord {
    fn from(row: ProgressRow) -> Self {
        Self {
            item_id: row.item_id,
            position: row.position,
            duration: row.duration,
            local_updated_at: row.local_updated_at,
            synced: row.synced != 0,
            is_finished: row.is_finished != 0,
        }
    }
}

#[async_trait]
impl ProgressRepository for SqliteProgressRepository {
    async fn upsert(&self, record: &ProgressRecord) -> Result<bool> {
        record.validate().map_err(|e| LibraryError::InvalidInput {
            field: "ProgressRecord".to_string(),
            message: e,
        })?;

        let result = sqlx::query(
            r#"
            INSERT INTO progress (
                item_id, position, duration, local_updated_at, synced, is_finished
            ) VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(item_id) DO UPDATE SET
                position = excluded.position,
                duration = excluded.duration,
                local_updated_at = excluded.local_updated_at,
                synced = excluded.synced,
                is_finished = excluded.is_finished
            WHERE excluded.local_updated_at >= progress.local_updated_at
            "#,
        )
        .bind(&record.item_id)
        .bind(record.position)
        .bind(record.duration)
        .bind(record.local_updated_at)
        .bind(record.synced as i64)
        .bind(record.is_finished as i64)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn find(&self, item_id: &str) -> Result<Option<ProgressRecord>> {
        let row = sqlx::query_as::<_, ProgressRow>(
            r#"
            SELECT item_id, position, duration, local_updated_at, synced, is_finished
            FROM progress
            WHERE item_id = ?
            "#,
        )
        .bind(item_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(ProgressRecord::from))
    }

    async fn find_unsynced(&self) -> Result<Vec<ProgressRecord>> {
        let rows = sqlx::query_as::<_, ProgressRow>(
            r#"
            SELECT item_id, position, duration, local_updated_at, synced, is_finished
            FROM progress
            WHERE synced = 0
            ORDER BY local_updated_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(ProgressRecord::from).collect())
    }

    async fn mark_synced(&self, item_id: &str, local_updated_at: i64) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE progress SET synced = 1 WHERE item_id = ? AND local_updated_at = ?",
        )
        .bind(item_id)
        .bind(local_updated_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete(&self, item_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM progress WHERE item_id = ?")
            .bind(item_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
