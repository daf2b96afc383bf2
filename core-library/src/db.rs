//! # Progress Store Connection
//!
//! SQLite pool for the on-device progress store. The store is small (one row
//! per book plus a chapter cache row) but written every second while a book
//! plays, so the options favour short write transactions:
//!
//! - WAL journal with `synchronous = NORMAL`
//! - a busy timeout instead of `SQLITE_BUSY` failures when the sync worker
//!   and the autosave task write at the same time
//! - embedded migrations applied on every open
//!
//! ```rust,ignore
//! let pool = create_pool(DatabaseConfig::new("audiobooks.db")).await?;
//! let progress = SqliteProgressRepository::new(pool.clone());
//! ```

use crate::{LibraryError, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

const IN_MEMORY_URL: &str = "sqlite::memory:";

/// Pool settings for the progress store
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// `sqlite:<path>` or `sqlite::memory:`
    pub database_url: String,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
    /// How long a connection waits on a locked database before failing
    pub busy_timeout: Duration,
    /// `None` keeps idle connections open
    pub idle_timeout: Option<Duration>,
    /// `None` never recycles a connection (required for in-memory databases)
    pub max_lifetime: Option<Duration>,
}

impl DatabaseConfig {
    /// File-backed store; the file is created on first open.
    pub fn new(database_path: impl AsRef<Path>) -> Self {
        Self {
            database_url: format!("sqlite:{}", database_path.as_ref().display()),
            max_connections: 4,
            acquire_timeout: Duration::from_secs(10),
            busy_timeout: Duration::from_secs(5),
            idle_timeout: Some(Duration::from_secs(300)),
            max_lifetime: Some(Duration::from_secs(1800)),
        }
    }

    /// Every SQLite connection to `:memory:` opens its own database, so the
    /// pool is pinned to a single connection that is never recycled.
    pub fn in_memory() -> Self {
        Self {
            database_url: IN_MEMORY_URL.to_string(),
            max_connections: 1,
            idle_timeout: None,
            max_lifetime: None,
            ..Self::new("")
        }
    }

    pub fn is_in_memory(&self) -> bool {
        self.database_url == IN_MEMORY_URL
    }

    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }
}

/// Open the pool, apply migrations and check the connection.
pub async fn create_pool(config: DatabaseConfig) -> Result<Pool<Sqlite>> {
    info!(
        database_url = %config.database_url,
        max_connections = config.max_connections,
        "Opening progress store"
    );

    let mut options = SqliteConnectOptions::from_str(&config.database_url)
        .map_err(LibraryError::Database)?
        .create_if_missing(true)
        .busy_timeout(config.busy_timeout)
        .pragma("cache_size", "-4000");
    if !config.is_in_memory() {
        options = options
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(config.acquire_timeout)
        .idle_timeout(config.idle_timeout)
        .max_lifetime(config.max_lifetime)
        .connect_with(options)
        .await
        .map_err(|e| {
            warn!(error = %e, "Failed to open progress store");
            LibraryError::Database(e)
        })?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| LibraryError::Migration(e.to_string()))?;

    sqlx::query("SELECT 1")
        .fetch_one(&pool)
        .await
        .map_err(LibraryError::Database)?;

    debug!("Progress store ready");
    Ok(pool)
}

/// In-memory store with migrations applied.
pub async fn create_test_pool() -> Result<Pool<Sqlite>> {
    create_pool(DatabaseConfig::in_memory()).await
}
