//! # Repository Pattern Implementation
//!
//! Repository traits and their SQLite implementations for the local store.
//!
//! ## Available Repositories
//!
//! - `ProgressRepository` - Listening progress with last-write-wins upserts
//! - `ChapterCacheRepository` - Fallback chapter lists keyed by book

pub mod chapters;
pub mod progress;

pub use chapters::{ChapterCacheRepository, SqliteChapterCacheRepository};
pub use progress::{ProgressRepository, SqliteProgressRepository};
