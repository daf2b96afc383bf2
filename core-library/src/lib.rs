//! # Local Store
//!
//! Owns the on-device SQLite database that keeps listening progress and
//! cached chapter lists alive across restarts.
//!
//! ## Overview
//!
//! This module manages:
//! - SQLite connection pooling and embedded migrations
//! - Domain models shared by playback, chapter resolution and sync
//! - `ProgressRepository` with last-write-wins upserts
//! - `ChapterCacheRepository` for chapter fallback lists

pub mod db;
pub mod error;
pub mod models;
pub mod repositories;

pub use error::{LibraryError, Result};
pub use models::{BookMetadata, CachedChapters, Chapter, ChapterSource, ProgressRecord, Track};
