//! # Chapter Resolution
//!
//! Produces the chapter list shown for an open book.
//!
//! ## Overview
//!
//! Chapters are taken from the first source that yields any:
//! - The playback session (authoritative)
//! - The local chapter cache, within its TTL
//! - Last-known book metadata
//! - A one-shot re-fetch of the book record from the server
//!
//! Every list is sanitized so chapters never overlap and never have
//! `start >= end`. Resolution never fails; it degrades to an empty list.

pub mod chapter_resolver;
pub mod config;
pub mod error;

pub use chapter_resolver::{
    are_chapters_stale, chapter_at, sanitize_chapters, ChapterResolution, ChapterResolver,
};
pub use config::ChapterConfig;
pub use error::{MetadataError, Result};
