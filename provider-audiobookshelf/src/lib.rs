//! # Audiobookshelf Provider
//!
//! Media server adapter for Audiobookshelf-compatible servers.
//!
//! ## Overview
//!
//! This module provides:
//! - Playback sessions (`/api/items/{id}/play`, `/api/session/{id}/sync|close`)
//! - Per-user progress read and write (`/api/me/progress/{id}`)
//! - Expanded item records for the chapter re-fetch (`/api/items/{id}?expanded=1`)
//!
//! A 404 from any endpoint becomes `BridgeError::NotFound`, which the sync
//! engine treats as terminal. Reading progress that does not exist yet is
//! `Ok(None)` instead.

pub mod connector;
pub mod error;
pub mod types;

pub use connector::AudiobookshelfConnector;
pub use error::{ProviderError, Result};
