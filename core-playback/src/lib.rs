//! # Playback Transport
//!
//! Turns an ordered list of physical audio files into one continuous
//! whole-book timeline.
//!
//! ## Overview
//!
//! This module handles:
//! - Translating global positions to `(track, local)` pairs
//! - A tagged transport state machine with guarded track switches
//! - Preloading the next file into a second player and swapping on advance
//! - Stuck detection and degraded status on load failures
//! - A polling loop that publishes [`PlaybackStatus`] on a watch channel

pub mod config;
pub mod controller;
pub mod error;
pub mod state;
pub mod stuck;
pub mod timeline;

pub use config::TransportConfig;
pub use controller::TransportController;
pub use error::{PlaybackError, Result};
pub use state::{PlaybackStatus, TransportState};
pub use stuck::{StuckDetector, StuckTransition};
pub use timeline::Timeline;
