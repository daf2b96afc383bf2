//! # Playback Error Types

use bridge_traits::error::BridgeError;
use thiserror::Error;

/// Errors that can occur during transport operations.
#[derive(Error, Debug)]
pub enum PlaybackError {
    // ========================================================================
    // Input Errors
    // ========================================================================
    /// The track list cannot form a timeline.
    #[error("Invalid track list: {0}")]
    InvalidTracks(String),

    /// Seek target is not a finite number.
    #[error("Invalid position: {0}")]
    InvalidPosition(f64),

    /// Playback rate outside the configured range.
    #[error("Invalid playback rate: {0}")]
    InvalidRate(f32),

    /// Attempted operation when no book is loaded.
    #[error("No book loaded")]
    NoBookLoaded,

    // ========================================================================
    // Load Errors
    // ========================================================================
    /// A track failed to load after its retry.
    #[error("Track {track_index} failed to load: {message}")]
    LoadFailed { track_index: usize, message: String },

    /// A newer load or an unload replaced this operation.
    #[error("Operation superseded by a newer load")]
    Superseded,

    // ========================================================================
    // Platform Errors
    // ========================================================================
    /// The audio backend rejected a command.
    #[error("Audio player error: {0}")]
    Player(#[from] BridgeError),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl PlaybackError {
    /// Returns `true` if the operation was cancelled rather than failed.
    pub fn is_superseded(&self) -> bool {
        matches!(self, PlaybackError::Superseded)
    }
}

/// Result type for playback operations.
pub type Result<T> = std::result::Result<T, PlaybackError>;
