//! Transport state machine and the status snapshot published to hosts.

use crate::timeline::Timeline;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

/// Status published on every poll and state change.
///
/// `position` and `duration` are whole-book seconds.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PlaybackStatus {
    pub is_playing: bool,
    pub position: f64,
    pub duration: f64,
    pub is_buffering: bool,
    /// True on the single status published when the book ends.
    pub did_just_finish: bool,
    pub is_stuck: bool,
}

/// Transport state for the loaded book.
///
/// ```text
/// Idle ──load──> Loading ──ready──> Paused <──> Playing ──last track──> Ended
///                                      │  ▲        │  ▲
///                                      ▼  │        ▼  │
///                              Scrubbing / Switching (guarded)
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum TransportState {
    Idle,
    Loading {
        load_id: u64,
    },
    /// A track boundary was crossed and the incoming track is not confirmed
    /// yet. Position reads return `cached_position`.
    Switching {
        from: usize,
        to: usize,
        cached_position: f64,
        started_at: Instant,
        resume_playing: bool,
    },
    /// The user is dragging the seek bar. Position reads return `target`.
    Scrubbing {
        target: f64,
        resume_playing: bool,
    },
    Playing,
    Paused,
    Ended,
}

/// Inputs for resolving the outward position in the current state.
pub struct PositionRead<'a> {
    pub timeline: &'a Timeline,
    pub track_index: usize,
    /// Fresh local position from the active player, if one was read.
    pub local: Option<f64>,
    /// Last position published.
    pub last_position: f64,
    pub now: Instant,
    pub switch_timeout: Duration,
}

impl TransportState {
    pub fn name(&self) -> &'static str {
        match self {
            TransportState::Idle => "idle",
            TransportState::Loading { .. } => "loading",
            TransportState::Switching { .. } => "switching",
            TransportState::Scrubbing { .. } => "scrubbing",
            TransportState::Playing => "playing",
            TransportState::Paused => "paused",
            TransportState::Ended => "ended",
        }
    }

    /// Whether audio is, or will be once the guarded step completes, playing.
    pub fn is_playing(&self) -> bool {
        match self {
            TransportState::Playing => true,
            TransportState::Switching { resume_playing, .. }
            | TransportState::Scrubbing { resume_playing, .. } => *resume_playing,
            _ => false,
        }
    }

    /// Whether a book is loaded and ready for commands.
    pub fn is_ready(&self) -> bool {
        !matches!(self, TransportState::Idle | TransportState::Loading { .. })
    }

    /// Resolve the global position to expose for this state.
    pub fn position(&self, read: &PositionRead<'_>) -> f64 {
        match self {
            TransportState::Idle => 0.0,
            TransportState::Loading { .. } => read.last_position,
            TransportState::Scrubbing { target, .. } => *target,
            TransportState::Ended => read.timeline.total_duration(),
            TransportState::Switching {
                to,
                cached_position,
                started_at,
                ..
            } => {
                let expired = read.now.saturating_duration_since(*started_at) > read.switch_timeout;
                match (expired, read.local, read.timeline.track(*to)) {
                    (true, Some(local), Some(track)) => {
                        track.start_offset + local.clamp(0.0, track.duration)
                    }
                    _ => *cached_position,
                }
            }
            TransportState::Playing | TransportState::Paused => match read.local {
                Some(local) => read.timeline.clamp(read.timeline.global(read.track_index, local)),
                None => read.last_position,
            },
        }
    }
}
