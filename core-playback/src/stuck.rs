//! Detects playback that claims to be playing but does not advance.

use std::time::Duration;
use tokio::time::Instant;

/// Outcome of one observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StuckTransition {
    None,
    /// Position has not moved for longer than the window. Reported once.
    Raised,
    /// Position moved again, or playback was paused, after a raise.
    Cleared,
}

/// Tracks the last position that counted as movement.
#[derive(Debug, Clone)]
pub struct StuckDetector {
    window: Duration,
    min_movement: f64,
    anchor: Option<(Instant, f64)>,
    stuck: bool,
}

impl StuckDetector {
    pub fn new(window: Duration, min_movement: f64) -> Self {
        Self {
            window,
            min_movement,
            anchor: None,
            stuck: false,
        }
    }

    pub fn is_stuck(&self) -> bool {
        self.stuck
    }

    /// Forget the anchor, e.g. after a seek or a track switch.
    ///
    /// An active stuck flag is kept until movement or a pause clears it.
    pub fn reset(&mut self) {
        self.anchor = None;
    }

    /// Feed one position sample.
    ///
    /// Buffering restarts the window but keeps a raised flag, so a stream
    /// that alternates between buffering and stalling is reported once.
    pub fn observe(
        &mut self,
        now: Instant,
        position: f64,
        playing: bool,
        buffering: bool,
    ) -> StuckTransition {
        if !playing {
            self.anchor = None;
            return self.clear();
        }
        if buffering {
            self.anchor = None;
            return StuckTransition::None;
        }

        let Some((since, anchor_position)) = self.anchor else {
            self.anchor = Some((now, position));
            return StuckTransition::None;
        };

        if (position - anchor_position).abs() >= self.min_movement {
            self.anchor = Some((now, position));
            return self.clear();
        }

        if !self.stuck && now.saturating_duration_since(since) > self.window {
            self.stuck = true;
            return StuckTransition::Raised;
        }

        StuckTransition::None
    }

    fn clear(&mut self) -> StuckTransition {
        if self.stuck {
            self.stuck = false;
            StuckTransition::Cleared
        } else {
            StuckTransition::None
        }
    }
}
