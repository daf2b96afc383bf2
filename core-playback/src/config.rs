//! # Transport Configuration
//!
//! Tunables for the transport controller. Positions and thresholds on the
//! book timeline are seconds as `f64`; wall-clock intervals are `Duration`s.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Transport controller configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Remaining time in the current track below which the next track is
    /// loaded into the standby player.
    ///
    /// Default: 30 seconds.
    #[serde(default = "default_preload_remaining_secs")]
    pub preload_remaining_secs: f64,

    /// Seek targets this close to a track end land on the next track start.
    ///
    /// Default: 0.5 seconds.
    #[serde(default = "default_snap_threshold_secs")]
    pub snap_threshold_secs: f64,

    /// The book only counts as finished when the last track completes this
    /// close to the total duration.
    ///
    /// Default: 5 seconds.
    #[serde(default = "default_end_tolerance_secs")]
    pub end_tolerance_secs: f64,

    /// Longest time a track switch may hide the player position.
    ///
    /// Default: 1.5 seconds.
    #[serde(default = "default_switch_timeout")]
    pub switch_timeout: Duration,

    /// Quiet period after a scrub ends before a cross-track seek runs.
    ///
    /// Default: 150 ms.
    #[serde(default = "default_scrub_debounce")]
    pub scrub_debounce: Duration,

    /// How long the position may stay put while playing before the
    /// transport reports itself stuck.
    ///
    /// Default: 5 seconds.
    #[serde(default = "default_stuck_window")]
    pub stuck_window: Duration,

    /// Movement below this does not count as progress for stuck detection.
    ///
    /// Default: 0.5 seconds.
    #[serde(default = "default_stuck_min_movement_secs")]
    pub stuck_min_movement_secs: f64,

    /// Poll interval while playing.
    ///
    /// Default: 100 ms.
    #[serde(default = "default_poll_interval_playing")]
    pub poll_interval_playing: Duration,

    /// Poll interval while paused or idle.
    ///
    /// Default: 2 seconds.
    #[serde(default = "default_poll_interval_paused")]
    pub poll_interval_paused: Duration,

    /// Bounded wait for a player to report a duration after `load`.
    ///
    /// Default: 10 seconds.
    #[serde(default = "default_load_timeout")]
    pub load_timeout: Duration,

    /// Lowest accepted playback rate.
    ///
    /// Default: 0.5.
    #[serde(default = "default_min_rate")]
    pub min_rate: f32,

    /// Highest accepted playback rate.
    ///
    /// Default: 3.0.
    #[serde(default = "default_max_rate")]
    pub max_rate: f32,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            preload_remaining_secs: default_preload_remaining_secs(),
            snap_threshold_secs: default_snap_threshold_secs(),
            end_tolerance_secs: default_end_tolerance_secs(),
            switch_timeout: default_switch_timeout(),
            scrub_debounce: default_scrub_debounce(),
            stuck_window: default_stuck_window(),
            stuck_min_movement_secs: default_stuck_min_movement_secs(),
            poll_interval_playing: default_poll_interval_playing(),
            poll_interval_paused: default_poll_interval_paused(),
            load_timeout: default_load_timeout(),
            min_rate: default_min_rate(),
            max_rate: default_max_rate(),
        }
    }
}

impl TransportConfig {
    /// Slower polling for battery-constrained hosts.
    ///
    /// - 250 ms poll while playing, 5 s while paused
    /// - Preload a minute ahead to absorb slow wake-ups
    pub fn low_power() -> Self {
        Self {
            poll_interval_playing: Duration::from_millis(250),
            poll_interval_paused: Duration::from_secs(5),
            preload_remaining_secs: 60.0,
            ..Default::default()
        }
    }

    /// Tolerant timeouts for slow or lossy networks.
    ///
    /// - 30 s load timeout
    /// - 10 s stuck window
    pub fn slow_network() -> Self {
        Self {
            load_timeout: Duration::from_secs(30),
            stuck_window: Duration::from_secs(10),
            preload_remaining_secs: 90.0,
            ..Default::default()
        }
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        let non_negative = [
            ("preload_remaining_secs", self.preload_remaining_secs),
            ("snap_threshold_secs", self.snap_threshold_secs),
            ("end_tolerance_secs", self.end_tolerance_secs),
            ("stuck_min_movement_secs", self.stuck_min_movement_secs),
        ];
        for (name, value) in non_negative {
            if !value.is_finite() || value < 0.0 {
                return Err(format!("{} must be a non-negative number", name));
            }
        }

        if self.poll_interval_playing.is_zero() || self.poll_interval_paused.is_zero() {
            return Err("poll intervals must be > 0".to_string());
        }

        if self.load_timeout.is_zero() {
            return Err("load_timeout must be > 0".to_string());
        }

        if self.stuck_window <= self.poll_interval_playing {
            return Err("stuck_window must be longer than poll_interval_playing".to_string());
        }

        if !(self.min_rate > 0.0 && self.min_rate <= self.max_rate && self.max_rate.is_finite()) {
            return Err("rates must satisfy 0 < min_rate <= max_rate".to_string());
        }

        Ok(())
    }

    /// Poll interval for the given play state.
    pub fn poll_interval(&self, playing: bool) -> Duration {
        if playing {
            self.poll_interval_playing
        } else {
            self.poll_interval_paused
        }
    }
}

// ============================================================================
// Default Functions (for serde)
// ============================================================================

fn default_preload_remaining_secs() -> f64 {
    30.0
}

fn default_snap_threshold_secs() -> f64 {
    0.5
}

fn default_end_tolerance_secs() -> f64 {
    5.0
}

fn default_switch_timeout() -> Duration {
    Duration::from_millis(1500)
}

fn default_scrub_debounce() -> Duration {
    Duration::from_millis(150)
}

fn default_stuck_window() -> Duration {
    Duration::from_secs(5)
}

fn default_stuck_min_movement_secs() -> f64 {
    0.5
}

fn default_poll_interval_playing() -> Duration {
    Duration::from_millis(100)
}

fn default_poll_interval_paused() -> Duration {
    Duration::from_secs(2)
}

fn default_load_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_min_rate() -> f32 {
    0.5
}

fn default_max_rate() -> f32 {
    3.0
}
