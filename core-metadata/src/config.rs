//! # Chapter Resolution Configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunables for the chapter resolution chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChapterConfig {
    /// Cached chapter lists older than this are ignored.
    ///
    /// Default: 7 days.
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl: Duration,

    /// Cached and fresh lists are stale when their counts differ by more
    /// than this.
    ///
    /// Default: 2.
    #[serde(default = "default_stale_count_delta")]
    pub stale_count_delta: usize,

    /// Cached and fresh lists are stale when any paired boundary differs by
    /// more than this many seconds.
    ///
    /// Default: 1.0.
    #[serde(default = "default_stale_boundary_secs")]
    pub stale_boundary_secs: f64,

    /// Upper bound on the remote item re-fetch.
    ///
    /// Default: 10 seconds.
    #[serde(default = "default_remote_fetch_timeout")]
    pub remote_fetch_timeout: Duration,
}

impl Default for ChapterConfig {
    fn default() -> Self {
        Self {
            cache_ttl: default_cache_ttl(),
            stale_count_delta: default_stale_count_delta(),
            stale_boundary_secs: default_stale_boundary_secs(),
            remote_fetch_timeout: default_remote_fetch_timeout(),
        }
    }
}

impl ChapterConfig {
    /// Keeps cached chapters for 30 days and waits longer on the server.
    ///
    /// Suited to listeners who are mostly offline.
    pub fn offline_first() -> Self {
        Self {
            cache_ttl: Duration::from_secs(30 * 24 * 60 * 60),
            remote_fetch_timeout: Duration::from_secs(20),
            ..Default::default()
        }
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.cache_ttl.is_zero() {
            return Err("cache_ttl must be > 0".to_string());
        }

        if !self.stale_boundary_secs.is_finite() || self.stale_boundary_secs < 0.0 {
            return Err("stale_boundary_secs must be a non-negative number".to_string());
        }

        if self.remote_fetch_timeout.is_zero() {
            return Err("remote_fetch_timeout must be > 0".to_string());
        }

        Ok(())
    }

    pub(crate) fn cache_ttl_millis(&self) -> i64 {
        i64::try_from(self.cache_ttl.as_millis()).unwrap_or(i64::MAX)
    }
}

// ============================================================================
// Default Functions (for serde)
// ============================================================================

fn default_cache_ttl() -> Duration {
    Duration::from_secs(7 * 24 * 60 * 60)
}

fn default_stale_count_delta() -> usize {
    2
}

fn default_stale_boundary_secs() -> f64 {
    1.0
}

fn default_remote_fetch_timeout() -> Duration {
    Duration::from_secs(10)
}
