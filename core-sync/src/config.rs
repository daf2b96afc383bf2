//! # Progress Sync Configuration

use crate::conflict_resolver::ConflictPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunables for the progress durability engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Quiet period after the last change before an item uploads.
    ///
    /// Default: 5 seconds.
    #[serde(default = "default_debounce")]
    pub debounce: Duration,

    /// An item never waits longer than this after its first unflushed change.
    ///
    /// Default: 30 seconds.
    #[serde(default = "default_max_delay")]
    pub max_delay: Duration,

    /// Backoff after the first failed upload. Doubles per retry.
    ///
    /// Default: 2 seconds.
    #[serde(default = "default_retry_base_delay")]
    pub retry_base_delay: Duration,

    /// Consecutive failed uploads before an item leaves the queue unsynced.
    ///
    /// Default: 3.
    #[serde(default = "default_max_failures")]
    pub max_failures: u32,

    /// Uploads allowed in flight at once.
    ///
    /// Default: 5.
    #[serde(default = "default_max_concurrent_uploads")]
    pub max_concurrent_uploads: usize,

    /// Deadline for the forced flush when the app leaves the foreground.
    ///
    /// Default: 4 seconds.
    #[serde(default = "default_background_flush_timeout")]
    pub background_flush_timeout: Duration,

    /// Upper bound on a single upload, including the fallback call.
    ///
    /// Default: 15 seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout: Duration,

    /// How often a deferred queue re-checks connectivity.
    ///
    /// Default: 15 seconds.
    #[serde(default = "default_offline_recheck")]
    pub offline_recheck: Duration,

    #[serde(default)]
    pub conflict_policy: ConflictPolicy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            debounce: default_debounce(),
            max_delay: default_max_delay(),
            retry_base_delay: default_retry_base_delay(),
            max_failures: default_max_failures(),
            max_concurrent_uploads: default_max_concurrent_uploads(),
            background_flush_timeout: default_background_flush_timeout(),
            request_timeout: default_request_timeout(),
            offline_recheck: default_offline_recheck(),
            conflict_policy: ConflictPolicy::default(),
        }
    }
}

impl SyncConfig {
    /// Uploads soon after every change. Suited to shared accounts where
    /// several devices play the same book.
    pub fn eager() -> Self {
        Self {
            debounce: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            conflict_policy: ConflictPolicy::PreReadCompare,
            ..Default::default()
        }
    }

    /// Batches uploads to keep the radio idle.
    pub fn battery_saver() -> Self {
        Self {
            debounce: Duration::from_secs(15),
            max_delay: Duration::from_secs(120),
            max_concurrent_uploads: 2,
            ..Default::default()
        }
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_delay < self.debounce {
            return Err("max_delay must be >= debounce".to_string());
        }

        if self.max_failures == 0 {
            return Err("max_failures must be > 0".to_string());
        }

        if self.retry_base_delay.is_zero() {
            return Err("retry_base_delay must be > 0".to_string());
        }

        if self.max_concurrent_uploads == 0 {
            return Err("max_concurrent_uploads must be > 0".to_string());
        }

        if self.background_flush_timeout.is_zero() {
            return Err("background_flush_timeout must be > 0".to_string());
        }

        if self.request_timeout.is_zero() {
            return Err("request_timeout must be > 0".to_string());
        }

        Ok(())
    }
}

// ============================================================================
// Default Functions (for serde)
// ============================================================================

fn default_debounce() -> Duration {
    Duration::from_secs(5)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_retry_base_delay() -> Duration {
    Duration::from_secs(2)
}

fn default_max_failures() -> u32 {
    3
}

fn default_max_concurrent_uploads() -> usize {
    5
}

fn default_background_flush_timeout() -> Duration {
    Duration::from_secs(4)
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(15)
}

fn default_offline_recheck() -> Duration {
    Duration::from_secs(15)
}
