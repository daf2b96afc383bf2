//! # Engine Tuning
//!
//! Bundles the tunables of the three subsystems so a host can load them from
//! one settings document.
//!
//! ```json
//! {
//!   "transport": { "preload_remaining_secs": 45.0 },
//!   "sync": { "conflict_policy": "pre_read_compare" },
//!   "chapters": {}
//! }
//! ```

use core_metadata::ChapterConfig;
use core_playback::TransportConfig;
use core_sync::SyncConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EngineTuning {
    #[serde(default)]
    pub transport: TransportConfig,

    #[serde(default)]
    pub sync: SyncConfig,

    #[serde(default)]
    pub chapters: ChapterConfig,

    /// Minimum spacing of local saves while the status keeps changing.
    ///
    /// Default: 1 second.
    #[serde(default = "default_autosave_interval")]
    pub autosave_interval: Duration,
}

impl EngineTuning {
    /// Slower polling and fewer uploads.
    pub fn battery_saver() -> Self {
        Self {
            transport: TransportConfig::low_power(),
            sync: SyncConfig::battery_saver(),
            autosave_interval: Duration::from_secs(5),
            ..Default::default()
        }
    }

    /// Longer load waits, long-lived chapter cache.
    pub fn unreliable_network() -> Self {
        Self {
            transport: TransportConfig::slow_network(),
            chapters: ChapterConfig::offline_first(),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        self.transport
            .validate()
            .map_err(|e| format!("transport: {}", e))?;
        self.sync.validate().map_err(|e| format!("sync: {}", e))?;
        self.chapters
            .validate()
            .map_err(|e| format!("chapters: {}", e))?;

        if self.autosave_interval.is_zero() {
            return Err("autosave_interval must be greater than 0".to_string());
        }
        Ok(())
    }
}

// ============================================================================
// Default Functions (for serde)
// ============================================================================

fn default_autosave_interval() -> Duration {
    Duration::from_secs(1)
}
