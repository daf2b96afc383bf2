//! # Core Configuration Module
//!
//! Builder-based configuration holding every host capability the audiobook
//! core needs, with fail-fast validation.
//!
//! ## Required Capabilities
//!
//! - Two `AudioPlayer` instances (active + preload)
//! - `SessionNegotiator` - opens playback sessions on the media server
//! - `ProgressRemote` - per-item progress read/write on the media server
//!
//! ## Optional Capabilities
//!
//! - `LibraryItemSource` - enables the one-shot chapter re-fetch
//! - `NetworkMonitor` - defers uploads while offline
//! - `LifecycleObserver` - background flush / foreground rescan
//! - `Clock` - defaults to [`SystemClock`]
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::CoreConfig;
//!
//! let config = CoreConfig::builder()
//!     .database_path("/data/audiobooks.db")
//!     .players(Arc::new(NativePlayer::new()), Arc::new(NativePlayer::new()))
//!     .session_negotiator(abs.clone())
//!     .progress_remote(abs.clone())
//!     .item_source(abs)
//!     .lifecycle_observer(lifecycle)
//!     .build()?;
//! ```
//!
//! Tunables for the transport, sync and chapter subsystems live next to the
//! code that uses them (`core_playback::TransportConfig`,
//! `core_sync::SyncConfig`, `core_metadata::ChapterConfig`).

use crate::error::{Error, Result};
use crate::events::DEFAULT_EVENT_BUFFER_SIZE;
use bridge_traits::{
    AudioPlayer, Clock, LibraryItemSource, LifecycleObserver, NetworkMonitor, ProgressRemote,
    SessionNegotiator, SystemClock,
};
use std::path::PathBuf;
use std::sync::Arc;

/// Core configuration for the audiobook core.
///
/// Use [`CoreConfigBuilder`] to construct instances.
#[derive(Clone)]
pub struct CoreConfig {
    /// SQLite database file, or `:memory:`
    pub database_path: PathBuf,

    /// Player that is audible
    pub primary_player: Arc<dyn AudioPlayer>,

    /// Player used to preload the next track
    pub preload_player: Arc<dyn AudioPlayer>,

    pub session_negotiator: Arc<dyn SessionNegotiator>,

    pub progress_remote: Arc<dyn ProgressRemote>,

    pub item_source: Option<Arc<dyn LibraryItemSource>>,

    pub network_monitor: Option<Arc<dyn NetworkMonitor>>,

    pub lifecycle_observer: Option<Arc<dyn LifecycleObserver>>,

    pub clock: Arc<dyn Clock>,

    /// Per-subscriber buffer of the event bus
    pub event_buffer_size: usize,
}

impl std::fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreConfig")
            .field("database_path", &self.database_path)
            .field("primary_player", &"AudioPlayer { ... }")
            .field("preload_player", &"AudioPlayer { ... }")
            .field("session_negotiator", &"SessionNegotiator { ... }")
            .field("progress_remote", &"ProgressRemote { ... }")
            .field(
                "item_source",
                &self.item_source.as_ref().map(|_| "LibraryItemSource { ... }"),
            )
            .field(
                "network_monitor",
                &self
                    .network_monitor
                    .as_ref()
                    .map(|_| "NetworkMonitor { ... }"),
            )
            .field(
                "lifecycle_observer",
                &self
                    .lifecycle_observer
                    .as_ref()
                    .map(|_| "LifecycleObserver { ... }"),
            )
            .field("event_buffer_size", &self.event_buffer_size)
            .finish()
    }
}

impl CoreConfig {
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// Validates the configuration and returns an error if invalid.
    pub fn validate(&self) -> Result<()> {
        if self.database_path.as_os_str().is_empty() {
            return Err(Error::Config("Database path cannot be empty".to_string()));
        }

        if self.event_buffer_size == 0 {
            return Err(Error::Config(
                "Event buffer size must be greater than 0".to_string(),
            ));
        }

        if Arc::ptr_eq(&self.primary_player, &self.preload_player) {
            return Err(Error::Config(
                "Primary and preload players must be distinct instances. \
                 Gapless playback needs a second player to prime the next track."
                    .to_string(),
            ));
        }

        Ok(())
    }
}

fn capability_missing(capability: &str, message: &str) -> Error {
    Error::CapabilityMissing {
        capability: capability.to_string(),
        message: message.to_string(),
    }
}

/// Builder for constructing [`CoreConfig`] instances.
#[derive(Default)]
pub struct CoreConfigBuilder {
    database_path: Option<PathBuf>,
    primary_player: Option<Arc<dyn AudioPlayer>>,
    preload_player: Option<Arc<dyn AudioPlayer>>,
    session_negotiator: Option<Arc<dyn SessionNegotiator>>,
    progress_remote: Option<Arc<dyn ProgressRemote>>,
    item_source: Option<Arc<dyn LibraryItemSource>>,
    network_monitor: Option<Arc<dyn NetworkMonitor>>,
    lifecycle_observer: Option<Arc<dyn LifecycleObserver>>,
    clock: Option<Arc<dyn Clock>>,
    event_buffer_size: Option<usize>,
}

impl CoreConfigBuilder {
    pub fn database_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.database_path = Some(path.into());
        self
    }

    /// Set both player instances. They must not be the same object.
    pub fn players(mut self, primary: Arc<dyn AudioPlayer>, preload: Arc<dyn AudioPlayer>) -> Self {
        self.primary_player = Some(primary);
        self.preload_player = Some(preload);
        self
    }

    pub fn session_negotiator(mut self, negotiator: Arc<dyn SessionNegotiator>) -> Self {
        self.session_negotiator = Some(negotiator);
        self
    }

    pub fn progress_remote(mut self, remote: Arc<dyn ProgressRemote>) -> Self {
        self.progress_remote = Some(remote);
        self
    }

    pub fn item_source(mut self, source: Arc<dyn LibraryItemSource>) -> Self {
        self.item_source = Some(source);
        self
    }

    pub fn network_monitor(mut self, monitor: Arc<dyn NetworkMonitor>) -> Self {
        self.network_monitor = Some(monitor);
        self
    }

    pub fn lifecycle_observer(mut self, observer: Arc<dyn LifecycleObserver>) -> Self {
        self.lifecycle_observer = Some(observer);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn event_buffer_size(mut self, size: usize) -> Self {
        self.event_buffer_size = Some(size);
        self
    }

    /// Builds the final `CoreConfig` instance.
    ///
    /// Fails with [`Error::CapabilityMissing`] naming the first absent
    /// required capability, or [`Error::Config`] for invalid values.
    pub fn build(self) -> Result<CoreConfig> {
        let database_path = self.database_path.ok_or_else(|| {
            Error::Config("Database path is required. Use .database_path() to set it.".to_string())
        })?;

        let (primary_player, preload_player) = match (self.primary_player, self.preload_player) {
            (Some(primary), Some(preload)) => (primary, preload),
            _ => {
                return Err(capability_missing(
                    "AudioPlayer",
                    "Two AudioPlayer instances are required for playback. \
                     Inject the platform audio engine adapter via .players().",
                ))
            }
        };

        let session_negotiator = self.session_negotiator.ok_or_else(|| {
            capability_missing(
                "SessionNegotiator",
                "A SessionNegotiator is required to open playback sessions. \
                 Use provider-audiobookshelf or inject a server adapter.",
            )
        })?;

        let progress_remote = self.progress_remote.ok_or_else(|| {
            capability_missing(
                "ProgressRemote",
                "A ProgressRemote is required to sync listening progress.",
            )
        })?;

        let config = CoreConfig {
            database_path,
            primary_player,
            preload_player,
            session_negotiator,
            progress_remote,
            item_source: self.item_source,
            network_monitor: self.network_monitor,
            lifecycle_observer: self.lifecycle_observer,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            event_buffer_size: self.event_buffer_size.unwrap_or(DEFAULT_EVENT_BUFFER_SIZE),
        };

        config.validate()?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::error::Result as BridgeResult;
    use bridge_traits::{
        PlaybackSession, PlayerStatus, ProgressUpdate, RemoteProgress, TrackSource,
    };

    struct NullPlayer;

    #[async_trait]
    impl AudioPlayer for NullPlayer {
        async fn load(&self, _source: &TrackSource) -> BridgeResult<Option<f64>> {
            Ok(Some(0.0))
        }
        async fn play(&self) -> BridgeResult<()> {
            Ok(())
        }
        async fn pause(&self) -> BridgeResult<()> {
            Ok(())
        }
        async fn stop(&self) -> BridgeResult<()> {
            Ok(())
        }
        async fn seek(&self, _position: f64) -> BridgeResult<()> {
            Ok(())
        }
        async fn set_rate(&self, _rate: f32) -> BridgeResult<()> {
            Ok(())
        }
        async fn status(&self) -> BridgeResult<PlayerStatus> {
            Ok(PlayerStatus::default())
        }
        async fn unload(&self) -> BridgeResult<()> {
            Ok(())
        }
    }

    struct NullServer;

    #[async_trait]
    impl SessionNegotiator for NullServer {
        async fn start_session(&self, item_id: &str) -> BridgeResult<PlaybackSession> {
            Ok(PlaybackSession {
                id: "ses".into(),
                item_id: item_id.into(),
                tracks: Vec::new(),
                chapters: Vec::new(),
                resume_position: 0.0,
            })
        }
        async fn sync_session(&self, _id: &str, _pos: f64, _listened: f64) -> BridgeResult<()> {
            Ok(())
        }
        async fn close_session(&self, _id: &str, _pos: Option<f64>) -> BridgeResult<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl ProgressRemote for NullServer {
        async fn get_progress(&self, _item_id: &str) -> BridgeResult<Option<RemoteProgress>> {
            Ok(None)
        }
        async fn update_progress(&self, _item_id: &str, _u: &ProgressUpdate) -> BridgeResult<()> {
            Ok(())
        }
    }

    fn complete_builder() -> CoreConfigBuilder {
        let server = Arc::new(NullServer);
        CoreConfig::builder()
            .database_path(":memory:")
            .players(Arc::new(NullPlayer), Arc::new(NullPlayer))
            .session_negotiator(server.clone())
            .progress_remote(server)
    }

    #[test]
    fn test_builder_with_all_required_fields() {
        let config = complete_builder().build().unwrap();
        assert_eq!(config.database_path, PathBuf::from(":memory:"));
        assert_eq!(config.event_buffer_size, DEFAULT_EVENT_BUFFER_SIZE);
        assert!(config.item_source.is_none());
        assert!(config.clock.unix_timestamp() > 0);
    }

    #[test]
    fn test_builder_requires_database_path() {
        let server = Arc::new(NullServer);
        let result = CoreConfig::builder()
            .players(Arc::new(NullPlayer), Arc::new(NullPlayer))
            .session_negotiator(server.clone())
            .progress_remote(server)
            .build();

        assert!(result
            .unwrap_err()
            .to_string()
            .contains("Database path is required"));
    }

    #[test]
    fn test_builder_requires_players() {
        let server = Arc::new(NullServer);
        let err = CoreConfig::builder()
            .database_path(":memory:")
            .session_negotiator(server.clone())
            .progress_remote(server)
            .build()
            .unwrap_err();

        assert!(matches!(
            err,
            Error::CapabilityMissing { ref capability, .. } if capability == "AudioPlayer"
        ));
    }

    #[test]
    fn test_builder_requires_session_negotiator() {
        let err = CoreConfig::builder()
            .database_path(":memory:")
            .players(Arc::new(NullPlayer), Arc::new(NullPlayer))
            .progress_remote(Arc::new(NullServer))
            .build()
            .unwrap_err();

        assert!(err.to_string().contains("SessionNegotiator"));
    }

    #[test]
    fn test_validate_rejects_shared_player() {
        let player: Arc<dyn AudioPlayer> = Arc::new(NullPlayer);
        let server = Arc::new(NullServer);
        let err = CoreConfig::builder()
            .database_path(":memory:")
            .players(player.clone(), player)
            .session_negotiator(server.clone())
            .progress_remote(server)
            .build()
            .unwrap_err();

        assert!(err.to_string().contains("distinct"));
    }

    #[test]
    fn test_validate_rejects_zero_event_buffer() {
        let err = complete_builder().event_buffer_size(0).build().unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_debug_hides_capabilities() {
        let config = complete_builder().build().unwrap();
        let debug = format!("{:?}", config);
        assert!(debug.contains("AudioPlayer { ... }"));
        assert!(debug.contains("item_source: None"));
    }
}
