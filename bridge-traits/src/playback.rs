//! Playback bridge traits and supporting audio types.
//!
//! These abstractions let the transport controller drive a platform audio
//! engine (AVPlayer, ExoPlayer, rodio, an HTML media element) without knowing
//! which one is behind the trait object. The controller owns two instances of
//! [`AudioPlayer`], one active and one used for preloading the next track.
//!
//! All positions and durations are expressed in seconds as `f64`, local to
//! the file currently loaded in that player instance.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;

/// Descriptor for a single physical audio file handed to a player.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TrackSource {
    /// Fully-qualified content URL (local `file://` or remote `https://`).
    pub url: String,
    /// MIME type, when the server reported one.
    pub mime_type: Option<String>,
    /// Extra request headers (authorization, range hints).
    pub headers: HashMap<String, String>,
}

impl TrackSource {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            mime_type: None,
            headers: HashMap::new(),
        }
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }
}

/// Snapshot of a player's state as reported by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PlayerStatus {
    /// Position within the loaded file, in seconds.
    pub position: f64,
    /// Duration of the loaded file, once known.
    pub duration: Option<f64>,
    pub is_playing: bool,
    pub is_buffering: bool,
    /// Set on the first status read after the file played to its end.
    pub did_just_finish: bool,
}

/// Trait for platform audio engines driven by the transport controller.
///
/// Implementations wrap exactly one native player instance. The controller
/// never drives two instances concurrently: the outgoing instance is always
/// stopped before the other one starts.
#[async_trait]
pub trait AudioPlayer: Send + Sync {
    /// Load a file and return its duration in seconds once the backend knows it.
    ///
    /// Returning `Ok(None)` means the file opened but no duration was
    /// reported; the controller treats that like a timed-out load.
    async fn load(&self, source: &TrackSource) -> Result<Option<f64>>;

    /// Begin or resume playback.
    async fn play(&self) -> Result<()>;

    /// Pause playback without releasing the loaded file.
    async fn pause(&self) -> Result<()>;

    /// Stop playback. The loaded file may be kept for a later `play`.
    async fn stop(&self) -> Result<()>;

    /// Seek to an absolute position within the loaded file.
    async fn seek(&self, position: f64) -> Result<()>;

    /// Set the playback rate (1.0 = normal speed).
    async fn set_rate(&self, rate: f32) -> Result<()>;

    /// Read the current backend status.
    async fn status(&self) -> Result<PlayerStatus>;

    /// Release the loaded file and any native resources tied to it.
    async fn unload(&self) -> Result<()>;

    /// Optional high-resolution position capability.
    ///
    /// Queried once when the controller is constructed. Backends that can read
    /// the render clock directly return `Some`, and the controller prefers it
    /// over the position in [`AudioPlayer::status`].
    fn position_sampler(self: Arc<Self>) -> Option<Arc<dyn PositionSampler>> {
        None
    }
}

/// Synchronous position source exposed by some audio backends.
pub trait PositionSampler: Send + Sync {
    /// Current position within the loaded file, in seconds.
    fn sample_position(&self) -> f64;
}
