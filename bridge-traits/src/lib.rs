//! # Host Bridge Traits
//!
//! Capability contracts between the audiobook core and the host platform.
//!
//! ## Overview
//!
//! The core never talks to an audio engine, a media server or the OS
//! directly. Each capability it needs is a trait here, implemented once per
//! platform (desktop adapters live in `bridge-desktop`, server adapters in
//! provider crates) and injected through `core_runtime::config::CoreConfig`.
//!
//! ## Traits
//!
//! ### Playback
//! - [`AudioPlayer`](playback::AudioPlayer) - One native player instance (the core owns two)
//! - [`PositionSampler`](playback::PositionSampler) - Optional high-resolution position capability
//!
//! ### Media Server
//! - [`SessionNegotiator`](server::SessionNegotiator) - Open, sync and close playback sessions
//! - [`ProgressRemote`](server::ProgressRemote) - Per-item progress read/write
//! - [`LibraryItemSource`](server::LibraryItemSource) - Full item records (chapter re-fetch)
//! - [`HttpClient`](http::HttpClient) - Transport used by provider crates
//!
//! ### Platform Integration
//! - [`NetworkMonitor`](network::NetworkMonitor) - Connectivity for deferring uploads
//! - [`LifecycleObserver`](background::LifecycleObserver) - Foreground/background transitions
//!
//! ### Utilities
//! - [`Clock`](time::Clock) - Wall clock for persisted timestamps
//! - [`LoggerSink`](time::LoggerSink) - Forward structured logs to host logging
//!
//! ## Error Handling
//!
//! All bridge traits use [`BridgeError`](error::BridgeError). A server that no
//! longer knows a session or item must answer with
//! [`BridgeError::NotFound`](error::BridgeError::NotFound): the durability
//! engine treats it as terminal and stops retrying.
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` so they can be shared across the
//! controller's poll task and the sync worker.

pub mod background;
pub mod error;
pub mod http;
pub mod network;
pub mod playback;
pub mod server;
pub mod time;

pub use error::BridgeError;

// Re-export commonly used types
pub use background::{LifecycleChangeStream, LifecycleObserver, LifecycleState};
pub use http::{HttpClient, HttpMethod, HttpRequest, HttpResponse};
pub use network::{NetworkInfo, NetworkMonitor, NetworkStatus, NetworkType};
pub use playback::{AudioPlayer, PlayerStatus, PositionSampler, TrackSource};
pub use server::{
    LibraryItemSource, PlaybackSession, ProgressRemote, ProgressUpdate, RemoteItem,
    RemoteProgress, SessionChapter, SessionNegotiator, SessionTrack,
};
pub use time::{Clock, LogEntry, LogLevel, LoggerSink, ManualClock, SystemClock};
