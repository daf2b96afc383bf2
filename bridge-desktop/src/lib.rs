//! # Desktop Bridge Implementations
//!
//! Default implementations of bridge traits for desktop platforms
//! (macOS, Windows, Linux).
//!
//! - `HttpClient` using `reqwest`, used by the Audiobookshelf provider
//! - `NetworkMonitor` probing the media server over TCP
//! - `LifecycleObserver` fed by the host window loop
//!
//! Audio playback is not provided here: hosts inject their own
//! `AudioPlayer` implementations (rodio, GStreamer, a webview).
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{DesktopLifecycleObserver, DesktopNetworkMonitor, ReqwestHttpClient};
//!
//! let http = Arc::new(ReqwestHttpClient::new()?);
//! let network = Arc::new(DesktopNetworkMonitor::new("abs.local:13378"));
//! let lifecycle = Arc::new(DesktopLifecycleObserver::new());
//! ```

mod http;
mod lifecycle;
mod network;

pub use http::ReqwestHttpClient;
pub use lifecycle::DesktopLifecycleObserver;
pub use network::DesktopNetworkMonitor;
