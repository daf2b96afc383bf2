//! Core service façade and bootstrap helpers.
//!
//! [`AudiobookCore`] is what hosts talk to: it opens books, passes transport
//! commands through, autosaves progress and reacts to lifecycle changes.
//! Desktop apps typically enable the `desktop-shims` feature and build their
//! configuration with [`desktop_config`], which connects to an Audiobookshelf
//! server over `reqwest`.

mod autosave;
pub mod error;
pub mod service;
pub mod tuning;

pub use error::{CoreError, Result};
pub use service::{AudiobookCore, OpenedBook, ResumeSource};
pub use tuning::EngineTuning;

#[cfg(feature = "desktop-shims")]
pub use desktop::{desktop_config, DesktopHandles};

#[cfg(feature = "desktop-shims")]
mod desktop {
    use crate::error::{CoreError, Result};
    use bridge_desktop::{DesktopLifecycleObserver, DesktopNetworkMonitor, ReqwestHttpClient};
    use bridge_traits::playback::AudioPlayer;
    use core_runtime::config::CoreConfig;
    use provider_audiobookshelf::AudiobookshelfConnector;
    use std::path::PathBuf;
    use std::sync::Arc;

    /// Adapters the host keeps talking to after bootstrap.
    pub struct DesktopHandles {
        pub config: CoreConfig,
        /// Feed window focus changes here.
        pub lifecycle: Arc<DesktopLifecycleObserver>,
        pub connector: Arc<AudiobookshelfConnector>,
    }

    /// Build a [`CoreConfig`] for a desktop host talking to an
    /// Audiobookshelf server.
    ///
    /// ```ignore
    /// let handles = desktop_config(
    ///     "https://abs.example.com",
    ///     token,
    ///     data_dir.join("audiobooks.db"),
    ///     Arc::new(RodioPlayer::new()?),
    ///     Arc::new(RodioPlayer::new()?),
    /// )?;
    /// let core = AudiobookCore::new(handles.config)?;
    /// core.init().await?;
    /// ```
    pub fn desktop_config(
        base_url: &str,
        token: &str,
        database_path: impl Into<PathBuf>,
        primary: Arc<dyn AudioPlayer>,
        preload: Arc<dyn AudioPlayer>,
    ) -> Result<DesktopHandles> {
        let http = Arc::new(
            ReqwestHttpClient::new().map_err(|e| CoreError::InitializationFailed(e.to_string()))?,
        );
        let connector = Arc::new(AudiobookshelfConnector::new(http, base_url, token));
        let lifecycle = Arc::new(DesktopLifecycleObserver::new());

        let mut builder = CoreConfig::builder()
            .database_path(database_path)
            .players(primary, preload)
            .session_negotiator(connector.clone())
            .progress_remote(connector.clone())
            .item_source(connector.clone())
            .lifecycle_observer(lifecycle.clone());

        if let Some(address) = probe_address(base_url) {
            builder = builder.network_monitor(Arc::new(DesktopNetworkMonitor::new(address)));
        }

        Ok(DesktopHandles {
            config: builder.build()?,
            lifecycle,
            connector,
        })
    }

    /// `host:port` of a server URL, defaulting the port from the scheme.
    fn probe_address(base_url: &str) -> Option<String> {
        let (scheme, rest) = base_url.split_once("://")?;
        let authority = rest.split('/').next().filter(|a| !a.is_empty())?;
        if authority.rsplit_once(':').is_some_and(|(_, port)| port.parse::<u16>().is_ok()) {
            return Some(authority.to_string());
        }
        let port = match scheme {
            "https" => 443,
            "http" => 80,
            _ => return None,
        };
        Some(format!("{}:{}", authority, port))
    }

}
