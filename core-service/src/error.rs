use bridge_traits::error::BridgeError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Core initialization failed: {0}")]
    InitializationFailed(String),

    #[error("Core is not initialized; call init() first")]
    NotInitialized,

    #[error("Invalid tuning: {0}")]
    Tuning(String),

    #[error("Runtime error: {0}")]
    Runtime(#[from] core_runtime::Error),

    #[error("Server error: {0}")]
    Remote(#[from] BridgeError),

    #[error("Sync error: {0}")]
    Sync(#[from] core_sync::SyncError),

    #[error("Library error: {0}")]
    Library(#[from] core_library::LibraryError),

    #[error("Playback error: {0}")]
    Playback(#[from] core_playback::PlaybackError),
}

pub type Result<T> = std::result::Result<T, CoreError>;
