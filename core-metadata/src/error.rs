use thiserror::Error;

#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("Library error: {0}")]
    Library(#[from] core_library::LibraryError),

    #[error("Bridge error: {0}")]
    Bridge(#[from] bridge_traits::error::BridgeError),

    #[error("Chapter source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),
}

pub type Result<T> = std::result::Result<T, MetadataError>;
