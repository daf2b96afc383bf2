use bridge_traits::error::BridgeError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Library error: {0}")]
    Library(#[from] core_library::LibraryError),

    #[error("Remote error: {0}")]
    Remote(#[from] BridgeError),

    #[error("Sync timeout: {0}")]
    Timeout(String),

    #[error("Sync engine is not running")]
    NotRunning,

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl SyncError {
    /// The server no longer knows the item or session; retrying cannot help.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SyncError::Remote(BridgeError::NotFound(_)))
    }

    /// Worth another attempt after backoff.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Remote(BridgeError::NotFound(_)) => false,
            SyncError::Remote(_) | SyncError::Timeout(_) => true,
            SyncError::Library(_) | SyncError::NotRunning | SyncError::Config(_) => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_is_terminal() {
        let err = SyncError::from(BridgeError::NotFound("item li_1".into()));
        assert!(err.is_terminal());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_network_errors_retry() {
        assert!(SyncError::from(BridgeError::OperationFailed("HTTP 503".into())).is_retryable());
        assert!(SyncError::Timeout("upload".into()).is_retryable());
        assert!(!SyncError::NotRunning.is_retryable());
    }
}
