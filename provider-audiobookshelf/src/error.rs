//! Error types for the Audiobookshelf provider

use bridge_traits::error::BridgeError;
use thiserror::Error;

/// Audiobookshelf provider errors
#[derive(Error, Debug)]
pub enum ProviderError {
    /// Token rejected by the server
    #[error("Authentication failed (status {status_code})")]
    Unauthorized { status_code: u16 },

    /// Session, item or progress record does not exist
    #[error("Not found: {resource}")]
    NotFound { resource: String },

    /// Any other non-2xx answer
    #[error("Audiobookshelf API error (status {status_code}): {message}")]
    ApiError { status_code: u16, message: String },

    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

/// Result type for provider operations
pub type Result<T> = std::result::Result<T, ProviderError>;

impl From<ProviderError> for BridgeError {
    fn from(error: ProviderError) -> Self {
        match error {
            ProviderError::NotFound { resource } => BridgeError::NotFound(resource),
            ProviderError::Bridge(e) => e,
            other => BridgeError::OperationFailed(other.to_string()),
        }
    }
}
