use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Bridge capability not available: {0}")]
    NotAvailable(String),

    #[error("Bridge operation failed: {0}")]
    OperationFailed(String),

    /// The remote resource no longer exists. Callers treat this as terminal.
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Returns `true` if the error means the remote resource is gone.
    pub fn is_not_found(&self) -> bool {
        matches!(self, BridgeError::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
