//! Runtime error type

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Invalid configuration value (empty database path, bad log filter)
    #[error("Configuration error: {0}")]
    Config(String),

    /// A required host capability was not injected
    #[error("Capability missing: {capability} - {message}")]
    CapabilityMissing { capability: String, message: String },

    /// The global tracing subscriber could not be installed
    #[error("Logging already initialized: {0}")]
    LoggingInstalled(String),
}

pub type Result<T> = std::result::Result<T, Error>;
