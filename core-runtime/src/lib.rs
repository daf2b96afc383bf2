//! # Core Runtime Module
//!
//! Foundational runtime infrastructure shared by every audiobook core crate:
//! - Logging and tracing setup (`logging`)
//! - Capability configuration with fail-fast validation (`config`)
//! - Typed event bus (`events`)

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
