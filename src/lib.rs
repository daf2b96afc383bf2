//! Workspace umbrella crate.
//!
//! Re-exports the host-facing façade so applications can depend on one crate
//! and pick adapters through features (`desktop-shims` pulls in the reqwest
//! HTTP client and the Audiobookshelf provider).

pub use core_service::{
    AudiobookCore, CoreError, EngineTuning, OpenedBook, ResumeSource, Result,
};

#[cfg(feature = "desktop-shims")]
pub use core_service::{desktop_config, DesktopHandles};
