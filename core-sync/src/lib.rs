//! # Progress Durability
//!
//! Keeps listening progress safe on the device and eventually consistent
//! with the server.
//!
//! ## Overview
//!
//! This module handles:
//! - Local-first saves into the progress store
//! - A debounced upload queue with exponential backoff
//! - Session sync with a direct item-progress fallback
//! - Timestamp-based conflict resolution
//! - Lifecycle-driven flushes and rescans
//!
//! ## Components
//!
//! - **Queue** (`queue`): pure scheduling policy, driven by explicit instants
//! - **Conflict Resolver** (`conflict_resolver`): trust-server or pre-read compare
//! - **Engine** (`engine`): store writes, worker task and uploads

pub mod config;
pub mod conflict_resolver;
pub mod engine;
pub mod error;
pub mod queue;

pub use config::SyncConfig;
pub use conflict_resolver::{ConflictPolicy, ConflictResolver, Resolution};
pub use engine::{ProgressSyncEngine, SyncStatus, UploadOutcome};
pub use error::{Result, SyncError};
pub use queue::{Claim, FailureOutcome, SyncQueue};
