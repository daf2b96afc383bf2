//! App Lifecycle Observation
//!
//! Mobile platforms give an app a short grace period after it leaves the
//! foreground. The durability engine uses these transitions to flush pending
//! progress uploads before suspension and to rescan for unsynced records when
//! the app comes back.

use crate::error::Result;

/// Lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Application is in the foreground and active
    Foreground,
    /// Application is in the background
    Background,
    /// Application is being suspended
    Suspended,
}

impl LifecycleState {
    /// Whether the OS may suspend the process soon.
    pub fn is_leaving_foreground(self) -> bool {
        matches!(self, LifecycleState::Background | LifecycleState::Suspended)
    }
}

/// Lifecycle observer trait
///
/// # Platform Support
///
/// - **iOS**: UIApplication lifecycle notifications
/// - **Android**: ProcessLifecycleOwner callbacks
/// - **Desktop**: window minimize/restore, pushed by the host
///
/// # Example
///
/// ```ignore
/// use bridge_traits::background::{LifecycleObserver, LifecycleState};
///
/// async fn watch(observer: &dyn LifecycleObserver, engine: &ProgressSyncEngine) -> Result<()> {
///     let mut stream = observer.subscribe_changes().await?;
///     while let Some(state) = stream.next().await {
///         engine.on_lifecycle(state).await;
///     }
///     Ok(())
/// }
/// ```
#[async_trait::async_trait]
pub trait LifecycleObserver: Send + Sync {
    /// Get current lifecycle state
    async fn get_state(&self) -> Result<LifecycleState>;

    /// Subscribe to lifecycle state changes
    async fn subscribe_changes(&self) -> Result<Box<dyn LifecycleChangeStream>>;
}

/// Stream of lifecycle state changes
#[async_trait::async_trait]
pub trait LifecycleChangeStream: Send {
    /// Get the next lifecycle state update
    ///
    /// Returns `None` when the stream is closed.
    async fn next(&mut self) -> Option<LifecycleState>;
}
