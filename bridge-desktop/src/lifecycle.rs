//! Lifecycle Observer Implementation

use async_trait::async_trait;
use bridge_traits::{
    background::{LifecycleChangeStream, LifecycleObserver, LifecycleState},
    error::Result,
};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Desktop lifecycle observer.
///
/// Desktop windowing toolkits differ too much to hook here, so the host pushes
/// transitions (minimize, restore, quit) through [`DesktopLifecycleObserver::notify`].
/// Starts in [`LifecycleState::Foreground`].
#[derive(Clone)]
pub struct DesktopLifecycleObserver {
    state: Arc<Mutex<LifecycleState>>,
    tx: broadcast::Sender<LifecycleState>,
}

impl DesktopLifecycleObserver {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(16);
        Self {
            state: Arc::new(Mutex::new(LifecycleState::Foreground)),
            tx,
        }
    }

    /// Record a transition and fan it out to subscribers. Repeated states are ignored.
    pub fn notify(&self, state: LifecycleState) {
        {
            let mut current = self.state.lock();
            if *current == state {
                return;
            }
            *current = state;
        }
        debug!(state = ?state, "Lifecycle transition");
        // No subscribers is fine.
        let _ = self.tx.send(state);
    }
}

impl Default for DesktopLifecycleObserver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LifecycleObserver for DesktopLifecycleObserver {
    async fn get_state(&self) -> Result<LifecycleState> {
        Ok(*self.state.lock())
    }

    async fn subscribe_changes(&self) -> Result<Box<dyn LifecycleChangeStream>> {
        Ok(Box::new(DesktopLifecycleChangeStream {
            rx: self.tx.subscribe(),
        }))
    }
}

struct DesktopLifecycleChangeStream {
    rx: broadcast::Receiver<LifecycleState>,
}

#[async_trait]
impl LifecycleChangeStream for DesktopLifecycleChangeStream {
    async fn next(&mut self) -> Option<LifecycleState> {
        loop {
            match self.rx.recv().await {
                Ok(state) => return Some(state),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Lifecycle subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_starts_in_foreground() {
        let observer = DesktopLifecycleObserver::new();
        assert_eq!(
            observer.get_state().await.unwrap(),
            LifecycleState::Foreground
        );
    }

    #[tokio::test]
    async fn test_subscribers_receive_transitions() {
        let observer = DesktopLifecycleObserver::new();
        let mut stream = observer.subscribe_changes().await.unwrap();

        observer.notify(LifecycleState::Background);
        observer.notify(LifecycleState::Background);
        observer.notify(LifecycleState::Foreground);

        assert_eq!(stream.next().await, Some(LifecycleState::Background));
        assert_eq!(stream.next().await, Some(LifecycleState::Foreground));
        assert_eq!(
            observer.get_state().await.unwrap(),
            LifecycleState::Foreground
        );
    }
}
