//! Network Monitoring Implementation

use async_trait::async_trait;
use bridge_traits::{
    error::Result,
    network::{NetworkChangeStream, NetworkInfo, NetworkMonitor, NetworkStatus, NetworkType},
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

const PROBE_TIMEOUT: Duration = Duration::from_secs(3);
const CACHE_TTL: Duration = Duration::from_secs(10);
const POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Desktop network monitor implementation
///
/// Reachability is probed with a TCP connect to the media server itself
/// (`host:port`), so "connected" means "the server is reachable" rather than
/// "some interface is up". Results are cached briefly because the sync worker
/// asks before every batch.
#[derive(Clone)]
pub struct DesktopNetworkMonitor {
    probe_addr: Arc<String>,
    cached: Arc<Mutex<Option<(Instant, NetworkInfo)>>>,
}

impl DesktopNetworkMonitor {
    /// Create a monitor probing the given `host:port`.
    pub fn new(probe_addr: impl Into<String>) -> Self {
        Self {
            probe_addr: Arc::new(probe_addr.into()),
            cached: Arc::new(Mutex::new(None)),
        }
    }

    async fn check_connectivity(&self) -> NetworkStatus {
        match tokio::time::timeout(
            PROBE_TIMEOUT,
            tokio::net::TcpStream::connect(self.probe_addr.as_str()),
        )
        .await
        {
            Ok(Ok(_)) => NetworkStatus::Connected,
            Ok(Err(_)) | Err(_) => NetworkStatus::Disconnected,
        }
    }

    async fn probe(&self) -> NetworkInfo {
        let status = self.check_connectivity().await;
        let info = if status == NetworkStatus::Connected {
            // Desktop cannot tell WiFi from Ethernet without platform APIs.
            NetworkInfo::connected(NetworkType::Other)
        } else {
            NetworkInfo::disconnected()
        };
        debug!(status = ?info.status, "Network info updated");
        info
    }
}

#[async_trait]
impl NetworkMonitor for DesktopNetworkMonitor {
    async fn get_network_info(&self) -> Result<NetworkInfo> {
        let mut cached = self.cached.lock().await;
        if let Some((at, info)) = cached.as_ref() {
            if at.elapsed() < CACHE_TTL {
                return Ok(info.clone());
            }
        }

        let info = self.probe().await;
        *cached = Some((Instant::now(), info.clone()));
        Ok(info)
    }

    async fn subscribe_changes(&self) -> Result<Box<dyn NetworkChangeStream>> {
        Ok(Box::new(DesktopNetworkChangeStream {
            monitor: self.clone(),
            last_status: None,
        }))
    }
}

/// Network change stream that polls for changes
struct DesktopNetworkChangeStream {
    monitor: DesktopNetworkMonitor,
    last_status: Option<NetworkStatus>,
}

#[async_trait]
impl NetworkChangeStream for DesktopNetworkChangeStream {
    async fn next(&mut self) -> Option<NetworkInfo> {
        loop {
            let info = self.monitor.probe().await;
            if self.last_status != Some(info.status) {
                self.last_status = Some(info.status);
                return Some(info);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}
