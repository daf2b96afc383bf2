//! Network Monitoring Abstraction
//!
//! Lets the durability engine hold back progress uploads while the device is
//! offline instead of burning retry attempts on requests that cannot succeed.

use crate::error::Result;

/// Network connection type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkType {
    Cellular,
    WiFi,
    Ethernet,
    Other,
}

/// Network connection status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkStatus {
    Connected,
    Disconnected,
    /// Host could not determine connectivity; treated as connected.
    Indeterminate,
}

/// Network information
#[derive(Debug, Clone)]
pub struct NetworkInfo {
    pub status: NetworkStatus,
    pub network_type: Option<NetworkType>,
    /// Whether the connection is metered (has data limits/costs)
    pub is_metered: bool,
}

impl NetworkInfo {
    pub fn connected(network_type: NetworkType) -> Self {
        Self {
            status: NetworkStatus::Connected,
            network_type: Some(network_type),
            is_metered: matches!(network_type, NetworkType::Cellular),
        }
    }

    pub fn disconnected() -> Self {
        Self {
            status: NetworkStatus::Disconnected,
            network_type: None,
            is_metered: false,
        }
    }
}

/// Network monitor trait
///
/// # Platform Support
///
/// - **Desktop**: best-effort probe, see `bridge-desktop`
/// - **iOS**: `NWPathMonitor`
/// - **Android**: `ConnectivityManager`
///
/// # Example
///
/// ```ignore
/// use bridge_traits::network::NetworkMonitor;
///
/// async fn can_upload(monitor: &dyn NetworkMonitor) -> bool {
///     monitor.is_connected().await
/// }
/// ```
#[async_trait::async_trait]
pub trait NetworkMonitor: Send + Sync {
    /// Get current network information
    async fn get_network_info(&self) -> Result<NetworkInfo>;

    /// Check if currently connected to any network.
    ///
    /// `Indeterminate` and probe failures count as connected so that an
    /// unreliable monitor never blocks uploads forever.
    async fn is_connected(&self) -> bool {
        match self.get_network_info().await {
            Ok(info) => info.status != NetworkStatus::Disconnected,
            Err(_) => true,
        }
    }

    /// Check if connection is metered
    async fn is_metered(&self) -> bool {
        matches!(
            self.get_network_info().await,
            Ok(NetworkInfo {
                is_metered: true,
                ..
            })
        )
    }

    /// Subscribe to network status changes
    async fn subscribe_changes(&self) -> Result<Box<dyn NetworkChangeStream>>;
}

/// Stream of network status changes
#[async_trait::async_trait]
pub trait NetworkChangeStream: Send {
    /// Get the next network info update
    ///
    /// Returns `None` when the stream is closed.
    async fn next(&mut self) -> Option<NetworkInfo>;
}
