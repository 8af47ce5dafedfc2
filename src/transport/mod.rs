//! Transport adapters (simulated, Bluetooth LE)
//!
//! The session manager talks to the radio only through [`Transport`]. Every
//! method is a suspension point; none of them cache anything.

use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::TransportError;

#[cfg(feature = "bluetooth")]
pub mod btle;
pub mod sim;

#[cfg(feature = "bluetooth")]
pub use btle::BtleTransport;
pub use sim::{SimControl, SimTransport};

/// Result alias for adapter operations
pub type Result<T> = std::result::Result<T, TransportError>;

/// Callback type for characteristic notifications
///
/// Receives the raw payload pushed by the peripheral. Adapters call it from
/// their own tasks, in the order the platform delivered the notifications.
pub type NotifyCallback = Arc<dyn Fn(Vec<u8>) + Send + Sync>;

/// Callback type for link loss
///
/// Invoked at most once per connection, whether the drop was local or remote.
pub type DisconnectCallback = Box<dyn FnOnce() + Send>;

/// A peripheral found by a scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeripheralHandle {
    /// Platform identifier (MAC address on Linux, UUID on macOS/Windows)
    pub id: String,
    /// Advertised local name
    pub name: String,
}

/// An established GATT connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionHandle {
    pub id: u64,
    pub peripheral: PeripheralHandle,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceHandle {
    pub connection: u64,
    pub uuid: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicHandle {
    pub connection: u64,
    pub service: Uuid,
    pub uuid: Uuid,
}

/// Live notification subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionHandle {
    pub connection: u64,
    pub characteristic: Uuid,
}

/// Transport trait - all radio backends implement this
///
/// Note: All methods take &self so adapters can be shared as
/// `Arc<dyn Transport>`. Implementations use interior mutability.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Backend name for logs (e.g., "sim", "btleplug")
    fn name(&self) -> &str;

    /// Scan for a peripheral whose advertised name matches `name_filter`
    async fn discover_peripheral(&self, name_filter: &str) -> Result<PeripheralHandle>;

    /// Open a GATT connection
    async fn connect(&self, peripheral: &PeripheralHandle) -> Result<ConnectionHandle>;

    /// Locate a primary service on an open connection
    async fn discover_service(
        &self,
        conn: &ConnectionHandle,
        service_id: Uuid,
    ) -> Result<ServiceHandle>;

    /// Locate a characteristic inside a discovered service
    async fn get_characteristic(
        &self,
        service: &ServiceHandle,
        wire_id: Uuid,
    ) -> Result<CharacteristicHandle>;

    async fn read(&self, characteristic: &CharacteristicHandle) -> Result<Vec<u8>>;

    /// Write with response; resolves once the peripheral acknowledged
    async fn write(&self, characteristic: &CharacteristicHandle, bytes: &[u8]) -> Result<()>;

    /// Enable notifications and route them to `on_change`
    async fn subscribe(
        &self,
        characteristic: &CharacteristicHandle,
        on_change: NotifyCallback,
    ) -> Result<SubscriptionHandle>;

    /// Register the link-loss callback for a connection
    fn on_disconnected(&self, conn: &ConnectionHandle, callback: DisconnectCallback);

    /// Close the link. The `on_disconnected` callback still fires.
    async fn disconnect(&self, conn: &ConnectionHandle) -> Result<()>;
}
