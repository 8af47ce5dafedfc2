//! Device session management
//!
//! Owns the single connection to the controller: scanning, GATT discovery
//! of the six control channels, the mirrored channel values, per-channel
//! write serialization and auto-reconnect after link loss. Callers drive it
//! through a [`SessionManager`] and watch it through [`SessionEvent`]s.

mod actor;
mod commands;
mod manager;
mod observer;
mod types;

#[cfg(test)]
mod tests;

use std::sync::Arc;
use std::time::Duration;

use crate::channel::DEFAULT_DEVICE_NAME;
use crate::payload::PayloadEncoding;
use crate::transport::Transport;

pub use manager::SessionManager;
pub use observer::{EventCallback, SubscriptionId};
pub use types::{
    ChannelState, ConnectionStatus, Freshness, SessionEvent, SessionSnapshot, SessionState,
};

/// Session behaviour knobs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    /// Advertised name the scan looks for
    pub name_filter: String,
    /// Reconnect after a link loss or failure that follows a Ready session
    pub auto_reconnect: bool,
    /// Wait before each reconnect attempt (zero = immediately)
    pub reconnect_delay: Duration,
    pub payload_encoding: PayloadEncoding,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            name_filter: DEFAULT_DEVICE_NAME.to_string(),
            auto_reconnect: true,
            reconnect_delay: Duration::ZERO,
            payload_encoding: PayloadEncoding::Raw,
        }
    }
}

impl SessionManager {
    /// Spawn a session on the current tokio runtime
    pub fn spawn(transport: Arc<dyn Transport>, options: SessionOptions) -> SessionManager {
        actor::SessionActor::spawn(transport, options)
    }
}
