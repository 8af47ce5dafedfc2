//! Portal Link - control client for the Aurora Portal LED controller
//!
//! Connects to the controller over Bluetooth LE, mirrors its six control
//! channels and serializes writes to them. The [`SessionManager`] is the
//! entry point; transports plug in through the [`Transport`] trait.

pub mod channel;
pub mod command;
pub mod config;
pub mod error;
pub mod payload;
pub mod session;
pub mod transport;

pub use channel::{Channel, DEFAULT_DEVICE_NAME, SERVICE_UUID};
pub use command::Command;
pub use config::{AppConfig, TransportKind};
pub use error::{ErrorKind, SessionError, TransportError};
pub use payload::PayloadEncoding;
pub use session::{
    ChannelState, ConnectionStatus, EventCallback, Freshness, SessionEvent, SessionManager,
    SessionOptions, SessionSnapshot, SessionState, SubscriptionId,
};
pub use transport::{SimControl, SimTransport, Transport};
