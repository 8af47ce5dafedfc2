//! Error taxonomy for the transport and session layers
//!
//! Adapters report [`TransportError`]. Callers of the session manager only
//! get [`SessionError`] back; transport failures reach them as the lighter
//! [`ErrorKind`] carried by events.

use serde::Serialize;
use thiserror::Error;

/// Failure reported by a transport adapter
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Platform lacks Bluetooth LE support (or no adapter is present)
    #[error("Bluetooth LE is not supported: {0}")]
    NotSupported(String),

    /// Scan finished (or was cancelled) without a matching peripheral
    #[error("No device matching '{0}' found")]
    NoDeviceFound(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Service {0} not found")]
    ServiceNotFound(String),

    #[error("Characteristic {0} not found")]
    CharacteristicNotFound(String),

    /// Link loss, GATT busy, write rejected, malformed payload
    #[error("Transport error: {0}")]
    Link(String),
}

impl TransportError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TransportError::NotSupported(_) => ErrorKind::NotSupported,
            TransportError::NoDeviceFound(_) => ErrorKind::NoDeviceFound,
            TransportError::ConnectionFailed(_) => ErrorKind::ConnectionFailed,
            TransportError::ServiceNotFound(_) => ErrorKind::ServiceNotFound,
            TransportError::CharacteristicNotFound(_) => ErrorKind::CharacteristicNotFound,
            TransportError::Link(_) => ErrorKind::TransportError,
        }
    }
}

/// Error returned to the UI collaborator
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Session is not ready")]
    NotReady,

    #[error("A write to {0} is already in progress")]
    WriteInProgress(crate::Channel),

    #[error("Session already active")]
    AlreadyConnected,

    #[error("Session manager has stopped")]
    Closed,
}

impl SessionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SessionError::NotReady => ErrorKind::NotReady,
            SessionError::WriteInProgress(_) => ErrorKind::WriteInProgress,
            SessionError::AlreadyConnected => ErrorKind::AlreadyConnected,
            SessionError::Closed => ErrorKind::TransportError,
        }
    }
}

/// Flat error classification published in observer events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotSupported,
    NoDeviceFound,
    ConnectionFailed,
    ServiceNotFound,
    CharacteristicNotFound,
    TransportError,
    NotReady,
    WriteInProgress,
    AlreadyConnected,
}

impl ErrorKind {
    /// Whether a session that failed this way may be retried automatically
    pub fn is_recoverable(self) -> bool {
        matches!(
            self,
            ErrorKind::NoDeviceFound
                | ErrorKind::ConnectionFailed
                | ErrorKind::ServiceNotFound
                | ErrorKind::CharacteristicNotFound
                | ErrorKind::TransportError
        )
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::NotSupported => "not supported",
            ErrorKind::NoDeviceFound => "no device found",
            ErrorKind::ConnectionFailed => "connection failed",
            ErrorKind::ServiceNotFound => "service not found",
            ErrorKind::CharacteristicNotFound => "characteristic not found",
            ErrorKind::TransportError => "transport error",
            ErrorKind::NotReady => "not ready",
            ErrorKind::WriteInProgress => "write in progress",
            ErrorKind::AlreadyConnected => "already connected",
        };
        f.write_str(s)
    }
}
