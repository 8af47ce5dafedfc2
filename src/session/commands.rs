//! Command enum for the session actor
//!
//! The mailbox carries two kinds of messages:
//! - **Requests** from the UI collaborator, answered over a oneshot channel
//! - **Completions** posted by spawned transport tasks and adapter callbacks,
//!   tagged with the epoch they were started in so results from an abandoned
//!   session can be recognised and discarded

use tokio::sync::oneshot;

use crate::channel::Channel;
use crate::error::{SessionError, TransportError};
use crate::transport::{CharacteristicHandle, ConnectionHandle, PeripheralHandle};

/// Monotonic session generation counter
pub(crate) type Epoch = u64;

pub(crate) type Reply<T> = oneshot::Sender<Result<T, SessionError>>;

pub(crate) enum SessionCommand {
    // -------------------------------------------------------------------------
    // Requests (respond over oneshot)
    // -------------------------------------------------------------------------
    Connect {
        response: Reply<()>,
    },
    Disconnect {
        response: Reply<()>,
    },
    SendCommand {
        channel: Channel,
        value: u8,
        response: Reply<()>,
    },
    /// Close the link without auto-retry and stop the actor
    Shutdown {
        response: oneshot::Sender<()>,
    },

    // -------------------------------------------------------------------------
    // Transport completions
    // -------------------------------------------------------------------------
    PeripheralFound {
        epoch: Epoch,
        result: Result<PeripheralHandle, TransportError>,
    },
    LinkOpened {
        epoch: Epoch,
        result: Result<ConnectionHandle, TransportError>,
    },
    /// One channel finished get_characteristic, subscribe and its initial read
    ChannelDiscovered {
        epoch: Epoch,
        channel: Channel,
        characteristic: CharacteristicHandle,
        payload: Vec<u8>,
    },
    /// Service lookup or any channel step failed
    DiscoveryFailed {
        epoch: Epoch,
        channel: Option<Channel>,
        error: TransportError,
    },
    Notification {
        epoch: Epoch,
        channel: Channel,
        payload: Vec<u8>,
    },
    LinkLost {
        epoch: Epoch,
    },
    WriteDone {
        epoch: Epoch,
        channel: Channel,
        value: u8,
        result: Result<(), TransportError>,
    },
    DisconnectDone {
        epoch: Epoch,
        result: Result<(), TransportError>,
    },
    /// Delayed auto-reconnect timer fired
    Reconnect {
        token: u64,
    },
}

impl std::fmt::Debug for SessionCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionCommand::Connect { .. } => write!(f, "Connect"),
            SessionCommand::Disconnect { .. } => write!(f, "Disconnect"),
            SessionCommand::SendCommand { channel, value, .. } => {
                write!(f, "SendCommand({}, {})", channel, value)
            }
            SessionCommand::Shutdown { .. } => write!(f, "Shutdown"),
            SessionCommand::PeripheralFound { epoch, result } => {
                write!(f, "PeripheralFound(#{}, ok={})", epoch, result.is_ok())
            }
            SessionCommand::LinkOpened { epoch, result } => {
                write!(f, "LinkOpened(#{}, ok={})", epoch, result.is_ok())
            }
            SessionCommand::ChannelDiscovered { epoch, channel, .. } => {
                write!(f, "ChannelDiscovered(#{}, {})", epoch, channel)
            }
            SessionCommand::DiscoveryFailed { epoch, channel, error } => {
                write!(f, "DiscoveryFailed(#{}, {:?}, {})", epoch, channel, error)
            }
            SessionCommand::Notification {
                epoch,
                channel,
                payload,
            } => write!(f, "Notification(#{}, {}, {:02X?})", epoch, channel, payload),
            SessionCommand::LinkLost { epoch } => write!(f, "LinkLost(#{})", epoch),
            SessionCommand::WriteDone {
                epoch,
                channel,
                value,
                result,
            } => write!(
                f,
                "WriteDone(#{}, {}, {}, ok={})",
                epoch,
                channel,
                value,
                result.is_ok()
            ),
            SessionCommand::DisconnectDone { epoch, result } => {
                write!(f, "DisconnectDone(#{}, ok={})", epoch, result.is_ok())
            }
            SessionCommand::Reconnect { token } => write!(f, "Reconnect({})", token),
        }
    }
}
