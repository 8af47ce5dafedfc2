//! Session state type definitions
//!
//! Defines the session lifecycle states, the per-channel mirror of remote
//! values, and the events published to observers.

use chrono::{DateTime, Local};
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Instant;

use crate::channel::Channel;
use crate::error::ErrorKind;

/// Lifecycle state of the single device session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Disconnected,
    Connecting,
    Discovering,
    Ready,
    Disconnecting,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Disconnected => write!(f, "disconnected"),
            SessionState::Connecting => write!(f, "connecting"),
            SessionState::Discovering => write!(f, "discovering"),
            SessionState::Ready => write!(f, "ready"),
            SessionState::Disconnecting => write!(f, "disconnecting"),
        }
    }
}

/// How much the mirrored value can be trusted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Freshness {
    /// Not read since the session entered Discovering
    Unread,
    /// Matches the last value read, notified or acknowledged
    Synced,
    /// A write is outstanding; `value` is still the previous one
    PendingWrite,
}

/// Mirrored value of one channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChannelState {
    pub value: Option<u8>,
    pub freshness: Freshness,
}

impl ChannelState {
    pub const UNREAD: ChannelState = ChannelState {
        value: None,
        freshness: Freshness::Unread,
    };

    pub fn synced(value: u8) -> Self {
        Self {
            value: Some(value),
            freshness: Freshness::Synced,
        }
    }

    pub fn is_synced(&self) -> bool {
        self.freshness == Freshness::Synced
    }
}

impl Default for ChannelState {
    fn default() -> Self {
        Self::UNREAD
    }
}

/// Copy of the session's state handed to observers and `current_state()`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub channels: BTreeMap<Channel, ChannelState>,
}

impl SessionSnapshot {
    pub fn disconnected() -> Self {
        Self {
            state: SessionState::Disconnected,
            channels: Channel::all()
                .iter()
                .map(|c| (*c, ChannelState::UNREAD))
                .collect(),
        }
    }

    pub fn channel(&self, channel: Channel) -> ChannelState {
        self.channels.get(&channel).copied().unwrap_or_default()
    }

    pub fn value(&self, channel: Channel) -> Option<u8> {
        self.channel(channel).value
    }

    pub fn all_synced(&self) -> bool {
        Channel::all().iter().all(|c| self.channel(*c).is_synced())
    }
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Self::disconnected()
    }
}

/// Outstanding write on a channel
#[derive(Debug, Clone, Copy)]
pub(crate) struct PendingWrite {
    pub value: u8,
    pub issued_at: Instant,
}

/// Connection status published on every lifecycle transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// Scanning and connecting (attempt 0 = caller initiated, 1.. = auto-reconnect)
    Connecting { attempt: u32 },
    Discovering,
    /// Session is Ready; every channel carries its initial value
    Connected {
        device: String,
        channels: BTreeMap<Channel, u8>,
    },
    Disconnecting,
    Disconnected,
    /// Connect or discovery failed; the session is back to Disconnected
    ConnectionFailed { error: ErrorKind, message: String },
}

impl ConnectionStatus {
    /// Session state this status reports
    pub fn session_state(&self) -> SessionState {
        match self {
            ConnectionStatus::Connecting { .. } => SessionState::Connecting,
            ConnectionStatus::Discovering => SessionState::Discovering,
            ConnectionStatus::Connected { .. } => SessionState::Ready,
            ConnectionStatus::Disconnecting => SessionState::Disconnecting,
            ConnectionStatus::Disconnected | ConnectionStatus::ConnectionFailed { .. } => {
                SessionState::Disconnected
            }
        }
    }
}

/// Event delivered to session observers
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    ConnectionStatusChanged(ConnectionStatus),
    ChannelChanged {
        channel: Channel,
        value: u8,
    },
    CommandFailed {
        channel: Channel,
        value: u8,
        error: ErrorKind,
    },
    LastCommandSent {
        channel: Channel,
        value: u8,
        at: DateTime<Local>,
    },
}
