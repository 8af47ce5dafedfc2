//! Channel registry
//!
//! The peripheral exposes one GATT service with six single-byte
//! characteristics. Each logical channel maps to exactly one of them.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Primary service advertised by the controller
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x19b10000_e8f2_537e_4f6c_d104768a1214);

/// Advertised local name of the controller
pub const DEFAULT_DEVICE_NAME: &str = "Aurora Portal";

/// Logical command/status channel exposed by the peripheral
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Program,
    Mode,
    Brightness,
    Speed,
    Palette,
    Control,
}

const ALL_CHANNELS: [Channel; 6] = [
    Channel::Program,
    Channel::Mode,
    Channel::Brightness,
    Channel::Speed,
    Channel::Palette,
    Channel::Control,
];

impl Channel {
    /// All channels, in registry order
    pub fn all() -> &'static [Channel] {
        &ALL_CHANNELS
    }

    /// Characteristic UUID addressing this channel
    pub const fn wire_id(self) -> Uuid {
        match self {
            Channel::Program => Uuid::from_u128(0x19b10001_e8f2_537e_4f6c_d104768a1214),
            Channel::Mode => Uuid::from_u128(0x19b10002_e8f2_537e_4f6c_d104768a1214),
            Channel::Brightness => Uuid::from_u128(0x19b10003_e8f2_537e_4f6c_d104768a1214),
            Channel::Speed => Uuid::from_u128(0x19b10004_e8f2_537e_4f6c_d104768a1214),
            Channel::Palette => Uuid::from_u128(0x19b10005_e8f2_537e_4f6c_d104768a1214),
            Channel::Control => Uuid::from_u128(0x19b10006_e8f2_537e_4f6c_d104768a1214),
        }
    }

    /// Reverse lookup used when demultiplexing notifications
    pub fn from_wire_id(id: &Uuid) -> Option<Channel> {
        ALL_CHANNELS.iter().copied().find(|c| c.wire_id() == *id)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Channel::Program => "program",
            Channel::Mode => "mode",
            Channel::Brightness => "brightness",
            Channel::Speed => "speed",
            Channel::Palette => "palette",
            Channel::Control => "control",
        }
    }
}

/// Free-function form of [`Channel::wire_id`]
pub fn wire_id_of(channel: Channel) -> Uuid {
    channel.wire_id()
}

/// Free-function form of [`Channel::all`]
pub fn all_channels() -> &'static [Channel] {
    Channel::all()
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        ALL_CHANNELS
            .iter()
            .copied()
            .find(|c| c.as_str() == lower)
            .ok_or_else(|| format!("unknown channel '{}'", s.trim()))
    }
}
