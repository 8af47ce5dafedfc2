//! Single-byte payload codec
//!
//! Writes are always one raw byte. Reads and notifications depend on the
//! firmware build: some publish the raw byte, others publish the value as
//! ASCII decimal text (`"128"`).

use serde::{Deserialize, Serialize};

use crate::error::TransportError;

/// How read and notification payloads are decoded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadEncoding {
    /// First byte is the value
    #[default]
    Raw,
    /// ASCII decimal digits, 0-255
    Text,
}

impl PayloadEncoding {
    pub fn decode(self, bytes: &[u8]) -> Result<u8, TransportError> {
        match self {
            PayloadEncoding::Raw => bytes
                .first()
                .copied()
                .ok_or_else(|| TransportError::Link("empty payload".to_string())),
            PayloadEncoding::Text => decode_text(bytes),
        }
    }
}

/// Encode a value for a characteristic write
pub fn encode(value: u8) -> Vec<u8> {
    vec![value]
}

fn decode_text(bytes: &[u8]) -> Result<u8, TransportError> {
    // Firmware strings may carry a trailing NUL from c_str()
    let text = std::str::from_utf8(bytes)
        .map_err(|_| TransportError::Link(format!("non-UTF-8 payload {:02X?}", bytes)))?
        .trim_end_matches('\0')
        .trim();

    if text.is_empty() {
        return Err(TransportError::Link("empty payload".to_string()));
    }

    text.parse::<u8>()
        .map_err(|_| TransportError::Link(format!("payload '{}' is not a byte value", text)))
}
