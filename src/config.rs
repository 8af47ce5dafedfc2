//! Configuration management for Portal Link
//!
//! Handles loading and validating the YAML configuration file. Every field
//! has a default, so an absent file or an empty document is a valid
//! configuration.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::fs;

use crate::channel::DEFAULT_DEVICE_NAME;
use crate::payload::PayloadEncoding;
use crate::session::SessionOptions;

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    pub device: DeviceConfig,
    pub session: SessionConfig,
    pub transport: TransportKind,
}

/// Which peripheral to look for
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DeviceConfig {
    #[serde(default = "default_name_filter")]
    pub name_filter: String,
    /// How long a scan may run before reporting NoDeviceFound
    #[serde(default = "default_scan_timeout")]
    pub scan_timeout_ms: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            name_filter: default_name_filter(),
            scan_timeout_ms: default_scan_timeout(),
        }
    }
}

/// Session behaviour
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SessionConfig {
    #[serde(default = "default_true")]
    pub auto_reconnect: bool,
    #[serde(default)]
    pub reconnect_delay_ms: u64,
    #[serde(default)]
    pub payload_encoding: PayloadEncoding,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            auto_reconnect: true,
            reconnect_delay_ms: 0,
            payload_encoding: PayloadEncoding::Raw,
        }
    }
}

/// Radio backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// In-process simulated controller
    Simulated,
    /// Bluetooth LE through btleplug (requires the `bluetooth` feature)
    Bluetooth,
}

impl Default for TransportKind {
    fn default() -> Self {
        if cfg!(feature = "bluetooth") {
            TransportKind::Bluetooth
        } else {
            TransportKind::Simulated
        }
    }
}

impl AppConfig {
    /// Load configuration from file with validation
    ///
    /// A missing file yields the defaults.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = match fs::read_to_string(path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("No config at {}, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to read config file: {}", path.display()))
            }
        };

        // An empty document parses as null, not as an empty mapping
        let config: AppConfig = if contents.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(&contents)
                .with_context(|| format!("Failed to parse YAML config: {}", path.display()))?
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration for correctness
    pub fn validate(&self) -> Result<()> {
        if self.device.name_filter.trim().is_empty() {
            anyhow::bail!("device.name_filter cannot be empty");
        }
        if self.device.scan_timeout_ms == 0 {
            anyhow::bail!("device.scan_timeout_ms must be greater than 0");
        }
        if self.transport == TransportKind::Bluetooth && !cfg!(feature = "bluetooth") {
            anyhow::bail!("transport 'bluetooth' requires building with the 'bluetooth' feature");
        }
        Ok(())
    }

    pub fn scan_timeout(&self) -> Duration {
        Duration::from_millis(self.device.scan_timeout_ms)
    }

    /// Session options derived from this configuration
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            name_filter: self.device.name_filter.clone(),
            auto_reconnect: self.session.auto_reconnect,
            reconnect_delay: Duration::from_millis(self.session.reconnect_delay_ms),
            payload_encoding: self.session.payload_encoding,
        }
    }
}

// Default value functions
fn default_name_filter() -> String { DEFAULT_DEVICE_NAME.to_string() }
fn default_scan_timeout() -> u64 { 10_000 }
fn default_true() -> bool { true }
