//! Configuration system for minilab.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $MINILAB_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/minilab/config.toml
//!   3. ~/.config/minilab/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::proto::{DEFAULT_RX_PORT, DEFAULT_TX_PORT};

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MinilabConfig {
    pub device: DeviceConfig,
    pub udp: UdpConfig,
    /// Channel table, one `[[channel]]` entry per channel.
    #[serde(rename = "channel")]
    pub channels: Vec<ChannelConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// MAC address embedded in outbound messages. Peers dedup on this.
    pub mac: String,
    /// Hostname embedded in outbound messages.
    pub hostname: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UdpConfig {
    /// Disable to run the device without networking.
    pub enabled: bool,
    /// Receive port.
    pub port: u16,
    /// Heartbeat broadcast target port.
    pub tx_port: u16,
    /// Broadcast address. Overridable so tests can target loopback.
    pub broadcast_addr: String,
}

/// One channel definition.
///
/// Mirrors the device's channel table: a hardware channel reads a local
/// ADC; a `udp-in` channel mirrors a value relayed by a remote peer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    pub id: String,
    /// Hardware tag: "a0", "ads1115", "udp-in", ...
    #[serde(rename = "type")]
    pub kind: String,
    pub index: u32,
    /// Calibration gain: physical = k * raw + b.
    pub k: f64,
    /// Calibration offset.
    pub b: f64,
    pub unit: String,
    /// Matching keys for udp-in channels. All optional.
    pub remote: Option<RemoteConfig>,
}

/// Remote source matching keys for a udp-in channel.
///
/// Aliases carry the key synonyms accepted in older device configs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    #[serde(alias = "source_mac")]
    pub mac: Option<String>,
    #[serde(alias = "source_ip")]
    pub ip: Option<String>,
    #[serde(alias = "source_hostname")]
    pub hostname: Option<String>,
    #[serde(alias = "rxPort")]
    pub rx_port: Option<u16>,
    #[serde(alias = "txPort")]
    pub tx_port: Option<u16>,
    #[serde(alias = "channelId", alias = "channel")]
    pub channel_id: Option<String>,
    #[serde(alias = "channelLabel")]
    pub channel_label: Option<String>,
    #[serde(alias = "channelType")]
    pub channel_type: Option<String>,
    #[serde(alias = "channelIndex", alias = "index")]
    pub channel_index: Option<u32>,
    #[serde(alias = "channelUnit", alias = "unit")]
    pub channel_unit: Option<String>,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for MinilabConfig {
    fn default() -> Self {
        Self {
            device: DeviceConfig::default(),
            udp: UdpConfig::default(),
            channels: Vec::new(),
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            mac: String::new(),
            hostname: std::env::var("HOSTNAME").unwrap_or_else(|_| "minilab".to_string()),
        }
    }
}

impl Default for UdpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: DEFAULT_RX_PORT,
            tx_port: DEFAULT_TX_PORT,
            broadcast_addr: "255.255.255.255".to_string(),
        }
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            id: String::new(),
            kind: "a0".to_string(),
            index: 0,
            k: 1.0,
            b: 0.0,
            unit: "V".to_string(),
            remote: None,
        }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("minilab")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl MinilabConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            MinilabConfig::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("MINILAB_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&MinilabConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply MINILAB_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("MINILAB_DEVICE__MAC") {
            self.device.mac = v;
        }
        if let Ok(v) = std::env::var("MINILAB_DEVICE__HOSTNAME") {
            self.device.hostname = v;
        }
        if let Ok(v) = std::env::var("MINILAB_UDP__ENABLED") {
            self.udp.enabled = v == "true" || v == "1";
        }
        if let Ok(v) = std::env::var("MINILAB_UDP__PORT") {
            if let Ok(p) = v.parse() {
                self.udp.port = p;
            }
        }
        if let Ok(v) = std::env::var("MINILAB_UDP__TX_PORT") {
            if let Ok(p) = v.parse() {
                self.udp.tx_port = p;
            }
        }
        if let Ok(v) = std::env::var("MINILAB_UDP__BROADCAST_ADDR") {
            self.udp.broadcast_addr = v;
        }
    }
}
