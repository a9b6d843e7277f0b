//! Channel registry — the device's table of measurement channels.
//!
//! Channels are created once at startup from configuration and live for
//! the process lifetime. A channel either reads local hardware (the
//! hardware driver pushes raw values in through `set_local_raw`) or
//! mirrors a remote peer's channel over UDP. Remote state is mutated only
//! by the matcher; staleness is never stored, only derived at read time.

use serde::Serialize;

use minilab_core::config::{ChannelConfig, RemoteConfig};
use minilab_core::proto::{ChannelAdvert, STALE_AFTER_MS};

/// Maximum number of channels. The table is fixed-capacity; exceeding it
/// is a configuration error, never a silent overwrite.
pub const MAX_CHANNELS: usize = 16;

// ── Channel model ─────────────────────────────────────────────────────────────

/// Where a channel's value comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Measured by local hardware (ADC, I2C sensor, ...).
    Hardware,
    /// Relayed from a remote device over UDP.
    RemoteInput,
}

/// Configured matching keys linking a udp-in channel to a remote source.
/// All keys are optional; an empty binding matches on the channel's own id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RemoteBinding {
    pub mac: Option<String>,
    pub ip: Option<String>,
    pub hostname: Option<String>,
    pub channel_id: Option<String>,
    pub channel_label: Option<String>,
    pub channel_type: Option<String>,
    pub channel_index: u32,
    pub channel_unit: Option<String>,
}

impl RemoteBinding {
    fn from_config(cfg: &RemoteConfig) -> Self {
        let channel_id = clean_opt(&cfg.channel_id);
        // A binding with an id but no label uses the id as label too.
        let channel_label = clean_opt(&cfg.channel_label).or_else(|| channel_id.clone());
        Self {
            mac: clean_opt(&cfg.mac),
            ip: clean_opt(&cfg.ip),
            hostname: clean_opt(&cfg.hostname),
            channel_id,
            channel_label,
            channel_type: clean_opt(&cfg.channel_type),
            channel_index: cfg.channel_index.unwrap_or(0),
            channel_unit: clean_opt(&cfg.channel_unit),
        }
    }

    /// True when any host key is configured — the matcher then requires
    /// every configured key to match.
    pub fn has_host_constraint(&self) -> bool {
        self.mac.is_some() || self.ip.is_some() || self.hostname.is_some()
    }
}

/// Cached state of a remote-input channel.
///
/// `last_converted` holds only explicitly reported converted values; a
/// raw-only report seeds the converted reading at read time until an
/// explicit value arrives.
#[derive(Debug, Clone, Default)]
pub struct RemoteState {
    pub last_raw: Option<f64>,
    pub last_converted: Option<f64>,
    pub last_update_ms: Option<u64>,
    /// Identity of the most recent successful updater.
    pub resolved_mac: Option<String>,
    pub resolved_ip: Option<String>,
    pub resolved_hostname: Option<String>,
}

impl RemoteState {
    /// Best available converted value: explicit, else seeded from raw.
    pub fn converted_value(&self) -> Option<f64> {
        self.last_converted.or(self.last_raw)
    }

    /// Read-time status classification. Never cached.
    pub fn status(&self, now_ms: u64) -> RemoteStatus {
        match self.age_ms(now_ms) {
            None => RemoteStatus::Waiting,
            Some(age) if age > STALE_AFTER_MS => RemoteStatus::Stale,
            Some(_) => RemoteStatus::Online,
        }
    }

    pub fn age_ms(&self, now_ms: u64) -> Option<u64> {
        self.last_update_ms.map(|t| now_ms.saturating_sub(t))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteStatus {
    /// No update ever recorded.
    Waiting,
    Online,
    Stale,
}

/// One measurement channel.
#[derive(Debug, Clone)]
pub struct Channel {
    pub id: String,
    /// Hardware tag as configured: "a0", "ads1115", "udp-in", ...
    pub kind: String,
    pub index: u32,
    /// Calibration gain: physical = k * raw + b.
    pub k: f64,
    pub b: f64,
    pub unit: String,
    pub binding: Option<RemoteBinding>,
    origin: Origin,
    /// Last raw value pushed by the hardware driver.
    local_raw: f64,
    remote: RemoteState,
}

impl Channel {
    pub fn from_config(cfg: &ChannelConfig) -> Self {
        let kind = cfg.kind.trim().to_ascii_lowercase();
        let origin = if kind == "udp-in" || kind == "udp" {
            Origin::RemoteInput
        } else {
            Origin::Hardware
        };
        let binding = match (&cfg.remote, origin) {
            (Some(remote), Origin::RemoteInput) => Some(RemoteBinding::from_config(remote)),
            _ => None,
        };
        let mut unit = cfg.unit.trim().to_string();
        if unit.is_empty() {
            if let Some(remote_unit) = binding.as_ref().and_then(|b| b.channel_unit.clone()) {
                unit = remote_unit;
            }
        }
        Self {
            id: cfg.id.trim().to_string(),
            kind,
            index: cfg.index,
            k: cfg.k,
            b: cfg.b,
            unit,
            binding,
            origin,
            local_raw: 0.0,
            remote: RemoteState::default(),
        }
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }

    pub fn is_remote_input(&self) -> bool {
        self.origin == Origin::RemoteInput
    }

    /// Remote value cache, read-only outside the matcher.
    pub fn remote(&self) -> &RemoteState {
        &self.remote
    }

    pub(crate) fn remote_mut(&mut self) -> &mut RemoteState {
        &mut self.remote
    }

    /// Raw reading: the cached remote value for udp-in channels, the last
    /// hardware sample otherwise.
    pub fn read_raw(&self) -> f64 {
        match self.origin {
            Origin::RemoteInput => self
                .remote
                .last_raw
                .or(self.remote.last_converted)
                .unwrap_or(0.0),
            Origin::Hardware => self.local_raw,
        }
    }

    pub fn convert(&self, raw: f64) -> f64 {
        self.k * raw + self.b
    }

    pub fn read_value(&self) -> f64 {
        self.convert(self.read_raw())
    }

    fn advert(&self) -> ChannelAdvert {
        ChannelAdvert {
            id: self.id.clone(),
            kind: self.kind.clone(),
            index: self.index,
            unit: self.unit.clone(),
            k: self.k,
            b: self.b,
        }
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("channel table full ({MAX_CHANNELS} channels), cannot add '{0}'")]
    CapacityExceeded(String),
}

// ── Registry ──────────────────────────────────────────────────────────────────

/// The bounded channel table. Single-threaded: all mutation happens from
/// the cooperative polling context.
#[derive(Debug, Default)]
pub struct IoRegistry {
    channels: Vec<Channel>,
}

impl IoRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from the `[[channel]]` config entries.
    /// Entries beyond capacity are rejected, logged, and skipped.
    pub fn from_config(configs: &[ChannelConfig]) -> Self {
        let mut registry = Self::new();
        for cfg in configs {
            let channel = Channel::from_config(cfg);
            tracing::info!(id = %channel.id, kind = %channel.kind, index = channel.index, "channel loaded");
            if let Err(e) = registry.add_channel(channel) {
                tracing::error!(error = %e, "skipping channel");
            }
        }
        tracing::info!(count = registry.len(), "channel table ready");
        registry
    }

    pub fn add_channel(&mut self, channel: Channel) -> Result<(), RegistryError> {
        if self.channels.len() >= MAX_CHANNELS {
            return Err(RegistryError::CapacityExceeded(channel.id));
        }
        self.channels.push(channel);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Channel> {
        self.channels.iter().find(|c| c.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Channel> {
        self.channels.iter()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut Channel> {
        self.channels.iter_mut()
    }

    /// Push a hardware sample into a local channel. Seam for the ADC/I2C
    /// driver collaborator; unknown ids and udp-in channels are ignored.
    pub fn set_local_raw(&mut self, id: &str, raw: f64) {
        if let Some(ch) = self
            .channels
            .iter_mut()
            .find(|c| c.id == id && !c.is_remote_input())
        {
            ch.local_raw = raw;
        }
    }

    pub fn read_raw(&self, id: &str) -> f64 {
        self.get(id).map(Channel::read_raw).unwrap_or(0.0)
    }

    pub fn convert(&self, id: &str, raw: f64) -> f64 {
        self.get(id).map(|c| c.convert(raw)).unwrap_or(0.0)
    }

    pub fn read_value(&self, id: &str) -> f64 {
        self.get(id).map(Channel::read_value).unwrap_or(0.0)
    }

    /// Adverts for the local hardware channels only. Embedded in discovery
    /// replies — relayed udp-in values are never re-advertised.
    pub fn describe_channels(&self) -> Vec<ChannelAdvert> {
        self.channels
            .iter()
            .filter(|c| !c.is_remote_input())
            .map(Channel::advert)
            .collect()
    }

    /// Point-in-time view of every channel, staleness included.
    pub fn snapshot(&self, now_ms: u64) -> Vec<ChannelSnapshot> {
        self.channels
            .iter()
            .map(|ch| ChannelSnapshot::capture(ch, now_ms))
            .collect()
    }
}

// ── Snapshot ──────────────────────────────────────────────────────────────────

/// Serializable per-channel view for diagnostics and the external API.
#[derive(Debug, Clone, Serialize)]
pub struct ChannelSnapshot {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub index: u32,
    pub k: f64,
    pub b: f64,
    pub unit: String,
    pub raw: f64,
    pub value: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote: Option<RemoteSnapshot>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RemoteSnapshot {
    /// Whether a binding was configured (as opposed to learned).
    pub configured: bool,
    pub status: RemoteStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub age_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_update_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_raw: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_unit: Option<String>,
    /// Resolved sender identity, falling back to the configured keys.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_mac: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_hostname: Option<String>,
}

impl ChannelSnapshot {
    fn capture(ch: &Channel, now_ms: u64) -> Self {
        let raw = ch.read_raw();
        let remote = ch.is_remote_input().then(|| {
            let state = ch.remote();
            let binding = ch.binding.as_ref();
            RemoteSnapshot {
                configured: binding.is_some(),
                status: state.status(now_ms),
                age_ms: state.age_ms(now_ms),
                last_update_ms: state.last_update_ms,
                last_raw: state.last_raw,
                last_value: state.converted_value(),
                channel_id: binding.and_then(|b| b.channel_id.clone()),
                channel_label: binding.and_then(|b| b.channel_label.clone()),
                channel_unit: binding.and_then(|b| b.channel_unit.clone()),
                source_mac: state
                    .resolved_mac
                    .clone()
                    .or_else(|| binding.and_then(|b| b.mac.clone())),
                source_ip: state
                    .resolved_ip
                    .clone()
                    .or_else(|| binding.and_then(|b| b.ip.clone())),
                source_hostname: state
                    .resolved_hostname
                    .clone()
                    .or_else(|| binding.and_then(|b| b.hostname.clone())),
            }
        });
        Self {
            id: ch.id.clone(),
            kind: ch.kind.clone(),
            index: ch.index,
            k: ch.k,
            b: ch.b,
            unit: ch.unit.clone(),
            raw,
            value: ch.convert(raw),
            remote,
        }
    }
}

fn clean_opt(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
