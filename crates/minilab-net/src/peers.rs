//! Peer directory — devices seen during one discovery cycle.
//!
//! The directory lives only for the duration of a single `discover_peers`
//! call. Entries are keyed on MAC, case-insensitively: a replayed or
//! duplicate reply replaces the earlier entry rather than accumulating.

use serde::Serialize;

use minilab_core::proto::{ChannelAdvert, PeerReply};

/// One peer as assembled from its discovery reply.
#[derive(Debug, Clone, Serialize)]
pub struct PeerRecord {
    pub mac: String,
    pub hostname: String,
    pub ip: String,
    pub rx_port: u16,
    pub tx_port: u16,
    pub inputs: Vec<ChannelAdvert>,
    /// Elapsed time into the discovery cycle when this reply arrived.
    #[serde(rename = "lastSeenMs")]
    pub last_seen_ms: u64,
}

/// Result of one discovery cycle, returned atomically at the end.
#[derive(Debug, Clone, Serialize)]
pub struct Discovery {
    pub status: DiscoveryStatus,
    pub devices: Vec<PeerRecord>,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryStatus {
    Ok,
    NoDevices,
    UdpDisabled,
}

/// Cycle-scoped collection of peer records.
#[derive(Debug, Default)]
pub struct PeerDirectory {
    peers: Vec<PeerRecord>,
}

impl PeerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a discovery reply.
    ///
    /// An existing entry with the same MAC (case-insensitive) is replaced
    /// wholesale by the new payload. Replies without a MAC cannot be
    /// deduplicated and are always appended. Missing address fields fall
    /// back to the datagram source and to our own port defaults.
    pub fn merge(
        &mut self,
        reply: PeerReply,
        observed_ip: String,
        default_rx: u16,
        default_tx: u16,
        elapsed_ms: u64,
    ) {
        let record = PeerRecord {
            mac: reply.mac,
            hostname: reply.hostname,
            ip: if reply.ip.is_empty() {
                observed_ip
            } else {
                reply.ip
            },
            rx_port: reply.rx_port.unwrap_or(default_rx),
            tx_port: reply.tx_port.unwrap_or(default_tx),
            inputs: reply.inputs,
            last_seen_ms: elapsed_ms,
        };

        if !record.mac.is_empty() {
            if let Some(existing) = self
                .peers
                .iter_mut()
                .find(|p| p.mac.eq_ignore_ascii_case(&record.mac))
            {
                *existing = record;
                return;
            }
        }
        self.peers.push(record);
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Consume the directory at the end of the cycle.
    pub fn into_records(self) -> Vec<PeerRecord> {
        self.peers
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
