//! minilab wire protocol — JSON datagrams exchanged between devices.
//!
//! Peers on the LAN speak a loosely-typed JSON dialect: the same logical
//! field arrives under several names depending on the sender's firmware
//! generation, and numbers arrive as integers, floats, or numeric strings.
//! Decoding therefore resolves every logical field through an ordered
//! synonym table — adding a synonym changes only data, never control flow.
//!
//! Decode never fails loudly: a malformed datagram yields `None` and the
//! caller drops it.

use serde::Serialize;
use serde_json::{Map, Value};

// ── Protocol constants ────────────────────────────────────────────────────────

/// Default UDP port devices listen on.
pub const DEFAULT_RX_PORT: u16 = 50000;

/// Default UDP port heartbeats are broadcast to.
pub const DEFAULT_TX_PORT: u16 = 50001;

/// Receive buffer capacity. Oversized datagrams are truncated to this,
/// which breaks the JSON structure and gets dropped by decode.
pub const RECV_BUF_BYTES: usize = 512;

/// Interval between heartbeat broadcasts, milliseconds.
pub const HEARTBEAT_INTERVAL_MS: u64 = 1000;

/// A cached remote value older than this is reported as stale.
pub const STALE_AFTER_MS: u64 = 5000;

// ── Synonym tables ────────────────────────────────────────────────────────────
//
// One ordered candidate list per logical field. First present key wins.
// Channel-scoped fields are tried at the top level first, then inside a
// nested "channel" object.

const CMD_KEYS: &[&str] = &["cmd", "type"];
const CHANNEL_ID_KEYS: &[&str] = &["channelId", "channel_id", "id"];
const LABEL_KEYS: &[&str] = &["channelLabel", "channel_label", "label", "name"];
const RAW_KEYS: &[&str] = &["raw"];
const CONVERTED_KEYS: &[&str] = &["value", "converted"];
const UNIT_KEYS: &[&str] = &["unit"];
const MAC_KEYS: &[&str] = &["mac", "source_mac"];
const HOSTNAME_KEYS: &[&str] = &["hostname", "source_hostname"];
const IP_KEYS: &[&str] = &["ip", "source_ip"];
const BATCH_KEYS: &[&str] = &["values", "channels"];

// ── Message types ─────────────────────────────────────────────────────────────

/// One channel as advertised in a discovery reply.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelAdvert {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub index: u32,
    pub unit: String,
    pub k: f64,
    pub b: f64,
}

/// A peer's discovery reply payload.
#[derive(Debug, Clone, PartialEq)]
pub struct PeerReply {
    pub mac: String,
    pub hostname: String,
    pub ip: String,
    pub rx_port: Option<u16>,
    pub tx_port: Option<u16>,
    pub inputs: Vec<ChannelAdvert>,
}

/// One channel reading extracted from a value report.
///
/// Every field is optional — the matcher decides what is enough to
/// identify a channel. Numeric fields are guaranteed finite.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValueReport {
    pub channel_id: Option<String>,
    pub label: Option<String>,
    pub raw: Option<f64>,
    pub converted: Option<f64>,
    pub unit: Option<String>,
    pub mac: Option<String>,
    pub hostname: Option<String>,
    pub ip: Option<String>,
}

impl ValueReport {
    /// True when the report carries something a matcher could key on.
    pub fn has_identity(&self) -> bool {
        self.channel_id.is_some() || self.label.is_some()
    }
}

/// A decoded inbound datagram.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// `{cmd|type: "discover"|"list_inputs"}` — reply with our channel list.
    Discover { mac: Option<String> },
    /// `{type|cmd: "discover_reply", ...}` — consumed during a discovery cycle.
    DiscoverReply(PeerReply),
    /// One or more channel readings (single report or batch).
    Values(Vec<ValueReport>),
    /// `{ts, msg: "heartbeat"}` — presence only, no state change.
    Heartbeat { ts: Option<u64> },
}

// ── Decode ────────────────────────────────────────────────────────────────────

/// Decode a raw datagram into a structured message.
///
/// Returns `None` for anything unusable: non-JSON bytes (logged at warn,
/// this includes truncated payloads) and well-formed JSON without a
/// recognized tag (logged at debug). Pure and stateless.
pub fn decode(buf: &[u8]) -> Option<Inbound> {
    let value: Value = match serde_json::from_slice(buf) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(error = %e, len = buf.len(), "udp payload is not valid json");
            return None;
        }
    };
    let obj = match value.as_object() {
        Some(o) => o,
        None => {
            tracing::debug!("udp payload is not a json object");
            return None;
        }
    };

    match first_str(obj, CMD_KEYS).as_deref() {
        Some("discover") | Some("list_inputs") => Some(Inbound::Discover {
            mac: first_str(obj, MAC_KEYS),
        }),
        Some("discover_reply") => Some(Inbound::DiscoverReply(parse_reply(obj))),
        Some("value") | Some("channel_value") => {
            Some(Inbound::Values(vec![parse_report(obj, None)]))
        }
        Some("values") | Some("snapshot") => Some(Inbound::Values(parse_batch(obj))),
        Some(other) => {
            tracing::debug!(cmd = other, "unrecognized udp command, dropping");
            None
        }
        None => {
            // Heartbeats carry no cmd/type, only a "msg" marker.
            if obj.get("msg").and_then(Value::as_str) == Some("heartbeat") {
                return Some(Inbound::Heartbeat {
                    ts: first_num(obj, &["ts"]).map(|v| v as u64),
                });
            }
            tracing::debug!("udp payload has no command tag, dropping");
            None
        }
    }
}

/// Extract a single value report from `obj`.
///
/// Channel-scoped fields fall back to a nested "channel" object; sender
/// identity fields fall back to `outer` (the enclosing batch message).
fn parse_report(obj: &Map<String, Value>, outer: Option<&Map<String, Value>>) -> ValueReport {
    let nested = obj.get("channel").and_then(Value::as_object);
    let channel_field = |keys| lookup_str(obj, nested, keys);
    let channel_num = |keys| lookup_num(obj, nested, keys);
    let sender_field = |keys| lookup_str(obj, outer, keys);

    ValueReport {
        channel_id: channel_field(CHANNEL_ID_KEYS),
        label: channel_field(LABEL_KEYS),
        raw: channel_num(RAW_KEYS),
        converted: channel_num(CONVERTED_KEYS),
        unit: channel_field(UNIT_KEYS),
        mac: sender_field(MAC_KEYS),
        hostname: sender_field(HOSTNAME_KEYS),
        ip: sender_field(IP_KEYS),
    }
}

/// Expand a batch message into individual reports.
///
/// Entries come from a "values" or "channels" array, or from a nested
/// "channel" object, or — as a last resort — from the top-level object
/// itself when it carries an "id".
fn parse_batch(obj: &Map<String, Value>) -> Vec<ValueReport> {
    for key in BATCH_KEYS {
        if let Some(arr) = obj.get(*key).and_then(Value::as_array) {
            return arr
                .iter()
                .filter_map(Value::as_object)
                .map(|entry| parse_report(entry, Some(obj)))
                .collect();
        }
    }
    if obj.get("channel").and_then(Value::as_object).is_some() {
        return vec![parse_report(obj, None)];
    }
    let fallback = parse_report(obj, None);
    if fallback.has_identity() {
        vec![fallback]
    } else {
        Vec::new()
    }
}

fn parse_reply(obj: &Map<String, Value>) -> PeerReply {
    let inputs = obj
        .get("inputs")
        .and_then(Value::as_array)
        .map(|arr| arr.iter().filter_map(parse_advert).collect())
        .unwrap_or_default();

    PeerReply {
        mac: first_str(obj, MAC_KEYS).unwrap_or_default(),
        hostname: first_str(obj, HOSTNAME_KEYS).unwrap_or_default(),
        ip: first_str(obj, IP_KEYS).unwrap_or_default(),
        rx_port: first_port(obj, &["rx_port", "rxPort"]),
        tx_port: first_port(obj, &["tx_port", "txPort"]),
        inputs,
    }
}

fn parse_advert(value: &Value) -> Option<ChannelAdvert> {
    let obj = value.as_object()?;
    Some(ChannelAdvert {
        id: first_str(obj, &["id"]).unwrap_or_default(),
        kind: first_str(obj, &["type"]).unwrap_or_default(),
        index: first_num(obj, &["index"]).map(|v| v as u32).unwrap_or(0),
        unit: first_str(obj, UNIT_KEYS).unwrap_or_default(),
        k: first_num(obj, &["k"]).unwrap_or(0.0),
        b: first_num(obj, &["b"]).unwrap_or(0.0),
    })
}

// ── Field extraction helpers ──────────────────────────────────────────────────

/// First non-empty string under any of `keys`, trimmed.
fn first_str(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    for key in keys {
        if let Some(s) = obj.get(*key).and_then(Value::as_str) {
            let s = s.trim();
            if !s.is_empty() {
                return Some(s.to_string());
            }
        }
    }
    None
}

/// First finite number under any of `keys`.
///
/// Accepts integers, floats, and numeric strings. Non-finite or
/// unparsable values leave the field absent.
fn first_num(obj: &Map<String, Value>, keys: &[&str]) -> Option<f64> {
    for key in keys {
        let parsed = match obj.get(*key) {
            Some(Value::Number(n)) => n.as_f64(),
            Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
            _ => None,
        };
        if let Some(v) = parsed {
            if v.is_finite() {
                return Some(v);
            }
        }
    }
    None
}

fn first_port(obj: &Map<String, Value>, keys: &[&str]) -> Option<u16> {
    first_num(obj, keys)
        .filter(|v| *v >= 0.0 && *v <= f64::from(u16::MAX))
        .map(|v| v as u16)
}

fn lookup_str(
    obj: &Map<String, Value>,
    fallback: Option<&Map<String, Value>>,
    keys: &[&str],
) -> Option<String> {
    first_str(obj, keys).or_else(|| fallback.and_then(|f| first_str(f, keys)))
}

fn lookup_num(
    obj: &Map<String, Value>,
    fallback: Option<&Map<String, Value>>,
    keys: &[&str],
) -> Option<f64> {
    first_num(obj, keys).or_else(|| fallback.and_then(|f| first_num(f, keys)))
}

// ── Encode ────────────────────────────────────────────────────────────────────

/// This device's identity as embedded in outbound messages.
#[derive(Debug, Clone, Default)]
pub struct DeviceIdentity {
    pub mac: String,
    pub hostname: String,
    pub ip: String,
}

#[derive(Serialize)]
struct HeartbeatMsg {
    ts: u64,
    msg: &'static str,
}

#[derive(Serialize)]
struct DiscoverRequestMsg<'a> {
    cmd: &'static str,
    mac: &'a str,
}

#[derive(Serialize)]
struct DiscoverReplyMsg<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    mac: &'a str,
    hostname: &'a str,
    ip: &'a str,
    rx_port: u16,
    tx_port: u16,
    inputs: &'a [ChannelAdvert],
}

/// Periodic presence broadcast: `{ts, msg: "heartbeat"}`.
pub fn heartbeat(now_ms: u64) -> Vec<u8> {
    serde_json::to_vec(&HeartbeatMsg {
        ts: now_ms,
        msg: "heartbeat",
    })
    .expect("heartbeat serialization failed")
}

/// Discovery broadcast: `{cmd: "discover", mac}`.
pub fn discover_request(mac: &str) -> Vec<u8> {
    serde_json::to_vec(&DiscoverRequestMsg {
        cmd: "discover",
        mac,
    })
    .expect("discover request serialization failed")
}

/// Unicast discovery reply.
///
/// `inputs` must already exclude remote-input channels — a device never
/// re-advertises values it is itself relaying from elsewhere.
pub fn discover_reply(
    identity: &DeviceIdentity,
    rx_port: u16,
    tx_port: u16,
    inputs: &[ChannelAdvert],
) -> Vec<u8> {
    serde_json::to_vec(&DiscoverReplyMsg {
        kind: "discover_reply",
        mac: &identity.mac,
        hostname: &identity.hostname,
        ip: &identity.ip,
        rx_port,
        tx_port,
        inputs,
    })
    .expect("discover reply serialization failed")
}

// ── Tests ─────────────────────────────────────────────────────────────────────
