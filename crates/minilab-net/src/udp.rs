//! UDP datagram service.
//!
//! Owns the one socket the device uses for everything: heartbeat
//! broadcasts, discovery request/reply, and inbound value reports.
//! Driven cooperatively — the main loop calls `poll` and all work happens
//! synchronously inside it. `discover_peers` is the only blocking call,
//! bounded by its timeout.
//!
//! A bind failure (or `enabled = false`) leaves the service permanently
//! inert: the failure is logged once and every later call is a no-op.
//! The device keeps working, just without networking.

use std::io::ErrorKind;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::time::{Duration, Instant};

use socket2::{Domain, Protocol, Socket, Type};

use minilab_core::config::{DeviceConfig, UdpConfig};
use minilab_core::proto::{self, DeviceIdentity, Inbound, HEARTBEAT_INTERVAL_MS, RECV_BUF_BYTES};
use minilab_io::IoRegistry;

use crate::peers::{Discovery, DiscoveryStatus, PeerDirectory};

/// Sleep between socket polls inside a discovery cycle.
const DISCOVERY_POLL_SLEEP: Duration = Duration::from_millis(10);

pub struct UdpService {
    /// None = disabled or bind failed. Permanent for the process lifetime.
    socket: Option<UdpSocket>,
    rx_port: u16,
    tx_port: u16,
    broadcast: Ipv4Addr,
    identity: DeviceIdentity,
    epoch: Instant,
    last_send_ms: Option<u64>,
}

impl UdpService {
    /// Create the service and bind the receive socket.
    ///
    /// Never fails: a bind error degrades to "no networking" and is
    /// logged once here.
    pub fn new(udp: &UdpConfig, device: &DeviceConfig) -> Self {
        let broadcast = udp.broadcast_addr.parse::<Ipv4Addr>().unwrap_or_else(|e| {
            tracing::warn!(addr = %udp.broadcast_addr, error = %e,
                "invalid broadcast address, using 255.255.255.255");
            Ipv4Addr::BROADCAST
        });

        let mut rx_port = udp.port;
        let socket = if !udp.enabled {
            tracing::info!("udp service disabled by configuration");
            None
        } else {
            match bind_socket(udp.port) {
                Ok(socket) => {
                    if let Ok(addr) = socket.local_addr() {
                        rx_port = addr.port();
                    }
                    tracing::info!(port = rx_port, "udp rx port bound");
                    Some(socket)
                }
                Err(e) => {
                    tracing::error!(port = udp.port, error = %e,
                        "failed to bind udp port, networking disabled");
                    None
                }
            }
        };

        let identity = DeviceIdentity {
            mac: device.mac.trim().to_string(),
            hostname: device.hostname.trim().to_string(),
            ip: detect_local_ip(broadcast, udp.tx_port).unwrap_or_default(),
        };

        Self {
            socket,
            rx_port,
            tx_port: udp.tx_port,
            broadcast,
            identity,
            epoch: Instant::now(),
            last_send_ms: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.socket.is_some()
    }

    /// Bound receive port, once running. Differs from the configured port
    /// when the config asked for an ephemeral one.
    pub fn local_port(&self) -> Option<u16> {
        self.socket.as_ref().map(|_| self.rx_port)
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    /// Milliseconds since service creation. The local monotonic clock all
    /// cache timestamps are expressed in.
    pub fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    // ── Cooperative poll ──────────────────────────────────────────────────────

    /// One cooperative turn: read at most one pending datagram, then send
    /// a heartbeat if one is due. No-op while not running.
    pub fn poll(&mut self, registry: &mut IoRegistry) {
        if self.socket.is_none() {
            return;
        }
        let mut buf = [0u8; RECV_BUF_BYTES];
        if let Some((len, src)) = self.try_recv(&mut buf) {
            self.handle_packet(registry, &buf[..len], src);
        }
        self.maybe_heartbeat();
    }

    fn maybe_heartbeat(&mut self) {
        let now = self.now_ms();
        let due = self
            .last_send_ms
            .map_or(true, |last| now - last >= HEARTBEAT_INTERVAL_MS);
        if !due {
            return;
        }
        self.last_send_ms = Some(now);
        let dest = SocketAddrV4::new(self.broadcast, self.tx_port);
        match self.send_to(&proto::heartbeat(now), dest.into()) {
            Ok(n) => tracing::trace!(bytes = n, "heartbeat broadcast sent"),
            Err(e) => tracing::warn!(error = %e, "heartbeat broadcast failed"),
        }
    }

    // ── Inbound dispatch ──────────────────────────────────────────────────────

    fn handle_packet(&self, registry: &mut IoRegistry, data: &[u8], src: SocketAddr) {
        tracing::trace!(len = data.len(), src = %src, "udp rx");
        if let Some(msg) = proto::decode(data) {
            self.dispatch(registry, msg, src);
        }
    }

    fn dispatch(&self, registry: &mut IoRegistry, msg: Inbound, src: SocketAddr) {
        match msg {
            Inbound::Discover { mac } => {
                if self.is_own_mac(mac.as_deref()) {
                    tracing::debug!("ignoring own discovery request");
                    return;
                }
                self.send_discovery_reply(registry, src);
            }
            Inbound::DiscoverReply(_) => {
                // Only meaningful inside an active discovery cycle.
                tracing::debug!(src = %src, "discovery reply outside a cycle, dropping");
            }
            Inbound::Values(reports) => {
                let now = self.now_ms();
                let mut updated = 0;
                for mut report in reports {
                    // The datagram source fills in for a missing ip field.
                    if report.ip.is_none() {
                        report.ip = Some(src.ip().to_string());
                    }
                    updated += registry.update_remote_value(&report, now);
                }
                if updated == 0 {
                    tracing::debug!(src = %src, "value report matched no channels");
                }
            }
            Inbound::Heartbeat { ts } => {
                tracing::trace!(src = %src, ts, "peer heartbeat");
            }
        }
    }

    fn send_discovery_reply(&self, registry: &IoRegistry, dst: SocketAddr) {
        let inputs = registry.describe_channels();
        let payload = proto::discover_reply(&self.identity, self.rx_port, self.tx_port, &inputs);
        match self.send_to(&payload, dst) {
            Ok(_) => tracing::info!(dst = %dst, inputs = inputs.len(), "sent discovery reply"),
            Err(e) => tracing::warn!(dst = %dst, error = %e, "discovery reply send failed"),
        }
    }

    // ── Discovery cycle ───────────────────────────────────────────────────────

    /// Broadcast a discovery request, then collect replies until
    /// `timeout_ms` elapses. Blocks the caller for the whole window and
    /// returns the complete result at the end — no partial streaming, no
    /// mid-cycle abort.
    ///
    /// Non-reply traffic arriving during the cycle is routed through the
    /// normal inbound path so it is not lost.
    pub fn discover_peers(&mut self, registry: &mut IoRegistry, timeout_ms: u64) -> Discovery {
        if self.socket.is_none() {
            tracing::info!("discovery requested while udp is disabled");
            return Discovery {
                status: DiscoveryStatus::UdpDisabled,
                devices: Vec::new(),
                elapsed_ms: 0,
            };
        }

        tracing::info!(timeout_ms, "starting udp discovery broadcast");
        let request = proto::discover_request(&self.identity.mac);
        let dest = SocketAddrV4::new(self.broadcast, self.rx_port);
        if let Err(e) = self.send_to(&request, dest.into()) {
            tracing::warn!(error = %e, "discovery broadcast failed");
        }

        let start = Instant::now();
        let mut directory = PeerDirectory::new();
        let mut buf = [0u8; RECV_BUF_BYTES];
        let mut elapsed;

        loop {
            elapsed = start.elapsed().as_millis() as u64;
            if elapsed > timeout_ms {
                break;
            }
            let Some((len, src)) = self.try_recv(&mut buf) else {
                std::thread::sleep(DISCOVERY_POLL_SLEEP);
                continue;
            };
            match proto::decode(&buf[..len]) {
                Some(Inbound::DiscoverReply(reply)) => {
                    if self.is_own_mac(Some(&reply.mac)) {
                        tracing::trace!("ignoring own discovery reply");
                        continue;
                    }
                    tracing::debug!(mac = %reply.mac, src = %src, "peer discovered");
                    directory.merge(
                        reply,
                        src.ip().to_string(),
                        self.rx_port,
                        self.tx_port,
                        elapsed,
                    );
                }
                Some(other) => self.dispatch(registry, other, src),
                None => {}
            }
        }

        let devices = directory.into_records();
        let status = if devices.is_empty() {
            DiscoveryStatus::NoDevices
        } else {
            DiscoveryStatus::Ok
        };
        tracing::info!(devices = devices.len(), elapsed_ms = elapsed, "discovery cycle done");
        Discovery {
            status,
            devices,
            elapsed_ms: elapsed,
        }
    }

    // ── Socket helpers ────────────────────────────────────────────────────────

    fn try_recv(&self, buf: &mut [u8]) -> Option<(usize, SocketAddr)> {
        let socket = self.socket.as_ref()?;
        match socket.recv_from(buf) {
            Ok(r) => Some(r),
            Err(e) if e.kind() == ErrorKind::WouldBlock => None,
            Err(e) => {
                tracing::warn!(error = %e, "udp recv failed");
                None
            }
        }
    }

    fn send_to(&self, payload: &[u8], dst: SocketAddr) -> std::io::Result<usize> {
        match self.socket.as_ref() {
            Some(socket) => socket.send_to(payload, dst),
            None => Err(ErrorKind::NotConnected.into()),
        }
    }

    fn is_own_mac(&self, mac: Option<&str>) -> bool {
        match mac {
            Some(mac) => {
                !self.identity.mac.is_empty() && self.identity.mac.eq_ignore_ascii_case(mac.trim())
            }
            None => false,
        }
    }
}

/// Build the receive socket: reusable, broadcast-capable, non-blocking.
fn bind_socket(port: u16) -> std::io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.set_broadcast(true)?;
    socket.set_nonblocking(true)?;
    let bind_addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port);
    socket.bind(&bind_addr.into())?;
    Ok(socket.into())
}

/// Best-effort local address detection via a connected probe socket.
/// Returns None when the device has no usable route.
fn detect_local_ip(broadcast: Ipv4Addr, port: u16) -> Option<String> {
    let probe = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).ok()?;
    probe.set_broadcast(true).ok()?;
    probe.connect((broadcast, port)).ok()?;
    match probe.local_addr().ok()? {
        SocketAddr::V4(v4) => Some(v4.ip().to_string()),
        SocketAddr::V6(_) => None,
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
