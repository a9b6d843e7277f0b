//! minilab integration test harness.
//!
//! Tests drive a real `UdpService` over loopback sockets: the service
//! binds an ephemeral port, plain `std::net::UdpSocket` clients play the
//! role of peer devices, and the test thread pumps `poll` the way the
//! device's main loop would. No namespaces or privileges required.

use std::io::ErrorKind;
use std::net::UdpSocket;
use std::time::{Duration, Instant};

use minilab_core::config::{ChannelConfig, DeviceConfig, RemoteConfig, UdpConfig};
use minilab_io::{Channel, IoRegistry};
use minilab_net::UdpService;

mod discovery;
mod values;

// ── Harness ───────────────────────────────────────────────────────────────────

pub const SVC_MAC: &str = "AA:BB:CC:DD:EE:01";

/// A service bound to an ephemeral loopback port, heartbeats aimed at
/// `tx_port` so a drain socket can observe them.
pub fn loopback_service(tx_port: u16) -> UdpService {
    let udp = UdpConfig {
        enabled: true,
        port: 0,
        tx_port,
        broadcast_addr: "127.0.0.1".to_string(),
    };
    let device = DeviceConfig {
        mac: SVC_MAC.to_string(),
        hostname: "itest".to_string(),
    };
    let svc = UdpService::new(&udp, &device);
    assert!(svc.is_running(), "loopback service must bind");
    svc
}

/// Socket that absorbs heartbeat broadcasts (and can assert on them).
pub fn drain_socket() -> UdpSocket {
    let socket = UdpSocket::bind("127.0.0.1:0").expect("drain bind");
    socket
        .set_read_timeout(Some(Duration::from_secs(2)))
        .expect("drain timeout");
    socket
}

/// Client socket playing a peer device.
pub fn peer_socket() -> UdpSocket {
    let socket = UdpSocket::bind("127.0.0.1:0").expect("peer bind");
    socket.set_nonblocking(true).expect("peer nonblocking");
    socket
}

pub fn send_json(client: &UdpSocket, svc: &UdpService, payload: &str) {
    let port = svc.local_port().expect("service port");
    client
        .send_to(payload.as_bytes(), ("127.0.0.1", port))
        .expect("send to service");
}

/// Pump the service until `done` or a 2 s deadline. Returns whether the
/// condition was reached.
pub fn pump<F>(svc: &mut UdpService, registry: &mut IoRegistry, mut done: F) -> bool
where
    F: FnMut(&IoRegistry) -> bool,
{
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        svc.poll(registry);
        if done(registry) {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    false
}

/// Pump the service while waiting for a datagram on `client`.
pub fn pump_until_recv(
    client: &UdpSocket,
    svc: &mut UdpService,
    registry: &mut IoRegistry,
) -> Option<serde_json::Value> {
    let deadline = Instant::now() + Duration::from_secs(2);
    let mut buf = [0u8; 2048];
    while Instant::now() < deadline {
        svc.poll(registry);
        match client.recv_from(&mut buf) {
            Ok((len, _)) => return serde_json::from_slice(&buf[..len]).ok(),
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(5));
            }
            Err(_) => break,
        }
    }
    None
}

pub fn hardware_channel(id: &str) -> Channel {
    Channel::from_config(&ChannelConfig {
        id: id.to_string(),
        ..ChannelConfig::default()
    })
}

pub fn remote_channel(id: &str, remote: Option<RemoteConfig>) -> Channel {
    Channel::from_config(&ChannelConfig {
        id: id.to_string(),
        kind: "udp-in".to_string(),
        unit: String::new(),
        remote,
        ..ChannelConfig::default()
    })
}

pub fn bound_to(remote_id: &str) -> Option<RemoteConfig> {
    Some(RemoteConfig {
        channel_id: Some(remote_id.to_string()),
        ..RemoteConfig::default()
    })
}
