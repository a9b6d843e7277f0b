//! minilab-net — LAN peer networking for the minilab device.
//!
//! One UDP socket, driven cooperatively: the owner calls `poll` from its
//! main loop and everything (heartbeat, discovery replies, value intake)
//! happens synchronously inside that call. No threads, no locks.

pub mod peers;
pub mod udp;

pub use peers::{Discovery, DiscoveryStatus, PeerDirectory, PeerRecord};
pub use udp::UdpService;
