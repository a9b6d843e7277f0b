//! minilabd — minilab measurement device daemon.
//!
//! Runs the cooperative loop: every turn polls the UDP service once
//! (inbound dispatch + heartbeat), then yields. `minilabd discover [ms]`
//! instead runs one bounded discovery cycle and prints the result.

use std::time::Duration;

use anyhow::Result;

use minilab_core::config::MinilabConfig;
use minilab_io::IoRegistry;
use minilab_net::UdpService;

/// Idle yield between cooperative turns.
const POLL_SLEEP: Duration = Duration::from_millis(10);

/// Default discovery window. Kept short: discovery blocks the loop.
const DEFAULT_DISCOVER_MS: u64 = 600;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    if let Err(e) = MinilabConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = MinilabConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        MinilabConfig::default()
    });

    if config.device.mac.is_empty() {
        tracing::warn!("device.mac is not configured — peers cannot deduplicate us");
    }

    let mut registry = IoRegistry::from_config(&config.channels);
    let mut service = UdpService::new(&config.udp, &config.device);
    tracing::info!(
        hostname = %config.device.hostname,
        running = service.is_running(),
        "minilabd starting"
    );

    if std::env::args().nth(1).as_deref() == Some("discover") {
        let timeout_ms = std::env::args()
            .nth(2)
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_DISCOVER_MS);
        let result = service.discover_peers(&mut registry, timeout_ms);
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    loop {
        service.poll(&mut registry);
        std::thread::sleep(POLL_SLEEP);
    }
}
