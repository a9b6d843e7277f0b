//! Value reports over the wire: cache updates, fan-out, host constraints,
//! heartbeats, and malformed traffic.

use crate::*;

use minilab_core::config::RemoteConfig;
use minilab_io::{IoRegistry, RemoteStatus};

#[test]
fn value_report_updates_cache_and_resolves_sender_ip() {
    let drain = drain_socket();
    let mut svc = loopback_service(drain.local_addr().unwrap().port());
    let mut registry = IoRegistry::new();
    registry
        .add_channel(remote_channel("rt", bound_to("T1")))
        .unwrap();

    let client = peer_socket();
    send_json(
        &client,
        &svc,
        r#"{"cmd":"value","id":"T1","value":3.7,"unit":"C"}"#,
    );

    assert!(pump(&mut svc, &mut registry, |reg| {
        reg.get("rt").unwrap().remote().last_converted.is_some()
    }));

    let ch = registry.get("rt").unwrap();
    assert_eq!(ch.remote().last_converted, Some(3.7));
    // the datagram source filled in for the missing ip field
    assert_eq!(ch.remote().resolved_ip.as_deref(), Some("127.0.0.1"));
    assert_eq!(ch.unit, "C");
    assert_eq!(ch.remote().status(svc.now_ms()), RemoteStatus::Online);

    let snapshot = registry.snapshot(svc.now_ms());
    let remote = snapshot[0].remote.as_ref().unwrap();
    assert_eq!(remote.status, RemoteStatus::Online);
    assert_eq!(remote.last_value, Some(3.7));
    assert_eq!(remote.source_ip.as_deref(), Some("127.0.0.1"));
}

#[test]
fn batch_report_fans_out_across_bound_channels() {
    let drain = drain_socket();
    let mut svc = loopback_service(drain.local_addr().unwrap().port());
    let mut registry = IoRegistry::new();
    registry
        .add_channel(remote_channel("mirror-a", bound_to("T1")))
        .unwrap();
    registry
        .add_channel(remote_channel("mirror-b", bound_to("T1")))
        .unwrap();
    registry
        .add_channel(remote_channel("volts", bound_to("V1")))
        .unwrap();

    let client = peer_socket();
    send_json(
        &client,
        &svc,
        r#"{"cmd":"values","values":[{"id":"T1","value":21.5},{"id":"V1","raw":"512"}]}"#,
    );

    assert!(pump(&mut svc, &mut registry, |reg| {
        reg.get("volts").unwrap().remote().last_raw.is_some()
    }));

    // one batch entry updated two channels, the other one
    assert_eq!(
        registry.get("mirror-a").unwrap().remote().last_converted,
        Some(21.5)
    );
    assert_eq!(
        registry.get("mirror-b").unwrap().remote().last_converted,
        Some(21.5)
    );
    let volts = registry.get("volts").unwrap().remote();
    assert_eq!(volts.last_raw, Some(512.0));
    // raw-only entry seeds the converted reading
    assert_eq!(volts.converted_value(), Some(512.0));
}

#[test]
fn host_constrained_channel_rejects_other_senders() {
    let drain = drain_socket();
    let mut svc = loopback_service(drain.local_addr().unwrap().port());
    let mut registry = IoRegistry::new();
    registry
        .add_channel(remote_channel(
            "pinned",
            Some(RemoteConfig {
                channel_id: Some("T1".to_string()),
                hostname: Some("bench-b".to_string()),
                ..RemoteConfig::default()
            }),
        ))
        .unwrap();

    let client = peer_socket();
    send_json(
        &client,
        &svc,
        r#"{"cmd":"value","id":"T1","value":9.9,"hostname":"impostor"}"#,
    );
    // give the impostor report time to be (not) applied
    let matched = pump(&mut svc, &mut registry, |reg| {
        reg.get("pinned").unwrap().remote().last_converted.is_some()
    });
    assert!(!matched, "host-constrained channel accepted a wrong sender");

    send_json(
        &client,
        &svc,
        r#"{"cmd":"value","id":"T1","value":4.2,"hostname":"BENCH-B"}"#,
    );
    assert!(pump(&mut svc, &mut registry, |reg| {
        reg.get("pinned").unwrap().remote().last_converted.is_some()
    }));
    assert_eq!(
        registry.get("pinned").unwrap().remote().last_converted,
        Some(4.2)
    );
}

#[test]
fn heartbeat_is_broadcast_to_the_tx_port() {
    let drain = drain_socket();
    let mut svc = loopback_service(drain.local_addr().unwrap().port());
    let mut registry = IoRegistry::new();

    // first poll sends the initial heartbeat
    svc.poll(&mut registry);

    let mut buf = [0u8; 512];
    let (len, _) = drain.recv_from(&mut buf).expect("heartbeat expected");
    let msg: serde_json::Value = serde_json::from_slice(&buf[..len]).unwrap();
    assert_eq!(msg["msg"], "heartbeat");
    assert!(msg["ts"].is_u64());
}

#[test]
fn malformed_and_oversized_packets_leave_state_untouched() {
    let drain = drain_socket();
    let mut svc = loopback_service(drain.local_addr().unwrap().port());
    let mut registry = IoRegistry::new();
    registry
        .add_channel(remote_channel("rt", bound_to("T1")))
        .unwrap();

    let client = peer_socket();
    send_json(&client, &svc, "{{{ not json");
    // valid JSON, but truncated at the 512-byte receive buffer
    let oversized = format!(
        r#"{{"cmd":"value","id":"T1","value":1.0,"pad":"{}"}}"#,
        "x".repeat(800)
    );
    send_json(&client, &svc, &oversized);

    let matched = pump(&mut svc, &mut registry, |reg| {
        reg.get("rt").unwrap().remote().last_update_ms.is_some()
    });
    assert!(!matched, "malformed traffic must not update the cache");

    // the service is still alive afterwards
    send_json(&client, &svc, r#"{"cmd":"value","id":"T1","value":2.0}"#);
    assert!(pump(&mut svc, &mut registry, |reg| {
        reg.get("rt").unwrap().remote().last_converted == Some(2.0)
    }));
}
