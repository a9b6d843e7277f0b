//! Discovery request/reply and the bounded discovery cycle.

use crate::*;

use std::net::UdpSocket;
use std::time::{Duration, Instant};

use minilab_io::IoRegistry;
use minilab_net::DiscoveryStatus;

#[test]
fn discover_request_gets_unicast_reply_with_local_inputs_only() {
    let drain = drain_socket();
    let mut svc = loopback_service(drain.local_addr().unwrap().port());
    let mut registry = IoRegistry::new();
    registry.add_channel(hardware_channel("A0")).unwrap();
    registry
        .add_channel(remote_channel("rtemp", bound_to("T1")))
        .unwrap();

    let client = peer_socket();
    send_json(
        &client,
        &svc,
        r#"{"cmd":"discover","mac":"11:22:33:44:55:66"}"#,
    );

    let reply = pump_until_recv(&client, &mut svc, &mut registry)
        .expect("expected a unicast discovery reply");

    assert_eq!(reply["type"], "discover_reply");
    assert_eq!(reply["mac"], SVC_MAC);
    assert_eq!(reply["hostname"], "itest");
    assert_eq!(
        reply["rx_port"].as_u64().unwrap(),
        u64::from(svc.local_port().unwrap())
    );

    // Only the hardware channel is advertised — the udp-in channel is
    // itself relayed and must not be re-advertised.
    let inputs = reply["inputs"].as_array().unwrap();
    assert_eq!(inputs.len(), 1);
    assert_eq!(inputs[0]["id"], "A0");
}

#[test]
fn own_discovery_request_is_not_answered() {
    let drain = drain_socket();
    let mut svc = loopback_service(drain.local_addr().unwrap().port());
    let mut registry = IoRegistry::new();
    registry.add_channel(hardware_channel("A0")).unwrap();

    let client = peer_socket();
    // Request carrying our own MAC — looped-back broadcast, must be ignored.
    send_json(
        &client,
        &svc,
        &format!(r#"{{"cmd":"discover","mac":"{}"}}"#, SVC_MAC.to_lowercase()),
    );

    let deadline = Instant::now() + Duration::from_millis(300);
    let mut buf = [0u8; 512];
    while Instant::now() < deadline {
        svc.poll(&mut registry);
        if client.recv_from(&mut buf).is_ok() {
            panic!("service answered its own discovery request");
        }
        std::thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn discovery_cycle_dedups_by_mac_and_keeps_the_later_reply() {
    let drain = drain_socket();
    let mut svc = loopback_service(drain.local_addr().unwrap().port());
    let mut registry = IoRegistry::new();
    registry.add_channel(remote_channel("rtemp", None)).unwrap();

    let svc_port = svc.local_port().unwrap();
    let sender = std::thread::spawn(move || {
        let client = UdpSocket::bind("127.0.0.1:0").expect("sender bind");
        let dst = ("127.0.0.1", svc_port);
        std::thread::sleep(Duration::from_millis(100));
        client
            .send_to(
                br#"{"type":"discover_reply","mac":"AA:BB:01","hostname":"first","inputs":[{"id":"T1","type":"a0","unit":"V"}]}"#,
                dst,
            )
            .unwrap();
        client
            .send_to(
                br#"{"type":"discover_reply","mac":"aa:bb:01","hostname":"second","inputs":[]}"#,
                dst,
            )
            .unwrap();
        client
            .send_to(
                br#"{"type":"discover_reply","mac":"CC:DD:02","hostname":"other"}"#,
                dst,
            )
            .unwrap();
        // Ordinary traffic mid-cycle must still reach the matcher.
        client
            .send_to(br#"{"cmd":"value","id":"rtemp","value":5}"#, dst)
            .unwrap();
    });

    let result = svc.discover_peers(&mut registry, 500);
    sender.join().unwrap();

    assert_eq!(result.status, DiscoveryStatus::Ok);
    assert!(result.elapsed_ms >= 500);
    assert_eq!(result.devices.len(), 2);

    let merged = result
        .devices
        .iter()
        .find(|d| d.mac.eq_ignore_ascii_case("AA:BB:01"))
        .expect("deduplicated peer present");
    // later reply replaced the earlier one wholesale
    assert_eq!(merged.hostname, "second");
    assert!(merged.inputs.is_empty());
    assert_eq!(merged.ip, "127.0.0.1");

    // the mid-cycle value report was not lost
    let ch = registry.get("rtemp").unwrap();
    assert_eq!(ch.remote().last_converted, Some(5.0));
}

#[test]
fn discovery_cycle_without_replies_reports_no_devices() {
    let drain = drain_socket();
    let mut svc = loopback_service(drain.local_addr().unwrap().port());
    let mut registry = IoRegistry::new();

    let result = svc.discover_peers(&mut registry, 120);
    assert_eq!(result.status, DiscoveryStatus::NoDevices);
    assert!(result.devices.is_empty());
    assert!(result.elapsed_ms >= 120);
}
