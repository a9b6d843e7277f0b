//! Matcher — decides which udp-in channels an inbound value report
//! updates, and performs the update.
//!
//! Identity resolution, in order:
//!   1. Content match (OR): the report's id or label must equal the
//!      binding's configured channel id or label, case-insensitively.
//!      A channel without configured id/label keys matches on its own id.
//!   2. Host constraint (AND): if the binding names a mac, ip, or
//!      hostname, every named key must match the report.
//!   3. Opportunistic binding: an unconstrained channel adopts the
//!      matching sender's identity into its resolved fields. Display
//!      only — it never becomes a constraint, and a later sender using
//!      the same channel id re-resolves it (last writer wins).
//!
//! This is the only code path that mutates the remote value cache.

use minilab_core::proto::ValueReport;

use crate::registry::{Channel, IoRegistry, RemoteBinding};

impl IoRegistry {
    /// Apply one value report against every udp-in channel.
    ///
    /// Returns the number of channels updated — one report may fan out to
    /// several channels, or to none (not an error; the caller logs it).
    pub fn update_remote_value(&mut self, report: &ValueReport, now_ms: u64) -> usize {
        let id = clean(&report.channel_id);
        let label = clean(&report.label);
        let mac = clean(&report.mac);
        let ip = clean(&report.ip);
        let hostname = clean(&report.hostname);
        let unit = clean(&report.unit);
        let raw = report.raw.filter(|v| v.is_finite());
        let converted = report.converted.filter(|v| v.is_finite());

        let mut updated = 0;
        for ch in self.iter_mut() {
            if !ch.is_remote_input() {
                continue;
            }
            if !content_matches(ch, id, label) {
                continue;
            }
            if !host_matches(ch.binding.as_ref(), mac, ip, hostname) {
                continue;
            }

            apply_update(ch, id, label, mac, ip, hostname, unit, raw, converted, now_ms);
            updated += 1;
        }

        if updated > 0 {
            let source = hostname.or(mac).or(ip).unwrap_or("<unknown>");
            tracing::debug!(source, updated, "remote value matched");
        }
        updated
    }
}

/// Four-way OR across {report.id, report.label} × {binding.id, binding.label}.
/// Falls back to the channel's own id when the binding carries no keys.
fn content_matches(ch: &Channel, id: Option<&str>, label: Option<&str>) -> bool {
    let binding_keys = ch.binding.as_ref().map(|b| {
        (
            b.channel_id.as_deref(),
            b.channel_label.as_deref(),
        )
    });
    match binding_keys {
        Some((bind_id, bind_label)) if bind_id.is_some() || bind_label.is_some() => {
            eq_opt(bind_id, id)
                || eq_opt(bind_id, label)
                || eq_opt(bind_label, id)
                || eq_opt(bind_label, label)
        }
        _ => eq_opt(Some(&ch.id), id) || eq_opt(Some(&ch.id), label),
    }
}

/// Every host key the binding specifies must match the report (AND).
/// Unspecified keys impose no constraint.
fn host_matches(
    binding: Option<&RemoteBinding>,
    mac: Option<&str>,
    ip: Option<&str>,
    hostname: Option<&str>,
) -> bool {
    let Some(binding) = binding else { return true };
    for (configured, reported) in [
        (binding.mac.as_deref(), mac),
        (binding.ip.as_deref(), ip),
        (binding.hostname.as_deref(), hostname),
    ] {
        if configured.is_some() && !eq_opt(configured, reported) {
            return false;
        }
    }
    true
}

#[allow(clippy::too_many_arguments)]
fn apply_update(
    ch: &mut Channel,
    id: Option<&str>,
    label: Option<&str>,
    mac: Option<&str>,
    ip: Option<&str>,
    hostname: Option<&str>,
    unit: Option<&str>,
    raw: Option<f64>,
    converted: Option<f64>,
    now_ms: u64,
) {
    let state = ch.remote_mut();
    state.last_update_ms = Some(now_ms);
    if let Some(v) = raw {
        state.last_raw = Some(v);
    }
    if let Some(v) = converted {
        state.last_converted = Some(v);
    }

    // Resolved identity tracks the most recent successful updater.
    if let Some(v) = mac {
        state.resolved_mac = Some(v.to_string());
    }
    if let Some(v) = ip {
        state.resolved_ip = Some(v.to_string());
    }
    if let Some(v) = hostname {
        state.resolved_hostname = Some(v.to_string());
    }

    // A previously unbound channel learns the report's channel keys so the
    // snapshot can show what it is mirroring. Host keys are deliberately
    // not learned — they would turn into constraints.
    let binding = ch.binding.get_or_insert_with(RemoteBinding::default);
    if binding.channel_id.is_none() {
        if let Some(v) = id {
            binding.channel_id = Some(v.to_string());
        }
    }
    if binding.channel_label.is_none() {
        let learned = label.or(id);
        if let Some(v) = learned {
            binding.channel_label = Some(v.to_string());
        }
    }
    if let Some(unit) = unit {
        if binding.channel_unit.is_none() {
            binding.channel_unit = Some(unit.to_string());
        }
        if ch.unit.is_empty() {
            ch.unit = unit.to_string();
        }
    }
}

fn clean(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn eq_opt(a: Option<&str>, b: Option<&str>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
        _ => false,
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
