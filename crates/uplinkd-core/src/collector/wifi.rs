//! Wi-Fi uplink collector (`spec.md` §4.1), grounded on `iw dev <iface> link`
//! for associated-link signal and `iw dev <iface> station dump` for the
//! finer-grained station stats — the same `ip`/`iw`-style subprocess
//! pattern the teacher's `hardware.rs` uses for interface state.

use std::process::Command;
use std::time::Instant;

use uplinkd_types::{Member, MemberClass, Metrics};

use super::ping::PingCollector;
use super::{CollectionError, CollectionErrorKind, Collector};
use crate::retry::RetryPolicy;

#[derive(Debug, Clone, Copy, Default)]
struct LinkReading {
    signal_dbm: Option<f64>,
    link_quality: Option<f64>,
}

pub struct WifiCollector {
    ping_fallback: PingCollector,
    retry: RetryPolicy,
}

impl Default for WifiCollector {
    fn default() -> Self {
        WifiCollector {
            ping_fallback: PingCollector::default(),
            retry: RetryPolicy::default(),
        }
    }
}

impl WifiCollector {
    fn link_get(&self, iface: &str) -> Result<LinkReading, CollectionErrorKind> {
        let output = Command::new("iw")
            .arg("dev")
            .arg(iface)
            .arg("link")
            .output()
            .map_err(|_| CollectionErrorKind::Unreachable)?;
        if !output.status.success() {
            return Err(CollectionErrorKind::Unreachable);
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        if stdout.trim_start().starts_with("Not connected.") {
            return Err(CollectionErrorKind::Unreachable);
        }
        parse_iw_link(&stdout).ok_or(CollectionErrorKind::Parse)
    }
}

/// Parses `iw dev <iface> link` output, e.g.:
/// ```text
/// Connected to aa:bb:cc:dd:ee:ff (on wlan0)
///         SSID: homenet
///         signal: -52 dBm
///         tx bitrate: 433.3 MBit/s
/// ```
fn parse_iw_link(text: &str) -> Option<LinkReading> {
    if !text.contains("Connected to") {
        return None;
    }
    let mut reading = LinkReading::default();
    for line in text.lines() {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("signal:") {
            reading.signal_dbm = rest.trim().split_whitespace().next().and_then(|v| v.parse().ok());
        }
        if let Some(rest) = line.strip_prefix("signal avg:") {
            reading.signal_dbm = rest.trim().split_whitespace().next().and_then(|v| v.parse().ok());
        }
    }
    // `iw` has no single 0-100 quality figure; derive one from signal
    // strength using the conventional -90..-30 dBm -> 0..100 mapping.
    if let Some(dbm) = reading.signal_dbm {
        let clamped = dbm.clamp(-90.0, -30.0);
        reading.link_quality = Some(((clamped + 90.0) / 60.0) * 100.0);
    }
    Some(reading)
}

impl Collector for WifiCollector {
    fn class(&self) -> MemberClass {
        MemberClass::Wifi
    }

    fn collect(&self, deadline: Instant, member: &Member) -> Result<Metrics, CollectionError> {
        let now = chrono::Utc::now();

        let result = self
            .retry
            .run(deadline, |_attempt, _remaining| self.link_get(&member.interface));

        match result {
            Ok(reading) => {
                let mut metrics = Metrics::new(now);
                metrics.signal_strength = reading.signal_dbm;
                metrics.link_quality = reading.link_quality;
                if let Ok(p) = self.ping_fallback.probe(deadline, &member.interface, "1.1.1.1") {
                    metrics.latency_ms = p.latency_ms;
                    metrics.jitter_ms = p.jitter_ms;
                    metrics.loss_percent = Some(p.loss_percent);
                }
                Ok(metrics)
            }
            Err(kind) => {
                let mut metrics = Metrics::degraded(now, kind.to_string());
                metrics.mark_field_error("signal_strength", kind.to_string());
                Ok(metrics)
            }
        }
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_connected_link() {
        let text = "Connected to aa:bb:cc:dd:ee:ff (on wlan0)\n\
                     \tSSID: homenet\n\
                     \tsignal: -52 dBm\n\
                     \ttx bitrate: 433.3 MBit/s\n";
        let reading = parse_iw_link(text).unwrap();
        assert_eq!(reading.signal_dbm, Some(-52.0));
        assert!(reading.link_quality.unwrap() > 50.0);
    }

    #[test]
    fn not_connected_is_none() {
        assert!(parse_iw_link("Not connected.\n").is_none());
    }
}
