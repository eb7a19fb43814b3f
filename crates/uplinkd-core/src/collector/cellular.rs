//! Cellular modem collector (`spec.md` §4.1), grounded on ModemManager's
//! `mmcli` CLI — the same subprocess-command pattern the teacher's
//! `modem::band` module uses to drive band locking.

use std::process::Command;
use std::time::Instant;

use uplinkd_types::{Member, MemberClass, Metrics};

use super::ping::PingCollector;
use super::{CollectionError, CollectionErrorKind, Collector};
use crate::retry::RetryPolicy;

#[derive(Debug, Clone, Copy, Default)]
struct SignalReading {
    rssi: Option<f64>,
    rsrp: Option<f64>,
    rsrq: Option<f64>,
    sinr: Option<f64>,
    roaming: Option<bool>,
}

pub struct CellularCollector {
    ping_fallback: PingCollector,
    retry: RetryPolicy,
}

impl Default for CellularCollector {
    fn default() -> Self {
        CellularCollector {
            ping_fallback: PingCollector::default(),
            retry: RetryPolicy::default(),
        }
    }
}

impl CellularCollector {
    /// `mmcli -L` lists modems as DBus object paths ending in their index,
    /// e.g. `/org/freedesktop/ModemManager1/Modem/0`.
    fn resolve_modem_index(&self) -> Option<u32> {
        let output = Command::new("mmcli").arg("-L").output().ok()?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        stdout
            .lines()
            .find_map(|line| line.rsplit('/').next().and_then(|s| s.trim().parse::<u32>().ok()))
    }

    fn signal_get(&self, index: u32) -> Result<SignalReading, CollectionErrorKind> {
        let output = Command::new("mmcli")
            .arg("-m")
            .arg(index.to_string())
            .arg("--signal-get")
            .output()
            .map_err(|_| CollectionErrorKind::Unreachable)?;
        if !output.status.success() {
            return Err(CollectionErrorKind::Auth);
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_signal_get(&stdout).ok_or(CollectionErrorKind::Parse)
    }

    fn registration_status(&self, index: u32) -> Option<bool> {
        let output = Command::new("mmcli")
            .arg("-m")
            .arg(index.to_string())
            .arg("--3gpp-status")
            .output()
            .ok()?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        stdout
            .lines()
            .find(|l| l.contains("registration"))
            .map(|l| l.to_lowercase().contains("roaming"))
    }
}

/// Parses `mmcli --signal-get` key/value style output, e.g.:
/// ```text
/// -------------------------
/// 3GPP |        rssi: -70.00 dBm
///      |        rsrp: -95.00 dBm
///      |        rsrq: -10.00 dB
///      |         snr: 12.00 dB
/// ```
fn parse_signal_get(text: &str) -> Option<SignalReading> {
    let mut reading = SignalReading::default();
    let mut any = false;
    for line in text.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.rsplit('|').next().unwrap_or(key).trim();
        let numeric = value
            .trim()
            .split_whitespace()
            .next()
            .and_then(|n| n.parse::<f64>().ok());
        let Some(numeric) = numeric else { continue };
        match key {
            "rssi" => {
                reading.rssi = Some(numeric);
                any = true;
            }
            "rsrp" => {
                reading.rsrp = Some(numeric);
                any = true;
            }
            "rsrq" => {
                reading.rsrq = Some(numeric);
                any = true;
            }
            "snr" | "sinr" => {
                reading.sinr = Some(numeric);
                any = true;
            }
            _ => {}
        }
    }
    any.then_some(reading)
}

impl Collector for CellularCollector {
    fn class(&self) -> MemberClass {
        MemberClass::Cellular
    }

    fn collect(&self, deadline: Instant, member: &Member) -> Result<Metrics, CollectionError> {
        let cfg = member.class_config.as_cellular().cloned().unwrap_or_default();
        let now = chrono::Utc::now();

        let index = cfg.modem_index.or_else(|| self.resolve_modem_index());
        let Some(index) = index else {
            return Ok(Metrics::degraded(now, "no modem found"));
        };

        let result = self
            .retry
            .run(deadline, |_attempt, _remaining| self.signal_get(index));

        match result {
            Ok(reading) => {
                let mut metrics = Metrics::new(now);
                metrics.rsrp = reading.rsrp;
                metrics.rsrq = reading.rsrq;
                metrics.sinr = reading.sinr;
                metrics.signal_strength = reading.rssi;
                if self.registration_status(index).unwrap_or(false) {
                    metrics.extra.push(uplinkd_types::metrics::ExtraMarker::Roaming(true));
                }
                // Signal is available but latency/loss still need an active
                // probe — ModemManager exposes no path-quality metrics.
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
    fn parses_signal_get_block() {
        let text = "-------------------------\n\
                     3GPP |        rssi: -70.00 dBm\n\
                          |        rsrp: -95.00 dBm\n\
                          |        rsrq: -10.00 dB\n\
                          |         snr: 12.00 dB\n";
        let reading = parse_signal_get(text).unwrap();
        assert_eq!(reading.rssi, Some(-70.0));
        assert_eq!(reading.rsrp, Some(-95.0));
        assert_eq!(reading.sinr, Some(12.0));
    }

    #[test]
    fn empty_output_is_none() {
        assert!(parse_signal_get("no modems found\n").is_none());
    }

    #[test]
    fn no_modem_index_degrades_without_panicking() {
        let collector = CellularCollector::default();
        let member = Member::new("cell0", "wwan0", MemberClass::Cellular);
        let deadline = Instant::now() + std::time::Duration::from_millis(50);
        let metrics = collector.collect(deadline, &member).unwrap();
        // In a test sandbox with no mmcli, this always degrades; the
        // assertion is just that collection never errors out entirely.
        let _ = metrics.is_degraded();
    }
}
