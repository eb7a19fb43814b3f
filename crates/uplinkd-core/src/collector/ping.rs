//! Generic active-probe collector (`spec.md` §4.1: "ping (generic active
//! probe)"). Used directly for LAN members and as a fallback signal source
//! for any class-native collector whose primary provider is unavailable.

use std::process::Command;
use std::time::{Duration, Instant};

use uplinkd_types::{Member, MemberClass, Metrics};

use super::{CollectionError, CollectionErrorKind, Collector};
use crate::retry::RetryPolicy;

#[derive(Debug, Clone)]
pub struct PingCollector {
    /// Number of echo requests per probe.
    pub count: u32,
    retry: RetryPolicy,
}

impl Default for PingCollector {
    fn default() -> Self {
        PingCollector {
            count: 3,
            retry: RetryPolicy::default(),
        }
    }
}

/// Result of one active probe: latency samples and a loss percentage.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProbeResult {
    pub latency_ms: Option<f64>,
    pub jitter_ms: Option<f64>,
    pub loss_percent: f64,
}

impl PingCollector {
    /// Probes `target` bound to `iface`, returning latency/jitter/loss.
    /// `deadline` bounds the whole call including any retries.
    pub fn probe(&self, deadline: Instant, iface: &str, target: &str) -> Result<ProbeResult, CollectionError> {
        self.retry
            .run(deadline, |_attempt, remaining| {
                self.probe_once(remaining, iface, target)
            })
            .map_err(|e| e)
    }

    fn probe_once(&self, remaining: Duration, iface: &str, target: &str) -> Result<ProbeResult, CollectionError> {
        if remaining.is_zero() {
            return Err(CollectionError::new(target, CollectionErrorKind::Timeout));
        }
        let timeout_secs = remaining.as_secs_f64().max(0.2).ceil() as u32;
        let output = Command::new("ping")
            .arg("-I")
            .arg(iface)
            .arg("-c")
            .arg(self.count.to_string())
            .arg("-W")
            .arg(timeout_secs.to_string())
            .arg(target)
            .output();

        let output = match output {
            Ok(o) => o,
            Err(e) => {
                return Err(CollectionError::new(target, CollectionErrorKind::Unreachable)
                    .with_detail(e.to_string()))
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_ping_output(&stdout).ok_or_else(|| {
            CollectionError::new(target, CollectionErrorKind::Parse)
                .with_detail(stdout.lines().last().unwrap_or("").to_string())
        })
    }
}

fn default_probe_target() -> String {
    "1.1.1.1".to_string()
}

/// Parses the summary lines of `iputils-ping` output, e.g.:
/// ```text
/// 3 packets transmitted, 3 received, 0% packet loss, time 2003ms
/// rtt min/avg/max/mdev = 12.345/15.678/20.901/3.210 ms
/// ```
fn parse_ping_output(text: &str) -> Option<ProbeResult> {
    let mut loss_percent = None;
    let mut latency_ms = None;
    let mut jitter_ms = None;

    for line in text.lines() {
        if let Some(idx) = line.find("% packet loss") {
            let prefix = &line[..idx];
            if let Some(pct) = prefix.rsplit(',').next() {
                loss_percent = pct.trim().parse::<f64>().ok();
            }
        }
        if let Some(rest) = line.trim().strip_prefix("rtt min/avg/max/mdev = ") {
            let values = rest.trim_end_matches(" ms").split('/').collect::<Vec<_>>();
            if values.len() == 4 {
                latency_ms = values[1].parse::<f64>().ok();
                jitter_ms = values[3].parse::<f64>().ok();
            }
        }
    }

    let loss_percent = loss_percent?;
    Some(ProbeResult {
        latency_ms,
        jitter_ms,
        loss_percent,
    })
}

impl Collector for PingCollector {
    fn class(&self) -> MemberClass {
        MemberClass::Lan
    }

    fn collect(&self, deadline: Instant, member: &Member) -> Result<Metrics, CollectionError> {
        let target = match &member.class_config {
            uplinkd_types::member::ClassConfig::Lan(lan) => {
                lan.ping_targets.first().cloned().unwrap_or_else(default_probe_target)
            }
            _ => default_probe_target(),
        };

        let mut metrics = Metrics::new(chrono::Utc::now());
        match self.probe(deadline, &member.interface, &target) {
            Ok(p) => {
                metrics.latency_ms = p.latency_ms;
                metrics.jitter_ms = p.jitter_ms;
                metrics.loss_percent = Some(p.loss_percent);
                Ok(metrics)
            }
            Err(e) => {
                let mut degraded = Metrics::degraded(chrono::Utc::now(), e.kind.to_string());
                degraded.mark_field_error("latency_ms", e.kind.to_string());
                degraded.mark_field_error("loss_percent", e.kind.to_string());
                Ok(degraded)
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
    fn parses_well_formed_ping_output() {
        let text = "PING 1.1.1.1 (1.1.1.1) 56(84) bytes of data.\n\
                     64 bytes from 1.1.1.1: icmp_seq=1 ttl=59 time=12.3 ms\n\
                     \n\
                     --- 1.1.1.1 ping statistics ---\n\
                     3 packets transmitted, 3 received, 0% packet loss, time 2003ms\n\
                     rtt min/avg/max/mdev = 12.345/15.678/20.901/3.210 ms\n";
        let parsed = parse_ping_output(text).unwrap();
        assert_eq!(parsed.loss_percent, 0.0);
        assert_eq!(parsed.latency_ms, Some(15.678));
        assert_eq!(parsed.jitter_ms, Some(3.210));
    }

    #[test]
    fn parses_full_loss() {
        let text = "3 packets transmitted, 0 received, 100% packet loss, time 2003ms\n";
        let parsed = parse_ping_output(text).unwrap();
        assert_eq!(parsed.loss_percent, 100.0);
        assert_eq!(parsed.latency_ms, None);
    }

    #[test]
    fn unparseable_output_returns_none() {
        assert!(parse_ping_output("garbage\n").is_none());
    }
}
