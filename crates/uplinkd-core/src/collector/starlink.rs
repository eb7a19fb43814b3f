//! Starlink dish collector (`spec.md` §4.1).
//!
//! The dish exposes a local gRPC status API at `dishIP:dishPort`
//! (typically `192.168.100.1:9200`). Speaking that protocol is a platform
//! integration detail kept behind the [`DishClient`] trait so the scoring
//! and degradation logic here never depends on a concrete RPC stack —
//! exactly the seam the teacher draws between `BondingScheduler` and the
//! `LinkSender` trait it schedules over.

use std::net::TcpStream;
use std::time::{Duration, Instant};

use uplinkd_types::{Member, MemberClass, Metrics};

use super::ping::PingCollector;
use super::{CollectionError, CollectionErrorKind, Collector};
use crate::retry::RetryPolicy;

/// A snapshot of the dish's self-reported status.
#[derive(Debug, Clone, Copy, Default)]
pub struct DishStatus {
    pub latency_ms: Option<f64>,
    pub loss_percent: Option<f64>,
    pub obstruction_pct: Option<f64>,
}

/// Abstraction over the dish's status RPC, so the collector can be tested
/// without a real Starlink terminal on the network.
pub trait DishClient: Send + Sync {
    fn get_status(&self, dish_ip: &str, dish_port: u16, timeout: Duration) -> Result<DishStatus, CollectionErrorKind>;
}

/// Reachability-only dish client: opens a TCP connection to confirm the
/// dish's gRPC port is alive. A full implementation would issue the dish's
/// `get_status` gRPC call and parse `obstruction_stats`/`pop_ping_latency_ms`
/// from the protobuf response; that wire client is a platform-packaging
/// concern and lives outside this crate (`spec.md` §1).
pub struct TcpDishClient;

impl DishClient for TcpDishClient {
    fn get_status(&self, dish_ip: &str, dish_port: u16, timeout: Duration) -> Result<DishStatus, CollectionErrorKind> {
        let addr = format!("{dish_ip}:{dish_port}");
        let socket_addr = addr
            .parse()
            .map_err(|_| CollectionErrorKind::Parse)?;
        match TcpStream::connect_timeout(&socket_addr, timeout) {
            Ok(_) => Err(CollectionErrorKind::Parse), // reachable but no protobuf client wired up
            Err(_) => Err(CollectionErrorKind::Unreachable),
        }
    }
}

pub struct StarlinkCollector {
    client: Box<dyn DishClient>,
    ping_fallback: PingCollector,
    retry: RetryPolicy,
}

impl Default for StarlinkCollector {
    fn default() -> Self {
        StarlinkCollector {
            client: Box::new(TcpDishClient),
            ping_fallback: PingCollector::default(),
            retry: RetryPolicy::default(),
        }
    }
}

impl StarlinkCollector {
    pub fn with_client(client: Box<dyn DishClient>) -> Self {
        StarlinkCollector {
            client,
            ..Self::default()
        }
    }
}

impl Collector for StarlinkCollector {
    fn class(&self) -> MemberClass {
        MemberClass::Starlink
    }

    fn collect(&self, deadline: Instant, member: &Member) -> Result<Metrics, CollectionError> {
        let cfg = member.class_config.as_starlink().cloned().unwrap_or_default();
        let timeout = Duration::from_millis(cfg.api_timeout_ms);
        let now = chrono::Utc::now();

        let dish_result = self.retry.run(deadline, |_attempt, remaining| {
            self.client
                .get_status(&cfg.dish_ip, cfg.dish_port, timeout.min(remaining))
        });

        match dish_result {
            Ok(status) => {
                let mut metrics = Metrics::new(now);
                metrics.latency_ms = status.latency_ms;
                metrics.loss_percent = status.loss_percent;
                metrics.obstruction_pct = status.obstruction_pct;
                Ok(metrics)
            }
            Err(kind) => {
                // Primary RPC path failed; fall back to the active probe for
                // at least a reachability signal (`spec.md` §4.1: "if
                // unreachable, returns degraded metrics carrying whatever
                // subset it could gather").
                let mut metrics = match self.ping_fallback.probe(deadline, &member.interface, "1.1.1.1") {
                    Ok(p) => {
                        let mut m = Metrics::degraded(now, kind.to_string());
                        m.latency_ms = p.latency_ms;
                        m.jitter_ms = p.jitter_ms;
                        m.loss_percent = Some(p.loss_percent);
                        m
                    }
                    Err(_) => Metrics::degraded(now, kind.to_string()),
                };
                metrics.mark_field_error("obstruction_pct", kind.to_string());
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
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedClient {
        calls: AtomicUsize,
        responses: Vec<Result<DishStatus, CollectionErrorKind>>,
    }

    impl DishClient for ScriptedClient {
        fn get_status(&self, _dish_ip: &str, _dish_port: u16, _timeout: Duration) -> Result<DishStatus, CollectionErrorKind> {
            let i = self.calls.fetch_add(1, Ordering::SeqCst);
            self.responses
                .get(i)
                .cloned()
                .unwrap_or(Err(CollectionErrorKind::Unreachable))
        }
    }

    #[test]
    fn healthy_status_populates_all_fields() {
        let client = ScriptedClient {
            calls: AtomicUsize::new(0),
            responses: vec![Ok(DishStatus {
                latency_ms: Some(35.0),
                loss_percent: Some(0.1),
                obstruction_pct: Some(0.0),
            })],
        };
        let collector = StarlinkCollector::with_client(Box::new(client));
        let member = Member::new("sat", "lo", MemberClass::Starlink);
        let deadline = Instant::now() + Duration::from_secs(1);
        let metrics = collector.collect(deadline, &member).unwrap();
        assert_eq!(metrics.latency_ms, Some(35.0));
        assert!(!metrics.is_degraded());
    }

    #[test]
    fn unreachable_status_degrades_gracefully() {
        let client = ScriptedClient {
            calls: AtomicUsize::new(0),
            responses: vec![
                Err(CollectionErrorKind::Unreachable),
                Err(CollectionErrorKind::Unreachable),
                Err(CollectionErrorKind::Unreachable),
            ],
        };
        let collector = StarlinkCollector::with_client(Box::new(client));
        let member = Member::new("sat", "lo", MemberClass::Starlink);
        let deadline = Instant::now() + Duration::from_millis(200);
        let metrics = collector.collect(deadline, &member).unwrap();
        assert!(metrics.is_degraded());
    }
}
