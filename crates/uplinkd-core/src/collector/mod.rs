//! Pluggable metric collector framework (`spec.md` §4.1).

pub mod cellular;
pub mod lan;
pub mod ping;
pub mod starlink;
pub mod wifi;

use std::collections::HashMap;
use std::time::Instant;

use thiserror::Error;
use uplinkd_types::{Member, MemberClass, Metrics};

use crate::retry::RetryPolicy;

/// Collection-level error kinds (`spec.md` §4.1). None of these are
/// propagated to failover logic directly — the orchestrator counts them
/// per `(member, kind)` and the decision engine only ever sees their effect
/// via absent metric fields.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CollectionErrorKind {
    #[error("provider unreachable")]
    Unreachable,
    #[error("collection timed out")]
    Timeout,
    #[error("credentials rejected")]
    Auth,
    #[error("provider output could not be parsed")]
    Parse,
}

#[derive(Debug, Error, Clone)]
#[error("collection failed for {member}: {kind}")]
pub struct CollectionError {
    pub member: String,
    pub kind: CollectionErrorKind,
    pub detail: Option<String>,
}

impl CollectionError {
    pub fn new(member: impl Into<String>, kind: CollectionErrorKind) -> Self {
        CollectionError {
            member: member.into(),
            kind,
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// One metric-acquisition implementation per link class (`spec.md` §4.1).
///
/// `collect` must never mutate router state and must return within
/// `deadline` plus small bounded slack. On partial failure it should return
/// `Ok` with a degraded `Metrics` rather than an `Err` — `Err` is reserved
/// for total acquisition failure (the class-native provider and any
/// fallback active probe both failed).
pub trait Collector: Send + Sync {
    fn class(&self) -> MemberClass;

    /// Acquire metrics for `member`, respecting `deadline`.
    fn collect(&self, deadline: Instant, member: &Member) -> Result<Metrics, CollectionError>;

    /// The retry policy this collector's subprocess/RPC calls should use.
    /// Built-ins share `RetryPolicy::default()` unless overridden.
    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default()
    }
}

/// `class -> factory(config) -> Collector` registry (`spec.md` §4.1).
pub struct CollectorRegistry {
    collectors: HashMap<MemberClass, Box<dyn Collector>>,
    /// Shared fallback active-probe collector, consulted by class-native
    /// collectors when their primary provider is unavailable.
    ping_fallback: ping::PingCollector,
}

impl CollectorRegistry {
    pub fn new() -> Self {
        CollectorRegistry {
            collectors: HashMap::new(),
            ping_fallback: ping::PingCollector::default(),
        }
    }

    /// Builds the standard registry with all built-in collectors
    /// (`spec.md` §4.1: starlink, cellular, wifi, lan, ping).
    pub fn with_builtins() -> Self {
        let mut reg = Self::new();
        reg.register(Box::new(starlink::StarlinkCollector::default()));
        reg.register(Box::new(cellular::CellularCollector::default()));
        reg.register(Box::new(wifi::WifiCollector::default()));
        reg.register(Box::new(lan::LanCollector::default()));
        reg
    }

    pub fn register(&mut self, collector: Box<dyn Collector>) {
        self.collectors.insert(collector.class(), collector);
    }

    pub fn ping_fallback(&self) -> &ping::PingCollector {
        &self.ping_fallback
    }

    /// Looks up the collector for `member.class`, falling back to the
    /// generic active-probe collector if no class-native collector is
    /// registered (`spec.md` §4.1: LAN relies entirely on active probes).
    pub fn collect(&self, deadline: Instant, member: &Member) -> Result<Metrics, CollectionError> {
        match self.collectors.get(&member.class) {
            Some(c) => c.collect(deadline, member),
            None => self.ping_fallback.collect(deadline, member),
        }
    }
}

impl Default for CollectorRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uplinkd_types::MemberClass;

    #[test]
    fn unregistered_class_falls_back_to_ping() {
        let reg = CollectorRegistry::new();
        let member = Member::new("lan0", "eth0", MemberClass::Lan);
        let deadline = Instant::now() + std::time::Duration::from_millis(50);
        // lan has no class-native collector registered in a bare registry,
        // so this exercises the ping fallback path rather than erroring.
        let _ = reg.collect(deadline, &member);
    }
}
