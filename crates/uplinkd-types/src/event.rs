//! Typed, append-only event records (`spec.md` §3).

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::metrics::Metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Switch,
    Failback,
    MemberDown,
    MemberUp,
    Predictive,
    CriticalError,
    Recovery,
}

impl EventKind {
    /// Severity this event kind is logged at, matching the ambient logging
    /// convention in `SPEC_FULL.md` §4.2.
    pub fn log_level(&self) -> tracing::Level {
        match self {
            EventKind::Switch | EventKind::Predictive | EventKind::MemberUp | EventKind::Recovery => {
                tracing::Level::INFO
            }
            EventKind::Failback => tracing::Level::INFO,
            EventKind::MemberDown | EventKind::CriticalError => tracing::Level::ERROR,
        }
    }
}

/// A typed, append-only record of something the decision engine, controller,
/// or orchestrator observed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: EventKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics_at_decision: Option<Metrics>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub details: BTreeMap<String, String>,
}

impl Event {
    pub fn switch(
        timestamp: DateTime<Utc>,
        from: impl Into<String>,
        to: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Event {
            timestamp,
            kind: EventKind::Switch,
            from: Some(from.into()),
            to: Some(to.into()),
            reason: reason.into(),
            metrics_at_decision: None,
            details: BTreeMap::new(),
        }
    }

    pub fn predictive(
        timestamp: DateTime<Utc>,
        from: impl Into<String>,
        to: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Event {
            timestamp,
            kind: EventKind::Predictive,
            from: Some(from.into()),
            to: Some(to.into()),
            reason: reason.into(),
            metrics_at_decision: None,
            details: BTreeMap::new(),
        }
    }

    pub fn critical_error(timestamp: DateTime<Utc>, reason: impl Into<String>) -> Self {
        Event {
            timestamp,
            kind: EventKind::CriticalError,
            from: None,
            to: None,
            reason: reason.into(),
            metrics_at_decision: None,
            details: BTreeMap::new(),
        }
    }

    pub fn member_down(timestamp: DateTime<Utc>, member: impl Into<String>, reason: impl Into<String>) -> Self {
        Event {
            timestamp,
            kind: EventKind::MemberDown,
            from: Some(member.into()),
            to: None,
            reason: reason.into(),
            metrics_at_decision: None,
            details: BTreeMap::new(),
        }
    }

    pub fn member_up(timestamp: DateTime<Utc>, member: impl Into<String>, reason: impl Into<String>) -> Self {
        Event {
            timestamp,
            kind: EventKind::MemberUp,
            from: None,
            to: Some(member.into()),
            reason: reason.into(),
            metrics_at_decision: None,
            details: BTreeMap::new(),
        }
    }

    /// A member completing `stabilityChecksRequired` good samples after
    /// having been `failed` (`spec.md` §4.2 state machine: `recovering` ->
    /// `healthy`), as distinct from [`Event::member_up`]'s `degrading` ->
    /// `healthy` shortcut that never reached `failed`.
    pub fn recovery(timestamp: DateTime<Utc>, member: impl Into<String>, reason: impl Into<String>) -> Self {
        Event {
            timestamp,
            kind: EventKind::Recovery,
            from: None,
            to: Some(member.into()),
            reason: reason.into(),
            metrics_at_decision: None,
            details: BTreeMap::new(),
        }
    }

    /// A switch back to a higher-weight member that displaced the current
    /// active one during an earlier outage, as distinct from [`Event::switch`]
    /// which also covers switches to a lower- or equal-weight member
    /// (`spec.md` §8 Scenario C).
    pub fn failback(
        timestamp: DateTime<Utc>,
        from: impl Into<String>,
        to: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Event {
            timestamp,
            kind: EventKind::Failback,
            from: Some(from.into()),
            to: Some(to.into()),
            reason: reason.into(),
            metrics_at_decision: None,
            details: BTreeMap::new(),
        }
    }
}
