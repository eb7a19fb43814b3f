//! The instantaneous measurement produced by one collector call (`spec.md` §3).
//!
//! Absence is modeled as `Option::None`, never as the value `0.0` — collector
//! implementations must never conflate "signal not available" with "signal
//! measured at zero".

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A closed enumeration of marker keys a collector may attach to `extra`,
/// replacing the original source's free-form `map[string]interface{}`
/// (`spec.md` §9). Each marker carries a small, typed payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "key", content = "value", rename_all = "snake_case")]
pub enum ExtraMarker {
    /// Set when the collector returned a partial result
    /// (`spec.md` §4.1: `extra.collection_method=degraded`).
    CollectionMethod(CollectionMethod),
    /// Whether the class-native provider API was reachable at all.
    ApiAccessible(bool),
    /// The member is currently roaming on a foreign network (cellular).
    Roaming(bool),
    /// A field-specific collection error, e.g. `latency_error`, keyed by
    /// which field could not be populated.
    FieldError { field: String, kind: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionMethod {
    Native,
    Degraded,
    ActiveProbe,
}

/// The instantaneous measurement produced by one collector call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metrics {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loss_percent: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jitter_ms: Option<f64>,
    pub timestamp: DateTime<Utc>,

    // ── class-optional fields ──
    #[serde(skip_serializing_if = "Option::is_none")]
    pub obstruction_pct: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snr: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rsrp: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rsrq: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sinr: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signal_strength: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link_quality: Option<f64>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra: Vec<ExtraMarker>,
}

impl Metrics {
    pub fn new(timestamp: DateTime<Utc>) -> Self {
        Metrics {
            latency_ms: None,
            loss_percent: None,
            jitter_ms: None,
            timestamp,
            obstruction_pct: None,
            snr: None,
            rsrp: None,
            rsrq: None,
            sinr: None,
            signal_strength: None,
            link_quality: None,
            extra: Vec::new(),
        }
    }

    /// A fully-absent sample: every signal missing, tagged degraded.
    pub fn degraded(timestamp: DateTime<Utc>, reason: impl Into<String>) -> Self {
        let mut m = Metrics::new(timestamp);
        m.extra.push(ExtraMarker::CollectionMethod(CollectionMethod::Degraded));
        m.extra.push(ExtraMarker::FieldError {
            field: "all".into(),
            kind: reason.into(),
        });
        m
    }

    pub fn is_degraded(&self) -> bool {
        self.extra
            .iter()
            .any(|m| matches!(m, ExtraMarker::CollectionMethod(CollectionMethod::Degraded)))
    }

    pub fn is_roaming(&self) -> bool {
        self.extra
            .iter()
            .any(|m| matches!(m, ExtraMarker::Roaming(true)))
    }

    pub fn mark_field_error(&mut self, field: &str, kind: impl Into<String>) {
        self.extra.push(ExtraMarker::FieldError {
            field: field.to_string(),
            kind: kind.into(),
        });
    }

    /// Count of primary signal fields (latency/loss/jitter) present. Used by
    /// the decision engine's minimum-presence-ratio check.
    pub fn primary_presence_count(&self) -> u8 {
        [self.latency_ms, self.loss_percent, self.jitter_ms]
            .iter()
            .filter(|v| v.is_some())
            .count() as u8
    }

    pub fn fully_absent(&self) -> bool {
        self.primary_presence_count() == 0
            && self.obstruction_pct.is_none()
            && self.snr.is_none()
            && self.rsrp.is_none()
            && self.rsrq.is_none()
            && self.sinr.is_none()
            && self.signal_strength.is_none()
            && self.link_quality.is_none()
    }

    /// Builds a `{field: value}` map for Prometheus-style rendering or
    /// generic aggregation, skipping absent fields.
    pub fn present_fields(&self) -> BTreeMap<&'static str, f64> {
        let mut out = BTreeMap::new();
        if let Some(v) = self.latency_ms {
            out.insert("latency_ms", v);
        }
        if let Some(v) = self.loss_percent {
            out.insert("loss_percent", v);
        }
        if let Some(v) = self.jitter_ms {
            out.insert("jitter_ms", v);
        }
        if let Some(v) = self.obstruction_pct {
            out.insert("obstruction_pct", v);
        }
        if let Some(v) = self.signal_strength {
            out.insert("signal_strength", v);
        }
        out
    }
}
