//! Decision-engine scoring output (`spec.md` §3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Why a penalty was applied to a member's composite score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PenaltyReason {
    /// Consecutive fully-absent samples (`outageThreshold`).
    Outage,
    /// Cellular member flagged roaming by the collector.
    Roaming,
    /// Satellite obstruction above the configured threshold.
    Obstruction,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Penalty {
    pub reason: PenaltyReason,
    pub amount: f64,
}

/// A decision-engine output derived from one or more metrics for a single
/// member at a single tick.
///
/// Invariant: `0.0 <= final_score <= 100.0`. The ranking function over
/// `final_score` is a total order broken deterministically by `(weight desc,
/// name asc)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Score {
    /// Score derived from the most recent sample only.
    pub instant: f64,
    /// Exponentially weighted moving average (half-life ~= window/3).
    pub ewma: f64,
    /// Plain arithmetic mean over the configured history window.
    pub window_avg: f64,
    /// The composite value used for ranking — `instant`/`ewma`/`window_avg`
    /// combined with subscore weights, less any penalties.
    #[serde(rename = "final")]
    pub final_score: f64,
    pub penalties: Vec<Penalty>,
    /// True when fewer than the configured minimum fraction of samples in
    /// the history window carry any signal at all; such a member is scored
    /// zero and excluded from switch candidacy.
    pub unobservable: bool,
    /// Whether the last `predictiveTrendSamples` present values of this
    /// member's primary metric form a monotonically worsening run, feeding
    /// predictive failover (`spec.md` §4.2).
    #[serde(default)]
    pub trend_decreasing: bool,
    pub timestamp: DateTime<Utc>,
}

impl Score {
    pub fn unobservable_at(timestamp: DateTime<Utc>) -> Self {
        Score {
            instant: 0.0,
            ewma: 0.0,
            window_avg: 0.0,
            final_score: 0.0,
            penalties: Vec::new(),
            unobservable: true,
            trend_decreasing: false,
            timestamp,
        }
    }

    pub fn clamp_final(&mut self) {
        self.final_score = self.final_score.clamp(0.0, 100.0);
    }
}
