//! `Sample` — the unit of historical retention (`spec.md` §3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::metrics::Metrics;
use crate::score::Score;

/// `(timestamp, member.name, Metrics, Score)` tuple. Samples, once appended
/// to the telemetry store, are immutable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    pub member: String,
    pub class: crate::member::MemberClass,
    pub metrics: Metrics,
    pub score: Score,
}

impl Sample {
    /// A rough in-memory byte-size estimate, used by the telemetry store's
    /// RAM-ceiling accounting (`spec.md` §4.4).
    pub fn estimated_bytes(&self) -> usize {
        // Fixed overhead for scalar fields + heap allocations (member name,
        // extra markers) approximated at a constant per-marker cost.
        let base = std::mem::size_of::<Sample>();
        let extra = self.metrics.extra.len() * 48;
        let penalties = self.score.penalties.len() * 24;
        base + self.member.len() + extra + penalties
    }
}
