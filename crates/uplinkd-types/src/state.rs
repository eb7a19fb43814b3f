//! Decision engine's per-member runtime state (`spec.md` §3, §4.2).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// ```text
/// healthy ──bad sample──▶ degrading ──outageThreshold consecutive──▶ failed
/// healthy ──good sample──▶ healthy
/// degrading ──good sample──▶ healthy
/// failed ──good sample──▶ recovering
/// recovering ──stabilityChecksRequired good──▶ healthy
/// recovering ──bad sample──▶ failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberStatus {
    Healthy,
    Degrading,
    Failed,
    Recovering,
}

impl MemberStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemberStatus::Healthy => "healthy",
            MemberStatus::Degrading => "degrading",
            MemberStatus::Failed => "failed",
            MemberStatus::Recovering => "recovering",
        }
    }
}

/// Per-member runtime state, mutated only by the decision engine's tick and
/// read by status queries (`spec.md` §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberState {
    pub status: MemberStatus,
    pub consecutive_bad_samples: u32,
    pub consecutive_good_samples: u32,
    /// Consecutive fully-absent samples, tracked separately from
    /// `consecutive_bad_samples` (which also counts fail-threshold breaches)
    /// because the outage penalty's magnitude is defined purely in terms of
    /// total signal absence (`spec.md` §4.2 step 5).
    pub consecutive_fully_absent: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_switch_out_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_switch_in_at: Option<DateTime<Utc>>,
    /// Consecutive ticks the member has held `eligible == true`, reset on
    /// any ineligible tick. Used for `stabilityChecksRequired` on failback.
    pub consecutive_eligible_ticks: u32,
}

impl MemberState {
    /// Initial state on discovery: `Healthy` if the first sample is present
    /// and above the configured floor, otherwise `Recovering`
    /// (`spec.md` §4.2).
    pub fn initial(first_sample_healthy: bool) -> Self {
        MemberState {
            status: if first_sample_healthy {
                MemberStatus::Healthy
            } else {
                MemberStatus::Recovering
            },
            consecutive_bad_samples: 0,
            consecutive_good_samples: 0,
            consecutive_fully_absent: 0,
            last_switch_out_at: None,
            last_switch_in_at: None,
            consecutive_eligible_ticks: 0,
        }
    }
}
