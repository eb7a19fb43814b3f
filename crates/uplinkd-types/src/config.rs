//! The frozen configuration struct (`spec.md` §6).
//!
//! Loading this struct from the platform's UCI store is explicitly out of
//! scope (`spec.md` §1); this module only defines the shape every loader
//! (real or, as in `uplinkd-daemon`, a development stand-in) must produce.
//! Once built, a `Config` is immutable — reload swaps the pointer
//! atomically (`spec.md` §5).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::member::{ClassConfig, MemberClass};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error("duplicate member name: {0}")]
    DuplicateMember(String),
    #[error("predictive_margin ({predictive}) must be less than switch_margin ({switch})")]
    MarginOrdering { predictive: f64, switch: f64 },
    #[error("recovery_threshold must exceed degraded_threshold for member class {0}")]
    ThresholdOrdering(MemberClass),
}

/// Per-class lookup table, replacing the original source's single global
/// constant (`spec.md` §9, open question 2: "the engine [uses] the active
/// member's class to select the cooldown, not a global constant").
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PerClass<T> {
    pub starlink: T,
    pub cellular: T,
    pub wifi: T,
    pub lan: T,
    pub generic: T,
}

impl<T: Copy> PerClass<T> {
    pub fn get(&self, class: MemberClass) -> T {
        match class {
            MemberClass::Starlink => self.starlink,
            MemberClass::Cellular => self.cellular,
            MemberClass::Wifi => self.wifi,
            MemberClass::Lan => self.lan,
            MemberClass::Generic => self.generic,
        }
    }

    pub fn uniform(value: T) -> Self {
        PerClass {
            starlink: value,
            cellular: value,
            wifi: value,
            lan: value,
            generic: value,
        }
    }
}

/// `{enable, pollIntervalMs, decisionIntervalMs, dryRun, useMwan3}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MainConfig {
    pub enable: bool,
    pub poll_interval_ms: u64,
    pub decision_interval_ms: u64,
    /// Suppresses controller command execution (`spec.md` §4.3 dry-run mode).
    pub dry_run: bool,
    pub use_mwan3: bool,
    /// Upper bound on in-flight collector calls per tick
    /// (`maxConcurrentCollections`, `spec.md` §4.6).
    pub max_concurrent_collections: usize,
    /// Per-member collection deadline in milliseconds.
    pub per_member_collection_budget_ms: u64,
    /// Grace period for in-flight work on shutdown, in milliseconds.
    pub shutdown_grace_ms: u64,
    /// Consecutive discovery rounds a configured-but-absent member survives
    /// before retirement (`spec.md` §4.5).
    pub discovery_miss_retirement: u32,
}

impl Default for MainConfig {
    fn default() -> Self {
        MainConfig {
            enable: true,
            poll_interval_ms: 1_500,
            decision_interval_ms: 1_500,
            dry_run: false,
            use_mwan3: true,
            max_concurrent_collections: 8,
            per_member_collection_budget_ms: 800,
            shutdown_grace_ms: 5_000,
            discovery_miss_retirement: 3,
        }
    }
}

/// Linear interpolation endpoints for a piecewise-linear subscore mapping.
/// `good` maps to subscore 100, `bad` maps to subscore 0; ordering of
/// `good`/`bad` may run in either numeric direction (e.g. signal strength:
/// `good` is a high, less-negative dBm value; loss: `good` is the smaller
/// percentage).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PiecewiseThreshold {
    pub good: f64,
    pub bad: f64,
}

impl PiecewiseThreshold {
    pub fn subscore(&self, value: f64) -> f64 {
        if (self.bad - self.good).abs() < f64::EPSILON {
            return if value == self.good { 100.0 } else { 0.0 };
        }
        let t = ((value - self.good) / (self.bad - self.good)).clamp(0.0, 1.0);
        100.0 * (1.0 - t)
    }
}

/// Subscore thresholds for one member class.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SubscoreConfig {
    pub latency: PiecewiseThreshold,
    pub loss: PiecewiseThreshold,
    pub jitter: PiecewiseThreshold,
    /// Class-specific subscore: obstruction % for satellite, signal
    /// strength for cellular/Wi-Fi. Ignored (weight should be 0) for LAN.
    pub class_specific: PiecewiseThreshold,
}

impl Default for SubscoreConfig {
    fn default() -> Self {
        SubscoreConfig {
            latency: PiecewiseThreshold { good: 40.0, bad: 400.0 },
            loss: PiecewiseThreshold { good: 0.5, bad: 10.0 },
            jitter: PiecewiseThreshold { good: 10.0, bad: 100.0 },
            class_specific: PiecewiseThreshold { good: 0.0, bad: 100.0 },
        }
    }
}

/// Weights combining subscores into the composite `final` score
/// (`spec.md` §4.2 step 4). Need not sum to exactly 1.0, but should for the
/// composite to stay within `[0, 100]` before penalties.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreWeights {
    pub latency: f64,
    pub loss: f64,
    pub jitter: f64,
    pub class_specific: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        // Defaults favor latency and loss, per spec.md §4.2 step 4.
        ScoreWeights {
            latency: 0.35,
            loss: 0.35,
            jitter: 0.15,
            class_specific: 0.15,
        }
    }
}

fn default_subscores() -> PerClass<SubscoreConfig> {
    let mut starlink = SubscoreConfig::default();
    starlink.class_specific = PiecewiseThreshold { good: 0.0, bad: 5.0 }; // obstruction %
    let mut cellular = SubscoreConfig::default();
    cellular.class_specific = PiecewiseThreshold { good: -70.0, bad: -110.0 }; // RSRP dBm
    let mut wifi = SubscoreConfig::default();
    wifi.class_specific = PiecewiseThreshold { good: -50.0, bad: -85.0 }; // signal dBm
    let lan = SubscoreConfig {
        class_specific: PiecewiseThreshold { good: 0.0, bad: 0.0 },
        ..SubscoreConfig::default()
    };
    PerClass {
        starlink,
        cellular,
        wifi,
        lan,
        generic: SubscoreConfig::default(),
    }
}

fn default_weights() -> PerClass<ScoreWeights> {
    let lan = ScoreWeights {
        latency: 0.45,
        loss: 0.45,
        jitter: 0.10,
        class_specific: 0.0,
    };
    PerClass {
        starlink: ScoreWeights::default(),
        cellular: ScoreWeights::default(),
        wifi: ScoreWeights::default(),
        lan,
        generic: ScoreWeights::default(),
    }
}

/// Fixed and decaying penalty magnitudes (`spec.md` §4.2 step 5).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PenaltyConfig {
    /// Penalty added per consecutive fully-absent sample once
    /// `outageThreshold` is reached, up to `outage_penalty_cap`.
    pub outage_penalty_per_sample: f64,
    pub outage_penalty_cap: f64,
    /// Fixed subtraction when a satellite member's obstruction subscore
    /// breaches its class's `obstructionThreshold`.
    pub obstruction_penalty: f64,
}

impl Default for PenaltyConfig {
    fn default() -> Self {
        PenaltyConfig {
            outage_penalty_per_sample: 5.0,
            outage_penalty_cap: 40.0,
            obstruction_penalty: 15.0,
        }
    }
}

/// Scoring and hysteresis configuration (`spec.md` §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub switch_margin: f64,
    pub predictive_margin: f64,
    pub cooldown_seconds: PerClass<u64>,
    pub min_uptime_seconds: PerClass<u64>,
    pub history_window_seconds: u64,
    pub stability_checks_required: u32,
    pub outage_threshold: u32,
    pub fail_threshold_loss: f64,
    pub fail_threshold_latency_ms: f64,
    /// Fraction of the history window that must carry at least one present
    /// field for a member to be considered observable.
    pub min_presence_ratio: f64,
    pub subscores: PerClass<SubscoreConfig>,
    pub weights: PerClass<ScoreWeights>,
    pub penalties: PenaltyConfig,
    /// Consecutive samples used to detect a monotonic predictive trend.
    pub predictive_trend_samples: u32,
    /// Subscore value a trending primary metric must cross to arm a
    /// predictive switch.
    pub predictive_threshold: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        ScoringConfig {
            switch_margin: 10.0,
            predictive_margin: 3.0,
            // Open question 2: per-class defaults, not one global constant.
            cooldown_seconds: PerClass {
                starlink: 300,
                cellular: 600,
                wifi: 300,
                lan: 120,
                generic: 300,
            },
            min_uptime_seconds: PerClass {
                starlink: 60,
                cellular: 120,
                wifi: 60,
                lan: 30,
                generic: 60,
            },
            history_window_seconds: 30,
            stability_checks_required: 5,
            outage_threshold: 3,
            fail_threshold_loss: 20.0,
            fail_threshold_latency_ms: 1_000.0,
            min_presence_ratio: 0.5,
            subscores: default_subscores(),
            weights: default_weights(),
            penalties: PenaltyConfig::default(),
            predictive_trend_samples: 6,
            predictive_threshold: 70.0,
        }
    }
}

/// `{maxRAMMB, retentionHours}`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub max_ram_mb: u64,
    pub retention_hours: u64,
    /// Expected samples/sec/member, used to presize ring buffers
    /// (`spec.md` §4.4).
    pub expected_sample_rate_hz: f64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        TelemetryConfig {
            max_ram_mb: 16,
            retention_hours: 24,
            expected_sample_rate_hz: 1.0 / 1.5,
        }
    }
}

/// One repeated per-member configuration entry (`spec.md` §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberConfig {
    pub name: String,
    pub interface: String,
    pub class: MemberClass,
    pub weight: u8,
    pub eligible: bool,
    pub detect: Option<String>,
    pub policy: Option<String>,
    pub class_config: ClassConfig,
    #[serde(default)]
    pub extra_config: HashMap<String, String>,
}

/// The complete, frozen configuration (`spec.md` §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub main: MainConfig,
    pub scoring: ScoringConfig,
    pub telemetry: TelemetryConfig,
    pub members: Vec<MemberConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            main: MainConfig::default(),
            scoring: ScoringConfig::default(),
            telemetry: TelemetryConfig::default(),
            members: Vec::new(),
        }
    }
}

impl Config {
    /// Validates cross-field invariants the loader cannot catch by
    /// structural deserialization alone (`spec.md` §7: configuration errors
    /// are fatal at load, surfaced for reload, current configuration
    /// retained).
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scoring.predictive_margin >= self.scoring.switch_margin {
            return Err(ConfigError::MarginOrdering {
                predictive: self.scoring.predictive_margin,
                switch: self.scoring.switch_margin,
            });
        }
        let mut seen = std::collections::HashSet::new();
        for m in &self.members {
            if !seen.insert(m.name.clone()) {
                return Err(ConfigError::DuplicateMember(m.name.clone()));
            }
            if m.class != m.class_config.class() && m.class_config.class() != MemberClass::Generic
            {
                return Err(ConfigError::Invalid(format!(
                    "member {} class {} does not match class_config {}",
                    m.name,
                    m.class,
                    m.class_config.class()
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn rejects_margin_ordering_violation() {
        let mut c = Config::default();
        c.scoring.predictive_margin = 15.0;
        c.scoring.switch_margin = 10.0;
        assert!(matches!(c.validate(), Err(ConfigError::MarginOrdering { .. })));
    }

    #[test]
    fn rejects_duplicate_member_names() {
        let mut c = Config::default();
        let m = MemberConfig {
            name: "wan0".into(),
            interface: "eth0".into(),
            class: MemberClass::Lan,
            weight: 50,
            eligible: true,
            detect: None,
            policy: None,
            class_config: ClassConfig::Lan(Default::default()),
            extra_config: HashMap::new(),
        };
        c.members.push(m.clone());
        c.members.push(m);
        assert!(matches!(c.validate(), Err(ConfigError::DuplicateMember(_))));
    }

    #[test]
    fn piecewise_threshold_interpolates() {
        let t = PiecewiseThreshold { good: 40.0, bad: 400.0 };
        assert_eq!(t.subscore(40.0), 100.0);
        assert_eq!(t.subscore(400.0), 0.0);
        assert_eq!(t.subscore(220.0), 50.0);
        assert_eq!(t.subscore(1000.0), 0.0); // clamped beyond bad
    }

    #[test]
    fn piecewise_threshold_handles_reversed_direction() {
        // signal strength: good is less negative (stronger) than bad
        let t = PiecewiseThreshold { good: -70.0, bad: -110.0 };
        assert_eq!(t.subscore(-70.0), 100.0);
        assert_eq!(t.subscore(-110.0), 0.0);
        assert_eq!(t.subscore(-90.0), 50.0);
    }
}
