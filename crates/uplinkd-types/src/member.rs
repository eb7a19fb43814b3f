//! Member definitions — a single managed uplink.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The category of a member, determining which collector to use and which
/// class-specific metrics/scoring apply.
///
/// `class` may only be refined from `Generic` to a specific class by
/// Discovery — never reclassified between two specific classes without a
/// full rediscovery round (`spec.md` §3 invariant).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberClass {
    Starlink,
    Cellular,
    Wifi,
    Lan,
    Generic,
}

impl MemberClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemberClass::Starlink => "starlink",
            MemberClass::Cellular => "cellular",
            MemberClass::Wifi => "wifi",
            MemberClass::Lan => "lan",
            MemberClass::Generic => "generic",
        }
    }

    /// Whether `self` may be refined to `target` without a full rediscovery.
    /// Only `Generic -> specific` refinements are allowed.
    pub fn can_refine_to(&self, target: MemberClass) -> bool {
        *self == target || *self == MemberClass::Generic
    }
}

impl std::fmt::Display for MemberClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Class-specific configuration knobs, modeled as a closed tagged sum rather
/// than the original source's `map[string]interface{}` (`spec.md` §9:
/// "Dynamic typing in the collector-returned maps").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "class", rename_all = "snake_case")]
pub enum ClassConfig {
    Starlink(StarlinkConfig),
    Cellular(CellularConfig),
    Wifi(WifiConfig),
    Lan(LanConfig),
    Generic,
}

impl ClassConfig {
    pub fn class(&self) -> MemberClass {
        match self {
            ClassConfig::Starlink(_) => MemberClass::Starlink,
            ClassConfig::Cellular(_) => MemberClass::Cellular,
            ClassConfig::Wifi(_) => MemberClass::Wifi,
            ClassConfig::Lan(_) => MemberClass::Lan,
            ClassConfig::Generic => MemberClass::Generic,
        }
    }

    pub fn as_starlink(&self) -> Option<&StarlinkConfig> {
        match self {
            ClassConfig::Starlink(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_cellular(&self) -> Option<&CellularConfig> {
        match self {
            ClassConfig::Cellular(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_wifi(&self) -> Option<&WifiConfig> {
        match self {
            ClassConfig::Wifi(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_lan(&self) -> Option<&LanConfig> {
        match self {
            ClassConfig::Lan(c) => Some(c),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StarlinkConfig {
    pub dish_ip: String,
    pub dish_port: u16,
    pub api_timeout_ms: u64,
    pub obstruction_threshold: f64,
}

impl Default for StarlinkConfig {
    fn default() -> Self {
        StarlinkConfig {
            dish_ip: "192.168.100.1".into(),
            dish_port: 9200,
            api_timeout_ms: 1_500,
            obstruction_threshold: 0.02,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellularConfig {
    pub signal_threshold: f64,
    pub roaming_penalty: f64,
    /// Modem index as seen by ModemManager (`mmcli -L`), or ordinal if the
    /// platform uses a different modem IPC. `None` lets the collector probe
    /// for the first available modem.
    pub modem_index: Option<u32>,
}

impl Default for CellularConfig {
    fn default() -> Self {
        CellularConfig {
            signal_threshold: -110.0,
            roaming_penalty: 10.0,
            modem_index: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WifiConfig {
    pub ssid: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LanConfig {
    pub ping_targets: Vec<String>,
}

/// A single uplink under management (`spec.md` §3).
///
/// `name` is immutable for the member's lifetime in the process. `class` may
/// only be refined from `Generic`, never reclassified between two specific
/// classes without rediscovery. `weight` is read-only to the core outside of
/// a configuration reload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Member {
    pub name: String,
    pub interface: String,
    pub class: MemberClass,
    /// Scoring/tie-break priority in `[0, 100]`; higher is preferred on
    /// ties. Distinct from any routing-policy metric the controller adapter
    /// derives internally (`spec.md` §9, open question 3).
    pub weight: u8,
    pub eligible: bool,
    pub class_config: ClassConfig,
    /// Opaque platform-specific detection hint, passed through unexamined
    /// by the core (e.g. a udev rule or AT-port path).
    pub detect: Option<String>,
    /// Opaque platform-specific routing policy hint, passed through
    /// unexamined by the core and consumed only by the controller adapter.
    pub policy: Option<String>,
    #[serde(default = "default_extra")]
    pub extra_config: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

fn default_extra() -> HashMap<String, String> {
    HashMap::new()
}

impl Member {
    pub fn new(name: impl Into<String>, interface: impl Into<String>, class: MemberClass) -> Self {
        let now = Utc::now();
        Member {
            name: name.into(),
            interface: interface.into(),
            class,
            weight: 50,
            eligible: true,
            class_config: match class {
                MemberClass::Starlink => ClassConfig::Starlink(StarlinkConfig::default()),
                MemberClass::Cellular => ClassConfig::Cellular(CellularConfig::default()),
                MemberClass::Wifi => ClassConfig::Wifi(WifiConfig::default()),
                MemberClass::Lan => ClassConfig::Lan(LanConfig::default()),
                MemberClass::Generic => ClassConfig::Generic,
            },
            detect: None,
            policy: None,
            extra_config: HashMap::new(),
            created_at: now,
            last_seen: now,
        }
    }

    /// Refines `self.class` to `target`, per the invariant in `spec.md` §3.
    /// Returns `false` (no-op) if the refinement is disallowed.
    pub fn refine_class(&mut self, target: MemberClass) -> bool {
        if !self.class.can_refine_to(target) {
            return false;
        }
        if self.class != target {
            self.class = target;
            self.class_config = match target {
                MemberClass::Starlink => ClassConfig::Starlink(StarlinkConfig::default()),
                MemberClass::Cellular => ClassConfig::Cellular(CellularConfig::default()),
                MemberClass::Wifi => ClassConfig::Wifi(WifiConfig::default()),
                MemberClass::Lan => ClassConfig::Lan(LanConfig::default()),
                MemberClass::Generic => ClassConfig::Generic,
            };
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generic_refines_to_specific() {
        let mut m = Member::new("wan0", "eth0", MemberClass::Generic);
        assert!(m.refine_class(MemberClass::Cellular));
        assert_eq!(m.class, MemberClass::Cellular);
        assert!(matches!(m.class_config, ClassConfig::Cellular(_)));
    }

    #[test]
    fn specific_cannot_reclassify_to_other_specific() {
        let mut m = Member::new("wan0", "eth0", MemberClass::Cellular);
        assert!(!m.refine_class(MemberClass::Wifi));
        assert_eq!(m.class, MemberClass::Cellular);
    }

    #[test]
    fn same_class_refine_is_noop_ok() {
        let mut m = Member::new("wan0", "eth0", MemberClass::Cellular);
        assert!(m.refine_class(MemberClass::Cellular));
        assert_eq!(m.class, MemberClass::Cellular);
    }
}
