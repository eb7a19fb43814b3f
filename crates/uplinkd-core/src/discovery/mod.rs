//! Discovery (`spec.md` §4.5): enumerates candidate uplinks and assigns a
//! class, grounded verbatim on
//! `strata-agent::hardware::scan_network_interfaces`.

use std::collections::HashMap;

use uplinkd_types::member::MemberClass;
use uplinkd_types::Member;

/// Interface name prefixes skipped outright (`spec.md` §4.5 step 2: "skip
/// loopback, bridges, and virtual prefixes").
const SKIP_PREFIXES: &[&str] = &["lo", "docker", "veth", "br-", "virbr", "tun", "tap"];

/// Classifies by name pattern first, matching the teacher's
/// `scan_network_interfaces` prefix table, extended with `lan`'s
/// wired-ethernet prefixes from `spec.md`'s own glossary.
fn classify_by_name(name: &str) -> Option<MemberClass> {
    if name.starts_with("wwan") || name.starts_with("usb") {
        Some(MemberClass::Cellular)
    } else if name.starts_with("wlp") || name.starts_with("wlan") {
        Some(MemberClass::Wifi)
    } else if name.starts_with("eth") || name.starts_with("en") {
        Some(MemberClass::Lan)
    } else {
        None
    }
}

/// Sysfs `/sys/class/net/<name>/device/driver` readlink basename fallback
/// classification, consulted when the name pattern doesn't match
/// (`spec.md` §4.5 step 3: "by device driver name").
fn classify_by_driver(name: &str) -> Option<MemberClass> {
    let link = std::fs::read_link(format!("/sys/class/net/{name}/device/driver")).ok()?;
    let driver = link.file_name()?.to_str()?.to_lowercase();
    if driver.contains("cdc_mbim") || driver.contains("qmi_wwan") || driver.contains("option") {
        Some(MemberClass::Cellular)
    } else if driver.contains("ath") || driver.contains("iwlwifi") || driver.contains("mt76") {
        Some(MemberClass::Wifi)
    } else if driver.contains("starlink") {
        Some(MemberClass::Starlink)
    } else {
        None
    }
}

fn operstate_up(name: &str) -> bool {
    std::fs::read_to_string(format!("/sys/class/net/{name}/operstate"))
        .map(|s| s.trim() == "up")
        .unwrap_or(false)
}

/// One raw discovery result before merge with the registry.
#[derive(Debug, Clone)]
pub struct Discovered {
    pub interface: String,
    pub class: MemberClass,
}

/// Enumerates `/sys/class/net`, classifying each non-skipped interface
/// (`spec.md` §4.5 steps 2-3).
pub fn enumerate_interfaces() -> Vec<Discovered> {
    let entries = match std::fs::read_dir("/sys/class/net") {
        Ok(d) => d,
        Err(_) => return Vec::new(),
    };

    let mut out = Vec::new();
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().to_string();
        if SKIP_PREFIXES.iter().any(|p| name.starts_with(p)) {
            continue;
        }
        let class = classify_by_name(&name)
            .or_else(|| classify_by_driver(&name))
            .unwrap_or(MemberClass::Generic);
        out.push(Discovered { interface: name, class });
    }
    out
}

/// Per-member miss counters the merge step uses to decide retirement.
pub struct Registry {
    members: HashMap<String, Member>,
    misses: HashMap<String, u32>,
}

impl Registry {
    pub fn new() -> Self {
        Registry {
            members: HashMap::new(),
            misses: HashMap::new(),
        }
    }

    pub fn members(&self) -> Vec<Member> {
        self.members.values().cloned().collect()
    }

    pub fn insert(&mut self, member: Member) {
        self.members.insert(member.name.clone(), member);
    }

    pub fn get(&self, name: &str) -> Option<&Member> {
        self.members.get(name)
    }

    /// Removes `name` immediately, bypassing the miss-counter grace period —
    /// used when a member is explicitly dropped from configuration on
    /// reload, as opposed to merely going physically absent.
    pub fn retire(&mut self, name: &str) {
        self.members.remove(name);
        self.misses.remove(name);
    }

    /// Merges a fresh discovery pass in (`spec.md` §4.5 step 4): members
    /// whose interface still appears are preserved verbatim (config and
    /// learned state intact); members whose interface is gone accumulate a
    /// miss and are retired only after `discovery_miss_retirement`
    /// consecutive misses. Returns the names retired this round.
    pub fn merge(&mut self, discovered: &[Discovered], miss_retirement: u32) -> Vec<String> {
        let seen_interfaces: std::collections::HashSet<&str> =
            discovered.iter().map(|d| d.interface.as_str()).collect();

        for member in self.members.values() {
            if seen_interfaces.contains(member.interface.as_str()) {
                self.misses.insert(member.name.clone(), 0);
            } else {
                *self.misses.entry(member.name.clone()).or_insert(0) += 1;
            }
        }

        let retired: Vec<String> = self
            .misses
            .iter()
            .filter(|(_, misses)| **misses >= miss_retirement)
            .map(|(name, _)| name.clone())
            .collect();
        for name in &retired {
            self.members.remove(name);
            self.misses.remove(name);
        }

        let existing_interfaces: std::collections::HashSet<String> =
            self.members.values().map(|m| m.interface.clone()).collect();
        for d in discovered {
            if existing_interfaces.contains(&d.interface) {
                continue;
            }
            if !operstate_up(&d.interface) && d.class == MemberClass::Generic {
                // A down, unclassifiable interface is likely not a real
                // uplink candidate (e.g. a disabled secondary NIC); skip it
                // rather than registering noise.
                continue;
            }
            let member = Member::new(d.interface.clone(), d.interface.clone(), d.class);
            self.members.insert(member.name.clone(), member);
        }

        retired
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
