//! `mwan3` adapter (`spec.md` §4.3, §6: "one such adapter uses an external
//! multi-WAN daemon's UCI state and command-line interface"), grounded on
//! the teacher's subprocess-command style in
//! `strata-agent::hardware::set_interface_enabled` (`ip link set … up|down`)
//! and `modem/band.rs`'s `mmcli_commands()` command-builder pattern.

use std::process::Command;
use std::time::Instant;

use uplinkd_types::Member;

use super::{ControllerAdapter, ControllerError};
use crate::retry::RetryPolicy;

pub struct Mwan3Adapter {
    retry: RetryPolicy,
    verification_attempts: u32,
}

impl Default for Mwan3Adapter {
    fn default() -> Self {
        Mwan3Adapter {
            retry: RetryPolicy::default(),
            verification_attempts: 3,
        }
    }
}

impl Mwan3Adapter {
    fn run(&self, program: &str, args: &[&str]) -> Result<String, ControllerError> {
        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|e| ControllerError::Transient(e.to_string()))?;
        if !output.status.success() {
            return Err(ControllerError::Transient(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn read_metric(&self, name: &str) -> Option<String> {
        let key = format!("mwan3.{name}.metric");
        self.run("uci", &["-q", "get", &key]).ok().map(|s| s.trim().to_string())
    }

    fn set_metric(&self, name: &str, metric: &str) -> Result<(), ControllerError> {
        let assignment = format!("mwan3.{name}.metric={metric}");
        self.run("uci", &["set", &assignment])?;
        self.run("uci", &["commit", "mwan3"])?;
        self.run("mwan3", &["restart"])?;
        Ok(())
    }

    fn clear_metric(&self, name: &str) -> Result<(), ControllerError> {
        let key = format!("mwan3.{name}.metric");
        self.run("uci", &["delete", &key])?;
        self.run("uci", &["commit", "mwan3"])?;
        self.run("mwan3", &["restart"])?;
        Ok(())
    }
}

/// Parses `mwan3 status` output, e.g.:
/// ```text
/// Interface status:
///  interface wan is online (tracking active)
///  interface wwan is offline
/// ```
/// Prefers the interface explicitly marked `tracking active`; otherwise
/// returns the first interface reported online.
fn parse_mwan3_status(text: &str) -> Option<String> {
    let mut first_online = None;
    for line in text.lines() {
        let line = line.trim();
        let Some(rest) = line.strip_prefix("interface ") else {
            continue;
        };
        let Some((name, status)) = rest.split_once(" is ") else {
            continue;
        };
        if status.starts_with("online") {
            if status.contains("tracking active") {
                return Some(name.to_string());
            }
            if first_online.is_none() {
                first_online = Some(name.to_string());
            }
        }
    }
    first_online
}

impl ControllerAdapter for Mwan3Adapter {
    fn get_current_primary(&self) -> Result<Option<String>, ControllerError> {
        let out = self.run("mwan3", &["status"])?;
        Ok(parse_mwan3_status(&out))
    }

    fn set_primary(&self, deadline: Instant, target: &Member) -> Result<(), ControllerError> {
        let before = self.get_current_primary()?;
        if before.as_deref() == Some(target.name.as_str()) {
            return Ok(());
        }

        // Minimal command set (`spec.md` §4.3 step 2): pin target to the
        // lowest non-reserved metric. Without the sibling member set in
        // this call, we can't also bump other members off metric 1 — an
        // operator-managed collision there surfaces as a verification
        // failure on the next tick rather than silently no-opping.
        let previous_metric = self.read_metric(&target.name);

        self.retry
            .run(deadline, |_attempt, _remaining| self.set_metric(&target.name, "1"))?;

        let verify = RetryPolicy {
            max_attempts: self.verification_attempts,
            ..self.retry
        };
        let verified = verify.run(deadline, |_attempt, _remaining| match self.get_current_primary() {
            Ok(Some(p)) if p == target.name => Ok(()),
            Ok(other) => Err(ControllerError::Verification {
                wanted: target.name.clone(),
                observed: other,
            }),
            Err(e) => Err(e),
        });

        if let Err(e) = verified {
            let rollback = match &previous_metric {
                Some(prev) => self.set_metric(&target.name, prev),
                None => self.clear_metric(&target.name),
            };
            if let Err(rollback_err) = rollback {
                tracing::error!(member = %target.name, error = %rollback_err, "rollback after verification failure also failed");
            }
            return Err(e);
        }
        Ok(())
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tracking_active_interface() {
        let text = "Interface status:\n interface wan is online (tracking active)\n interface wwan is offline\n";
        assert_eq!(parse_mwan3_status(text), Some("wan".to_string()));
    }

    #[test]
    fn falls_back_to_first_online_without_tracking_marker() {
        let text = "Interface status:\n interface wan is online\n interface wwan is online\n";
        assert_eq!(parse_mwan3_status(text), Some("wan".to_string()));
    }

    #[test]
    fn no_online_interfaces_returns_none() {
        let text = "Interface status:\n interface wan is offline\n";
        assert_eq!(parse_mwan3_status(text), None);
    }
}
