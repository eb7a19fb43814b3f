//! In-memory controller adapter for tests, grounded on the teacher's
//! test-only mock `LinkSender` implementations (`net/interface.rs`).

use std::sync::Mutex;
use std::time::Instant;

use uplinkd_types::Member;

use super::{ControllerAdapter, ControllerError};
use crate::retry::RetryPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFailure {
    None,
    Unsupported,
    Transient,
    VerificationMismatch,
}

pub struct MockAdapter {
    primary: Mutex<Option<String>>,
    failure: MockFailure,
    pub calls: Mutex<Vec<String>>,
}

impl MockAdapter {
    pub fn new() -> Self {
        MockAdapter {
            primary: Mutex::new(None),
            failure: MockFailure::None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_failure(failure: MockFailure) -> Self {
        MockAdapter {
            primary: Mutex::new(None),
            failure,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn seed_primary(self, name: impl Into<String>) -> Self {
        *self.primary.lock().unwrap() = Some(name.into());
        self
    }
}

impl Default for MockAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl ControllerAdapter for MockAdapter {
    fn get_current_primary(&self) -> Result<Option<String>, ControllerError> {
        Ok(self.primary.lock().unwrap().clone())
    }

    fn set_primary(&self, _deadline: Instant, target: &Member) -> Result<(), ControllerError> {
        self.calls.lock().unwrap().push(target.name.clone());
        match self.failure {
            MockFailure::None => {
                *self.primary.lock().unwrap() = Some(target.name.clone());
                Ok(())
            }
            MockFailure::Unsupported => Err(ControllerError::Unsupported("mock: unsupported".into())),
            MockFailure::Transient => Err(ControllerError::Transient("mock: transient failure".into())),
            MockFailure::VerificationMismatch => Err(ControllerError::Verification {
                wanted: target.name.clone(),
                observed: self.primary.lock().unwrap().clone(),
            }),
        }
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::single_attempt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uplinkd_types::MemberClass;

    #[test]
    fn successful_switch_updates_primary() {
        let adapter = MockAdapter::new();
        let member = Member::new("wan1", "eth1", MemberClass::Lan);
        let deadline = Instant::now() + std::time::Duration::from_secs(1);
        adapter.set_primary(deadline, &member).unwrap();
        assert_eq!(adapter.get_current_primary().unwrap(), Some("wan1".to_string()));
    }

    #[test]
    fn verification_mismatch_surfaces_error() {
        let adapter = MockAdapter::with_failure(MockFailure::VerificationMismatch).seed_primary("wan0");
        let member = Member::new("wan1", "eth1", MemberClass::Lan);
        let deadline = Instant::now() + std::time::Duration::from_secs(1);
        let err = adapter.set_primary(deadline, &member).unwrap_err();
        assert!(matches!(err, ControllerError::Verification { .. }));
        // Primary is unchanged because the mock never wrote it on this path.
        assert_eq!(adapter.get_current_primary().unwrap(), Some("wan0".to_string()));
    }
}
