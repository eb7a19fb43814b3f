//! A single reusable retry/backoff abstraction used by both collectors and
//! the controller (`spec.md` §4.1, §9: "Subprocess fan-out with ad-hoc
//! retries... consolidated into a single retry abstraction").

use std::thread;
use std::time::{Duration, Instant};

/// Exponential backoff with a bounded attempt count and a hard deadline.
/// Every suspending operation in this crate takes its deadline as the first
/// parameter (`spec.md` §9); `RetryPolicy::run` composes with that by
/// capping its own retry window at whatever deadline the caller passed in.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub initial_delay: Duration,
    pub factor: f64,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    /// `spec.md` §4.1: initial 100ms, factor 2, cap 5s, default 3 attempts.
    fn default() -> Self {
        RetryPolicy {
            initial_delay: Duration::from_millis(100),
            factor: 2.0,
            max_delay: Duration::from_secs(5),
            max_attempts: 3,
        }
    }
}

impl RetryPolicy {
    pub fn single_attempt() -> Self {
        RetryPolicy {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Runs `op` until it succeeds, attempts are exhausted, or `deadline`
    /// passes — whichever comes first. `op` receives the attempt index
    /// (0-based) and the remaining budget before `deadline`.
    pub fn run<T, E>(
        &self,
        deadline: Instant,
        mut op: impl FnMut(u32, Duration) -> Result<T, E>,
    ) -> Result<T, E> {
        let mut delay = self.initial_delay;
        let mut attempt = 0;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match op(attempt, remaining) {
                Ok(v) => return Ok(v),
                Err(e) => {
                    attempt += 1;
                    if attempt >= self.max_attempts {
                        return Err(e);
                    }
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(e);
                    }
                    let remaining = deadline - now;
                    let sleep_for = delay.min(remaining);
                    if sleep_for.is_zero() {
                        return Err(e);
                    }
                    thread::sleep(sleep_for);
                    delay = Duration::from_secs_f64(
                        (delay.as_secs_f64() * self.factor).min(self.max_delay.as_secs_f64()),
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[test]
    fn retries_until_success() {
        let calls = RefCell::new(0);
        let policy = RetryPolicy {
            initial_delay: Duration::from_millis(1),
            factor: 2.0,
            max_delay: Duration::from_millis(10),
            max_attempts: 5,
        };
        let deadline = Instant::now() + Duration::from_secs(1);
        let result: Result<u32, &'static str> = policy.run(deadline, |attempt, _| {
            *calls.borrow_mut() += 1;
            if attempt < 2 {
                Err("not yet")
            } else {
                Ok(attempt)
            }
        });
        assert_eq!(result, Ok(2));
        assert_eq!(*calls.borrow(), 3);
    }

    #[test]
    fn gives_up_after_max_attempts() {
        let policy = RetryPolicy {
            initial_delay: Duration::from_millis(1),
            factor: 2.0,
            max_delay: Duration::from_millis(5),
            max_attempts: 2,
        };
        let deadline = Instant::now() + Duration::from_secs(1);
        let result: Result<(), &'static str> = policy.run(deadline, |_, _| Err("nope"));
        assert_eq!(result, Err("nope"));
    }

    #[test]
    fn respects_deadline_over_attempt_count() {
        let policy = RetryPolicy {
            initial_delay: Duration::from_millis(50),
            factor: 2.0,
            max_delay: Duration::from_millis(200),
            max_attempts: 100,
        };
        let deadline = Instant::now() + Duration::from_millis(60);
        let start = Instant::now();
        let result: Result<(), &'static str> = policy.run(deadline, |_, _| Err("nope"));
        assert!(result.is_err());
        assert!(start.elapsed() < Duration::from_millis(500));
    }
}
