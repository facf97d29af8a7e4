use std::thread;
use std::time::{Duration, Instant};

use crate::error::{Gc6Error, Result};

/// Bounded sleep-based poll: `attempts` checks, `interval` apart
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollBudget {
    pub attempts: u32,
    pub interval: Duration,
}

impl PollBudget {
    pub const fn new(attempts: u32, interval_ms: u64) -> Self {
        Self {
            attempts,
            interval: Duration::from_millis(interval_ms),
        }
    }

    /// Budget for a millisecond ceiling polled every millisecond
    pub fn millis(timeout_ms: u64) -> Self {
        Self::new(u32::try_from(timeout_ms).unwrap_or(u32::MAX).max(1), 1)
    }

    pub fn total_ms(&self) -> u64 {
        u64::from(self.attempts) * self.interval.as_millis() as u64
    }
}

/// Poll `check` until it reports true, returning the elapsed time.
///
/// `check` receives the zero-based attempt number. Errors from `check`
/// abort the poll immediately. Exhausting the budget yields
/// [`Gc6Error::Timeout`].
pub fn poll_bounded<F>(what: &str, budget: PollBudget, mut check: F) -> Result<Duration>
where
    F: FnMut(u32) -> Result<bool>,
{
    let start = Instant::now();
    for attempt in 0..budget.attempts {
        if check(attempt)? {
            return Ok(start.elapsed());
        }
        thread::sleep(budget.interval);
    }

    Err(Gc6Error::Timeout {
        what: what.to_string(),
        budget_ms: budget.total_ms(),
    })
}

pub fn as_millis(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

/// Whole milliseconds, rounded up
pub fn as_millis_ceil(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_nanos().div_ceil(1_000_000)).unwrap_or(u64::MAX)
}
