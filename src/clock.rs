//! Wall-clock access.
//!
//! The monitor never reads the system time or sleeps directly; it goes
//! through a [`Clock`] so that tests can run hours of polling instantly with
//! a fake clock whose `sleep` just advances time.

use std::time::Duration;

use chrono::{DateTime, Utc};

/// Source of the current time and the single place the monitor blocks.
pub trait Clock {
    /// Current UTC time.
    fn now(&self) -> DateTime<Utc>;

    /// Blocks the calling thread for `duration`.
    fn sleep(&self, duration: Duration);

    /// Current time as whole Unix seconds.
    fn unix_now(&self) -> i64 {
        self.now().timestamp()
    }
}

/// The real clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Elapsed time between two instants, clamped at zero if the clock went backwards.
pub fn elapsed_between(start: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (now - start).to_std().unwrap_or(Duration::ZERO)
}
