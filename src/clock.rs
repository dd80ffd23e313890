//! Time source abstraction.
//!
//! The scheduler reasons about expiry in terms of `now()` against on-chain timestamps. Tests
//! need to drive that clock deterministically rather than waiting on the wall clock, so every
//! consumer takes a `Clock` rather than calling `SystemTime::now()` directly.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, SystemTimeError, UNIX_EPOCH};

pub trait Clock: Send + Sync {
    /// Seconds since the Unix epoch.
    fn now(&self) -> u64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl SystemClock {
    pub fn try_now() -> Result<u64, SystemTimeError> {
        Ok(SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs())
    }
}

impl Clock for SystemClock {
    fn now(&self) -> u64 {
        Self::try_now().unwrap_or(0)
    }
}

/// A clock tests can advance by hand, mirroring a simulated chain's block timestamp.
#[derive(Debug, Default)]
pub struct SimulatedClock {
    seconds: AtomicU64,
}

impl SimulatedClock {
    pub fn new(start: u64) -> Self {
        Self {
            seconds: AtomicU64::new(start),
        }
    }

    pub fn advance(&self, by: u64) {
        self.seconds.fetch_add(by, Ordering::SeqCst);
    }

    pub fn set(&self, at: u64) {
        self.seconds.store(at, Ordering::SeqCst);
    }
}

impl Clock for SimulatedClock {
    fn now(&self) -> u64 {
        self.seconds.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simulated_clock_advances() {
        let clock = SimulatedClock::new(100);
        assert_eq!(clock.now(), 100);
        clock.advance(50);
        assert_eq!(clock.now(), 150);
        clock.set(10);
        assert_eq!(clock.now(), 10);
    }
}
