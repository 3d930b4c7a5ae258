//! Injected time source.
//!
//! Every component reads time through `Clock` so tests can drive lifecycles
//! with a virtual clock instead of waiting out real countdowns.

use std::sync::Mutex;
use time::{Duration, OffsetDateTime};

pub trait Clock: Send + Sync {
    /// Current instant. Non-decreasing for any single implementation.
    fn now(&self) -> OffsetDateTime;
}

/// Wall-clock time, UTC. The production clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

/// A clock that only moves when told to. Used by tests to step through
/// countdowns, reaps, and round deadlines deterministically.
pub struct VirtualClock {
    now: Mutex<OffsetDateTime>,
}

impl VirtualClock {
    pub fn new(start: OffsetDateTime) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().expect("clock lock");
        *now += by;
    }

    pub fn set(&self, to: OffsetDateTime) {
        let mut now = self.now.lock().expect("clock lock");
        if to > *now {
            *now = to;
        }
    }
}

impl Clock for VirtualClock {
    fn now(&self) -> OffsetDateTime {
        *self.now.lock().expect("clock lock")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn virtual_clock_advances_and_never_rewinds() {
        let clock = VirtualClock::new(datetime!(2026-03-01 12:00 UTC));
        assert_eq!(clock.now(), datetime!(2026-03-01 12:00 UTC));

        clock.advance(Duration::seconds(30));
        assert_eq!(clock.now(), datetime!(2026-03-01 12:00:30 UTC));

        clock.set(datetime!(2026-03-01 11:00 UTC));
        assert_eq!(clock.now(), datetime!(2026-03-01 12:00:30 UTC));
    }
}
