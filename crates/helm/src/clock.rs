//! Time sources for the governor.
//!
//! The kernel never reads a clock. The governor samples one [`Clock`] per
//! operation and hands the timestamp to every command it commits.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use helm_types::Timestamp;

/// A source of timestamps.
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Wall clock that never goes backwards.
#[derive(Debug, Default)]
pub struct SystemClock {
    last: Mutex<Option<Timestamp>>,
}

impl SystemClock {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        match self.last.lock() {
            Ok(mut last) => {
                let now = Timestamp::now_monotonic(*last);
                *last = Some(now);
                now
            }
            // A poisoned guard only loses monotonicity; the audit log clamps anyway.
            Err(_) => Timestamp::now(),
        }
    }
}

/// Clock that only moves when told to.
///
/// Used to make voting deadlines and emergency expiry deterministic in tests
/// and simulations.
#[derive(Debug, Default)]
pub struct ManualClock {
    nanos: AtomicU64,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        Self {
            nanos: AtomicU64::new(start.as_nanos()),
        }
    }

    pub fn set(&self, now: Timestamp) {
        self.nanos.store(now.as_nanos(), Ordering::SeqCst);
    }

    /// Moves the clock forward, saturating at the end of time.
    pub fn advance(&self, by: Duration) {
        let _ = self
            .nanos
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                Some(Timestamp::from_nanos(n).saturating_add(by).as_nanos())
            });
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        Timestamp::from_nanos(self.nanos.load(Ordering::SeqCst))
    }
}
