use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;
use solana_program::clock::UnixTimestamp;

/// Source of wall-clock time for eligibility checks
pub trait TimeSource {
    fn now(&self) -> UnixTimestamp;
}

/// The system clock
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl TimeSource for SystemClock {
    fn now(&self) -> UnixTimestamp {
        Utc::now().timestamp()
    }
}

/// A clock that only moves when told to
#[derive(Debug, Default)]
pub struct ManualClock(AtomicI64);

impl ManualClock {
    pub fn new(now: UnixTimestamp) -> Self {
        ManualClock(AtomicI64::new(now))
    }

    pub fn set(&self, now: UnixTimestamp) {
        self.0.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, seconds: i64) {
        self.0.fetch_add(seconds, Ordering::SeqCst);
    }
}

impl TimeSource for ManualClock {
    fn now(&self) -> UnixTimestamp {
        self.0.load(Ordering::SeqCst)
    }
}

impl<T: TimeSource + ?Sized> TimeSource for &T {
    fn now(&self) -> UnixTimestamp {
        (**self).now()
    }
}

impl<T: TimeSource + ?Sized> TimeSource for std::sync::Arc<T> {
    fn now(&self) -> UnixTimestamp {
        (**self).now()
    }
}
