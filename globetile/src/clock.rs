//! Millisecond clocks.
//!
//! Cache aging and retrieval backoff compare timestamps, so both take an
//! injectable [`Clock`]. Production code uses [`SystemClock`]; tests drive a
//! [`ManualClock`] forward explicitly.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Source of monotonically non-decreasing millisecond timestamps.
pub trait Clock: Send + Sync {
    /// Milliseconds elapsed since an arbitrary, fixed origin.
    fn now_millis(&self) -> u64;
}

/// Shared clock handle.
pub type SharedClock = Arc<dyn Clock>;

/// Wall-clock time measured from the moment the clock was created.
#[derive(Debug)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    /// Convenience constructor for a shared system clock.
    pub fn shared() -> SharedClock {
        Arc::new(Self::new())
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(start_millis: u64) -> Arc<Self> {
        Arc::new(Self {
            now: AtomicU64::new(start_millis),
        })
    }

    pub fn set(&self, millis: u64) {
        self.now.store(millis, Ordering::SeqCst);
    }

    pub fn advance(&self, millis: u64) {
        self.now.fetch_add(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advances() {
        let clock = ManualClock::new(10);
        assert_eq!(clock.now_millis(), 10);
        clock.advance(5);
        assert_eq!(clock.now_millis(), 15);
        clock.set(100);
        assert_eq!(clock.now_millis(), 100);
    }

    #[test]
    fn test_system_clock_is_monotonic() {
        let clock = SystemClock::new();
        let first = clock.now_millis();
        let second = clock.now_millis();
        assert!(second >= first);
    }
}
