//! Retry backoff for resources that failed to load.

use std::collections::HashMap;
use std::hash::Hash;

use crate::clock::{SharedClock, SystemClock};

/// Default interval after which a failed resource may be tried again
/// regardless of its try count, in milliseconds.
pub const DEFAULT_TRY_AGAIN_INTERVAL_MS: u64 = 60_000;

#[derive(Debug, Clone, Copy)]
struct AbsentEntry {
    time_of_last_mark: u64,
    num_trys: u32,
    permanent: bool,
}

/// Tracks resources whose retrieval failed so they are not requested again
/// on every frame.
///
/// A resource is absent when it was marked permanently, when it failed less
/// than `min_check_interval` ago, or when it has failed more than
/// `max_trys` times. Once `try_again_interval` has passed since the last
/// failure the entry is forgotten and the resource may be retried.
pub struct AbsentResourceList<K> {
    max_trys: u32,
    min_check_interval: u64,
    try_again_interval: u64,
    entries: HashMap<K, AbsentEntry>,
    clock: SharedClock,
}

impl<K: Eq + Hash + Clone> AbsentResourceList<K> {
    pub fn new(max_trys: u32, min_check_interval_ms: u64) -> Self {
        Self::with_clock(max_trys, min_check_interval_ms, SystemClock::shared())
    }

    pub fn with_clock(max_trys: u32, min_check_interval_ms: u64, clock: SharedClock) -> Self {
        Self {
            max_trys,
            min_check_interval: min_check_interval_ms,
            try_again_interval: DEFAULT_TRY_AGAIN_INTERVAL_MS,
            entries: HashMap::new(),
            clock,
        }
    }

    pub fn try_again_interval(&self) -> u64 {
        self.try_again_interval
    }

    pub fn set_try_again_interval(&mut self, interval_ms: u64) {
        self.try_again_interval = interval_ms;
    }

    /// Whether `key` should not be requested now. Forgets the entry when
    /// the try-again interval has elapsed.
    pub fn is_resource_absent(&mut self, key: &K) -> bool {
        let Some(entry) = self.entries.get(key).copied() else {
            return false;
        };
        if entry.permanent {
            return true;
        }

        let elapsed = self
            .clock
            .now_millis()
            .saturating_sub(entry.time_of_last_mark);
        if elapsed > self.try_again_interval {
            self.entries.remove(key);
            return false;
        }

        elapsed < self.min_check_interval || entry.num_trys > self.max_trys
    }

    /// Records a failed attempt.
    pub fn mark_resource_absent(&mut self, key: K) {
        let now = self.clock.now_millis();
        let entry = self.entries.entry(key).or_insert(AbsentEntry {
            time_of_last_mark: now,
            num_trys: 0,
            permanent: false,
        });
        entry.num_trys += 1;
        entry.time_of_last_mark = now;
    }

    /// Marks `key` absent until it is explicitly unmarked.
    pub fn mark_resource_absent_permanently(&mut self, key: K) {
        let now = self.clock.now_millis();
        let entry = self.entries.entry(key).or_insert(AbsentEntry {
            time_of_last_mark: now,
            num_trys: 0,
            permanent: true,
        });
        entry.num_trys += 1;
        entry.time_of_last_mark = now;
        entry.permanent = true;
    }

    pub fn unmark_resource_absent(&mut self, key: &K) {
        self.entries.remove(key);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn list() -> (AbsentResourceList<&'static str>, std::sync::Arc<ManualClock>) {
        let clock = ManualClock::new(1_000);
        (AbsentResourceList::with_clock(3, 5_000, clock.clone()), clock)
    }

    #[test]
    fn test_unknown_resource_is_present() {
        let (mut list, _) = list();
        assert!(!list.is_resource_absent(&"a"));
    }

    #[test]
    fn test_recent_failure_is_absent_until_min_check_interval() {
        let (mut list, clock) = list();
        list.mark_resource_absent("a");
        assert!(list.is_resource_absent(&"a"));

        clock.advance(4_999);
        assert!(list.is_resource_absent(&"a"));

        clock.advance(2);
        assert!(!list.is_resource_absent(&"a"));
    }

    #[test]
    fn test_too_many_trys_stays_absent() {
        let (mut list, clock) = list();
        for _ in 0..4 {
            list.mark_resource_absent("a");
        }
        clock.advance(10_000);
        assert!(list.is_resource_absent(&"a"));
    }

    #[test]
    fn test_try_again_interval_forgets_entry() {
        let (mut list, clock) = list();
        for _ in 0..4 {
            list.mark_resource_absent("a");
        }
        clock.advance(DEFAULT_TRY_AGAIN_INTERVAL_MS + 1);
        assert!(!list.is_resource_absent(&"a"));
        assert!(list.is_empty());
    }

    #[test]
    fn test_permanent_and_unmark() {
        let (mut list, clock) = list();
        list.mark_resource_absent_permanently("a");
        clock.advance(10 * DEFAULT_TRY_AGAIN_INTERVAL_MS);
        assert!(list.is_resource_absent(&"a"));

        list.unmark_resource_absent(&"a");
        assert!(!list.is_resource_absent(&"a"));
    }
}
