//! Capacity-bounded cache with weighted-age eviction.
//!
//! Every entry carries a caller-supplied size. The cache tracks the sum of
//! sizes and, when an insertion pushes it over capacity, evicts entries in
//! descending order of `(now - last_used) * aging_factor` until usage falls
//! to the low-water mark and the requested space is free.
//!
//! # Invariants
//!
//! - `used_capacity()` always equals the sum of the live entries' sizes.
//! - `used_capacity() <= capacity()` after every mutating call.
//! - `low_water() < capacity()`.
//!
//! # Listeners
//!
//! Payloads may reference resources the cache does not own (GPU handles,
//! file descriptors). Registered [`CacheListener`]s are told about every
//! removal so they can release them.

use std::collections::HashMap;
use std::error::Error;
use std::hash::Hash;

use tracing::{debug, warn};

use crate::clock::{SharedClock, SystemClock};
use crate::error::ConfigurationError;

/// Error a listener reports from [`CacheListener::entry_removed`].
pub type ListenerError = Box<dyn Error + Send + Sync>;

/// Observer of cache removals.
pub trait CacheListener<K, V> {
    /// Called after an entry leaves the cache through eviction, replacement,
    /// explicit removal or a listener-notifying clear.
    fn entry_removed(&mut self, key: &K, value: &V) -> Result<(), ListenerError>;

    /// Called when [`entry_removed`](Self::entry_removed) fails.
    fn removal_error(&mut self, error: ListenerError, _key: &K, _value: &V) {
        warn!(error = %error, "Cache listener failed to handle removal");
    }
}

/// Handle returned by [`MemoryCache::add_listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct CacheEntry<V> {
    value: V,
    size: usize,
    last_used: u64,
    aging_factor: f64,
}

/// Low water defaults to this fraction of capacity when a new capacity
/// would otherwise fall at or below it.
const LOW_WATER_FRACTION: f64 = 0.85;

/// Size-bounded key/value cache with age-ordered eviction.
pub struct MemoryCache<K, V> {
    entries: HashMap<K, CacheEntry<V>>,
    capacity: usize,
    low_water: usize,
    used_capacity: usize,
    listeners: Vec<(ListenerId, Box<dyn CacheListener<K, V>>)>,
    next_listener_id: u64,
    clock: SharedClock,
}

impl<K, V> MemoryCache<K, V>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
{
    /// Creates a cache driven by the system clock.
    ///
    /// # Errors
    ///
    /// Fails when `capacity < 1` or `low_water >= capacity`.
    pub fn new(capacity: usize, low_water: usize) -> Result<Self, ConfigurationError> {
        Self::with_clock(capacity, low_water, SystemClock::shared())
    }

    /// Creates a cache that reads time from `clock`.
    pub fn with_clock(
        capacity: usize,
        low_water: usize,
        clock: SharedClock,
    ) -> Result<Self, ConfigurationError> {
        if capacity < 1 {
            return Err(ConfigurationError::InvalidCapacity(capacity));
        }
        if low_water >= capacity {
            return Err(ConfigurationError::InvalidLowWater {
                low_water,
                capacity,
            });
        }

        Ok(Self {
            entries: HashMap::new(),
            capacity,
            low_water,
            used_capacity: 0,
            listeners: Vec::new(),
            next_listener_id: 0,
            clock,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn low_water(&self) -> usize {
        self.low_water
    }

    pub fn used_capacity(&self) -> usize {
        self.used_capacity
    }

    pub fn free_capacity(&self) -> usize {
        self.capacity.saturating_sub(self.used_capacity)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Changes the capacity, evicting immediately if usage now exceeds it.
    ///
    /// When the new capacity is at or below the low-water mark, the mark is
    /// reset to 85% of the new capacity.
    pub fn set_capacity(&mut self, capacity: usize) -> Result<(), ConfigurationError> {
        if capacity < 1 {
            return Err(ConfigurationError::InvalidCapacity(capacity));
        }

        let old_capacity = self.capacity;
        self.capacity = capacity;

        if self.capacity <= self.low_water {
            self.low_water = (LOW_WATER_FRACTION * self.capacity as f64) as usize;
        }

        if self.capacity < old_capacity && self.used_capacity > self.capacity {
            self.make_space(0);
        }

        Ok(())
    }

    /// Changes the low-water mark. It must stay below capacity.
    pub fn set_low_water(&mut self, low_water: usize) -> Result<(), ConfigurationError> {
        if low_water >= self.capacity {
            return Err(ConfigurationError::InvalidLowWater {
                low_water,
                capacity: self.capacity,
            });
        }
        self.low_water = low_water;
        Ok(())
    }

    /// Returns the payload for `key`, marking it as just used.
    pub fn entry_for_key(&mut self, key: &K) -> Option<&V> {
        let now = self.clock.now_millis();
        let entry = self.entries.get_mut(key)?;
        entry.last_used = now;
        Some(&entry.value)
    }

    /// Returns the payload for `key` without touching its age.
    pub fn peek(&self, key: &K) -> Option<&V> {
        self.entries.get(key).map(|entry| &entry.value)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Inserts or replaces the entry for `key`.
    ///
    /// A replaced payload is reported to listeners and its size is released
    /// before the new size is counted. If the insertion overflows capacity,
    /// older entries are evicted; the entry just inserted is never chosen.
    ///
    /// # Errors
    ///
    /// Fails when `size` is zero or larger than the whole cache.
    pub fn put_entry(&mut self, key: K, value: V, size: usize) -> Result<(), ConfigurationError> {
        if size < 1 {
            return Err(ConfigurationError::InvalidEntrySize);
        }
        if size > self.capacity {
            return Err(ConfigurationError::EntryTooLarge {
                size,
                capacity: self.capacity,
            });
        }

        if let Some(old) = self.entries.remove(&key) {
            self.used_capacity -= old.size;
            self.notify_removed(&key, &old.value);
        }

        self.entries.insert(
            key.clone(),
            CacheEntry {
                value,
                size,
                last_used: self.clock.now_millis(),
                aging_factor: 1.0,
            },
        );
        self.used_capacity += size;

        // The new entry is already counted, so no further room is required.
        if self.used_capacity > self.capacity {
            self.evict(0, Some(&key));
        }

        Ok(())
    }

    /// Sets how quickly an entry ages. Zero exempts it from aging; values
    /// above one age it faster than its peers. Returns false for unknown keys.
    pub fn set_entry_aging_factor(&mut self, key: &K, aging_factor: f64) -> bool {
        match self.entries.get_mut(key) {
            Some(entry) => {
                entry.aging_factor = aging_factor.max(0.0);
                true
            }
            None => false,
        }
    }

    /// Removes the entry for `key`, notifying listeners. Returns whether it existed.
    pub fn remove_entry(&mut self, key: &K) -> bool {
        match self.entries.remove(key) {
            Some(entry) => {
                self.used_capacity -= entry.size;
                self.notify_removed(key, &entry.value);
                true
            }
            None => false,
        }
    }

    /// Removes every entry, optionally notifying listeners.
    pub fn clear(&mut self, call_listeners: bool) {
        let entries: Vec<_> = self.entries.drain().collect();
        self.used_capacity = 0;
        if call_listeners {
            for (key, entry) in &entries {
                self.notify_removed(key, &entry.value);
            }
        }
    }

    /// Evicts oldest-by-weighted-age entries until usage is at or below the
    /// low-water mark and at least `space_required` is free.
    pub fn make_space(&mut self, space_required: usize) {
        self.evict(space_required, None);
    }

    pub fn add_listener(&mut self, listener: Box<dyn CacheListener<K, V>>) -> ListenerId {
        let id = ListenerId(self.next_listener_id);
        self.next_listener_id += 1;
        self.listeners.push((id, listener));
        id
    }

    pub fn remove_listener(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(listener_id, _)| *listener_id != id);
        self.listeners.len() != before
    }

    /// Iterates over the resident keys in no particular order.
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.entries.keys()
    }

    fn evict(&mut self, space_required: usize, protected: Option<&K>) {
        if self.entries.is_empty() {
            return;
        }

        let now = self.clock.now_millis();
        let mut candidates: Vec<(K, f64)> = self
            .entries
            .iter()
            .filter(|(key, _)| Some(*key) != protected)
            .map(|(key, entry)| {
                let age = now.saturating_sub(entry.last_used) as f64 * entry.aging_factor;
                (key.clone(), age)
            })
            .collect();
        candidates.sort_by(|a, b| b.1.total_cmp(&a.1));

        let mut evicted = 0usize;
        for (key, _) in candidates {
            if self.used_capacity <= self.low_water && self.free_capacity() >= space_required {
                break;
            }
            if let Some(entry) = self.entries.remove(&key) {
                self.used_capacity -= entry.size;
                self.notify_removed(&key, &entry.value);
                evicted += 1;
            }
        }

        debug!(
            evicted,
            used = self.used_capacity,
            capacity = self.capacity,
            "Memory cache made space"
        );
    }

    fn notify_removed(&mut self, key: &K, value: &V) {
        for (_, listener) in self.listeners.iter_mut() {
            if let Err(error) = listener.entry_removed(key, value) {
                listener.removal_error(error, key, value);
            }
        }
    }
}
