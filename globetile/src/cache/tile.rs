//! Unbounded (level, row, column) lookup table.

use std::collections::HashMap;

/// Three-level map from level number to row to column to payload.
///
/// There is no size limit and no eviction: the table only guarantees that
/// one payload exists per address, so repeated lookups return the same value.
#[derive(Debug)]
pub struct TileCache<V> {
    levels: HashMap<usize, HashMap<u32, HashMap<u32, V>>>,
    len: usize,
}

impl<V> Default for TileCache<V> {
    fn default() -> Self {
        Self {
            levels: HashMap::new(),
            len: 0,
        }
    }
}

impl<V> TileCache<V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entry_for_key(&self, level: usize, row: u32, column: u32) -> Option<&V> {
        self.levels.get(&level)?.get(&row)?.get(&column)
    }

    /// Stores `value` at the address, returning the payload it replaced.
    pub fn put_entry(&mut self, level: usize, row: u32, column: u32, value: V) -> Option<V> {
        let previous = self
            .levels
            .entry(level)
            .or_default()
            .entry(row)
            .or_default()
            .insert(column, value);
        if previous.is_none() {
            self.len += 1;
        }
        previous
    }

    pub fn contains_key(&self, level: usize, row: u32, column: u32) -> bool {
        self.entry_for_key(level, row, column).is_some()
    }

    pub fn remove_entry(&mut self, level: usize, row: u32, column: u32) -> Option<V> {
        let removed = self
            .levels
            .get_mut(&level)?
            .get_mut(&row)?
            .remove(&column);
        if removed.is_some() {
            self.len -= 1;
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn clear(&mut self) {
        self.levels.clear();
        self.len = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_and_lookup() {
        let mut cache = TileCache::new();
        assert_eq!(cache.put_entry(2, 3, 4, "tile"), None);
        assert_eq!(cache.entry_for_key(2, 3, 4), Some(&"tile"));
        assert_eq!(cache.entry_for_key(2, 4, 3), None);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_replace_does_not_grow() {
        let mut cache = TileCache::new();
        cache.put_entry(0, 0, 0, 1);
        assert_eq!(cache.put_entry(0, 0, 0, 2), Some(1));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_remove_and_clear() {
        let mut cache = TileCache::new();
        cache.put_entry(0, 0, 0, 1);
        cache.put_entry(1, 0, 1, 2);
        assert_eq!(cache.remove_entry(0, 0, 0), Some(1));
        assert_eq!(cache.remove_entry(0, 0, 0), None);
        assert!(!cache.contains_key(0, 0, 0));
        cache.clear();
        assert!(cache.is_empty());
    }
}
