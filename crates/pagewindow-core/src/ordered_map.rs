//! OrderedMap - insertion-ordered keyed storage with positional edits

use indexmap::IndexMap;
use std::fmt::Debug;
use std::hash::Hash;

use crate::error::{Result, WindowError};

/// Keys in the order they were appended/prepended, with O(1) lookup both by
/// position and by key. Removal compacts positions.
#[derive(Debug, Clone)]
pub struct OrderedMap<K, V> {
    entries: IndexMap<K, V>,
}

impl<K, V> Default for OrderedMap<K, V> {
    fn default() -> Self {
        Self {
            entries: IndexMap::new(),
        }
    }
}

impl<K, V> OrderedMap<K, V>
where
    K: Hash + Eq + Debug,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn append(&mut self, key: K, value: V) -> Result<()> {
        if self.entries.contains_key(&key) {
            return Err(WindowError::invariant(format!("duplicate key {key:?} on append")));
        }
        self.entries.insert(key, value);
        Ok(())
    }

    pub fn prepend(&mut self, key: K, value: V) -> Result<()> {
        if self.entries.contains_key(&key) {
            return Err(WindowError::invariant(format!("duplicate key {key:?} on prepend")));
        }
        self.entries.shift_insert(0, key, value);
        Ok(())
    }

    /// Swap the value at `index`, returning the previous one.
    pub fn replace(&mut self, index: usize, value: V) -> Result<V> {
        let len = self.entries.len();
        let (_, slot) = self.entries.get_index_mut(index).ok_or_else(|| {
            WindowError::invariant(format!("replace at {index} out of range for {len}"))
        })?;
        Ok(std::mem::replace(slot, value))
    }

    pub fn remove(&mut self, index: usize) -> Result<(K, V)> {
        let len = self.entries.len();
        self.entries.shift_remove_index(index).ok_or_else(|| {
            WindowError::invariant(format!("remove at {index} out of range for {len}"))
        })
    }

    pub fn remove_all(&mut self) {
        self.entries.clear();
    }

    pub fn get_index(&self, index: usize) -> Option<(&K, &V)> {
        self.entries.get_index(index)
    }

    pub fn get_index_mut(&mut self, index: usize) -> Option<(&K, &mut V)> {
        self.entries.get_index_mut(index)
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.entries.get(key)
    }

    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        self.entries.get_mut(key)
    }

    pub fn index_of(&self, key: &K) -> Option<usize> {
        self.entries.get_index_of(key)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    pub fn first(&self) -> Option<(&K, &V)> {
        self.entries.first()
    }

    pub fn last(&self) -> Option<(&K, &V)> {
        self.entries.last()
    }

    pub fn keys(&self) -> impl DoubleEndedIterator<Item = &K> + ExactSizeIterator + '_ {
        self.entries.keys()
    }

    pub fn values(&self) -> impl DoubleEndedIterator<Item = &V> + ExactSizeIterator + '_ {
        self.entries.values()
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = (&K, &V)> + ExactSizeIterator + '_ {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> OrderedMap<&'static str, u32> {
        let mut map = OrderedMap::new();
        map.append("b", 2).unwrap();
        map.append("c", 3).unwrap();
        map.prepend("a", 1).unwrap();
        map
    }

    #[test]
    fn append_and_prepend_preserve_order() {
        let map = sample();
        assert_eq!(map.keys().copied().collect::<Vec<_>>(), vec!["a", "b", "c"]);
        assert_eq!(map.get_index(0), Some((&"a", &1)));
        assert_eq!(map.get(&"c"), Some(&3));
        assert_eq!(map.index_of(&"b"), Some(1));
    }

    #[test]
    fn remove_compacts_indices() {
        let mut map = sample();
        assert_eq!(map.remove(1).unwrap(), ("b", 2));
        assert_eq!(map.get_index(1), Some((&"c", &3)));
        assert_eq!(map.index_of(&"c"), Some(1));
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn replace_returns_previous_value() {
        let mut map = sample();
        assert_eq!(map.replace(2, 30).unwrap(), 3);
        assert_eq!(map.get(&"c"), Some(&30));
    }

    #[test]
    fn out_of_range_edits_are_invariant_violations() {
        let mut map = sample();
        assert!(map.remove(3).unwrap_err().is_invariant_violation());
        assert!(map.replace(7, 0).unwrap_err().is_invariant_violation());
        assert_eq!(map.len(), 3);
    }

    #[test]
    fn duplicate_keys_are_rejected() {
        let mut map = sample();
        assert!(map.append("a", 9).unwrap_err().is_invariant_violation());
        assert!(map.prepend("c", 9).unwrap_err().is_invariant_violation());
        assert_eq!(map.get(&"a"), Some(&1));
    }

    #[test]
    fn remove_all_empties_the_map() {
        let mut map = sample();
        map.remove_all();
        assert!(map.is_empty());
        assert!(map.first().is_none());
    }
}
