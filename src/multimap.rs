// src/multimap.rs
//! Hash multimap: every key owns a small bucket of values.
//!
//! Order inside a bucket is insertion order, but callers must not rely on which of several
//! matching values a lookup returns.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;

#[derive(Debug, Clone)]
pub struct MultiMap<K, V> {
    buckets: HashMap<K, VecDeque<V>>,
    len: usize,
}

impl<K, V> Default for MultiMap<K, V> {
    fn default() -> Self {
        Self {
            buckets: HashMap::new(),
            len: 0,
        }
    }
}

impl<K: Hash + Eq, V> MultiMap<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: K, value: V) {
        self.buckets.entry(key).or_default().push_back(value);
        self.len += 1;
    }

    /// First value stored under `key`.
    pub fn find(&self, key: &K) -> Option<&V> {
        self.buckets.get(key).and_then(|b| b.front())
    }

    /// First value under `key` accepted by `pred`. The value stays in the map.
    pub fn find_with<F>(&self, key: &K, mut pred: F) -> Option<&V>
    where
        F: FnMut(&V) -> bool,
    {
        self.buckets.get(key)?.iter().find(|v| pred(v))
    }

    /// Remove and return the first value under `key` accepted by `pred`.
    pub fn find_and_remove<F>(&mut self, key: &K, mut pred: F) -> Option<V>
    where
        F: FnMut(&V) -> bool,
    {
        let bucket = self.buckets.get_mut(key)?;
        let pos = bucket.iter().position(|v| pred(v))?;
        let value = bucket.remove(pos);
        if bucket.is_empty() {
            self.buckets.remove(key);
        }
        if value.is_some() {
            self.len -= 1;
        }
        value
    }

    pub fn count_for_key(&self, key: &K) -> usize {
        self.buckets.get(key).map_or(0, VecDeque::len)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn clear(&mut self) {
        self.buckets.clear();
        self.len = 0;
    }

    /// Visit every `(key, value)` pair.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.buckets
            .iter()
            .flat_map(|(k, bucket)| bucket.iter().map(move |v| (k, v)))
    }
}

impl<K: Hash + Eq, V: PartialEq> MultiMap<K, V> {
    /// Remove one occurrence of `value` under `key`. Returns whether it was present.
    pub fn remove(&mut self, key: &K, value: &V) -> bool {
        self.find_and_remove(key, |v| v == value).is_some()
    }

    pub fn contains(&self, key: &K, value: &V) -> bool {
        self.find_with(key, |v| v == value).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_find_remove() {
        let mut map: MultiMap<&str, u32> = MultiMap::new();
        map.insert("a", 1);
        map.insert("a", 2);
        map.insert("b", 3);

        assert_eq!(map.len(), 3);
        assert_eq!(map.count_for_key(&"a"), 2);
        assert_eq!(map.find(&"a"), Some(&1));
        assert!(map.contains(&"a", &2));

        assert!(map.remove(&"a", &1));
        assert!(!map.remove(&"a", &1));
        assert_eq!(map.find(&"a"), Some(&2));
        assert_eq!(map.len(), 2);

        assert!(map.remove(&"a", &2));
        assert_eq!(map.count_for_key(&"a"), 0);
        assert_eq!(map.find(&"a"), None);
    }

    #[test]
    fn predicate_lookup_skips_rejected_values() {
        let mut map = MultiMap::new();
        for v in [10u32, 11, 12] {
            map.insert(7u8, v);
        }
        assert_eq!(map.find_with(&7, |v| v % 2 == 1), Some(&11));
        assert_eq!(map.find_with(&7, |v| *v > 100), None);
        assert_eq!(map.find_with(&8, |_| true), None);
        // Lookups never remove.
        assert_eq!(map.len(), 3);
    }

    #[test]
    fn find_and_remove_takes_first_accepted() {
        let mut map = MultiMap::new();
        map.insert('k', "first");
        map.insert('k', "second");

        assert_eq!(map.find_and_remove(&'k', |_| true), Some("first"));
        assert_eq!(map.find_and_remove(&'k', |_| true), Some("second"));
        assert_eq!(map.find_and_remove(&'k', |_| true), None);
        assert!(map.is_empty());
    }

    #[test]
    fn iter_and_clear() {
        let mut map = MultiMap::new();
        map.insert(1, 'x');
        map.insert(1, 'y');
        map.insert(2, 'z');
        let mut seen: Vec<_> = map.iter().map(|(k, v)| (*k, *v)).collect();
        seen.sort();
        assert_eq!(seen, vec![(1, 'x'), (1, 'y'), (2, 'z')]);

        map.clear();
        assert!(map.is_empty());
        assert_eq!(map.iter().count(), 0);
    }
}
