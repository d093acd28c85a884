// src/util/multimap.rs

use std::collections::{HashMap, HashSet};
use std::hash::Hash;

/// An associative container mapping each key to a *set* of values.
///
/// Duplicate inserts are absorbed (set semantics). The order of values
/// returned by [`get_all`](Multimap::get_all) and [`values`](Multimap::values)
/// is not guaranteed; callers that care about order sort explicitly.
///
/// The workspace uses this to express "task -> its direct dependencies".
#[derive(Debug, Clone, Default)]
pub struct Multimap<K, V> {
    map: HashMap<K, HashSet<V>>,
}

impl<K, V> Multimap<K, V>
where
    K: Eq + Hash,
    V: Eq + Hash,
{
    pub fn new() -> Self {
        Self { map: HashMap::new() }
    }

    /// Insert a single value under `key`. Returns `false` if the value was
    /// already present.
    pub fn insert(&mut self, key: K, value: V) -> bool {
        self.map.entry(key).or_default().insert(value)
    }

    /// Insert every value from `values` under `key`.
    ///
    /// The key is created even when `values` is empty, so that keys with no
    /// values (e.g. tasks with no dependencies) still show up in `keys()`.
    pub fn insert_all<I>(&mut self, key: K, values: I)
    where
        I: IntoIterator<Item = V>,
    {
        self.map.entry(key).or_default().extend(values);
    }

    /// Whether `value` is present under `key`.
    pub fn has(&self, key: &K, value: &V) -> bool {
        self.map.get(key).is_some_and(|set| set.contains(value))
    }

    /// All values stored under `key`; empty iterator for an unknown key.
    pub fn get_all(&self, key: &K) -> impl Iterator<Item = &V> {
        self.map.get(key).into_iter().flatten()
    }

    /// All keys.
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.map.keys()
    }

    /// All values, flattened across keys.
    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.map.values().flatten()
    }

    /// Iterate `(key, value-set)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &HashSet<V>)> {
        self.map.iter()
    }

    /// Remove a single value under `key`. Removes the key entirely when its
    /// set becomes empty. Returns `true` if the value was present.
    pub fn delete(&mut self, key: &K, value: &V) -> bool {
        let Some(set) = self.map.get_mut(key) else {
            return false;
        };
        let removed = set.remove(value);
        if set.is_empty() {
            self.map.remove(key);
        }
        removed
    }

    /// Remove `key` and all its values. Returns `true` if the key existed.
    pub fn delete_all(&mut self, key: &K) -> bool {
        self.map.remove(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl<K, V, I> FromIterator<(K, I)> for Multimap<K, V>
where
    K: Eq + Hash,
    V: Eq + Hash,
    I: IntoIterator<Item = V>,
{
    fn from_iter<T: IntoIterator<Item = (K, I)>>(entries: T) -> Self {
        let mut mm = Multimap::new();
        for (key, values) in entries {
            mm.insert_all(key, values);
        }
        mm
    }
}
