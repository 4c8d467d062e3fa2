use std::collections::{BTreeMap, HashMap};
use std::hash::{BuildHasher, Hash};

/// Memoization store owned by one loader worker.
///
/// Entries never expire on their own; they leave the cache only through [`Cache::remove`] or
/// [`Cache::flush`], or when the owning loader is dropped.
pub trait Cache {
    type K;
    type V;

    fn get(&self, key: &Self::K) -> Option<&Self::V>;

    fn contains(&self, key: &Self::K) -> bool {
        self.get(key).is_some()
    }

    /// Inserts or overwrites the entry for `key`.
    fn insert(&mut self, key: Self::K, value: Self::V);

    /// Inserts `value` only when `key` has no entry. Returns whether it was inserted.
    fn insert_vacant(&mut self, key: Self::K, value: Self::V) -> bool {
        if self.contains(&key) {
            return false;
        }
        self.insert(key, value);
        true
    }

    fn insert_many<I: IntoIterator<Item = (Self::K, Self::V)>>(&mut self, key_vals: I) {
        for (key, value) in key_vals.into_iter() {
            self.insert(key, value);
        }
    }

    fn remove(&mut self, keys: &[Self::K]);
    fn flush(&mut self);
}

impl<K, V, S: BuildHasher> Cache for HashMap<K, V, S>
where
    K: Eq + Hash,
{
    type K = K;
    type V = V;

    fn get(&self, key: &Self::K) -> Option<&Self::V> {
        HashMap::get(self, key)
    }

    fn insert(&mut self, key: Self::K, value: Self::V) {
        HashMap::insert(self, key, value);
    }

    fn remove(&mut self, keys: &[Self::K]) {
        for key in keys.iter() {
            HashMap::remove(self, key);
        }
    }

    fn flush(&mut self) {
        self.clear();
    }
}

impl<K, V> Cache for BTreeMap<K, V>
where
    K: Ord,
{
    type K = K;
    type V = V;

    fn get(&self, key: &Self::K) -> Option<&Self::V> {
        BTreeMap::get(self, key)
    }

    fn insert(&mut self, key: Self::K, value: Self::V) {
        BTreeMap::insert(self, key, value);
    }

    fn remove(&mut self, keys: &[Self::K]) {
        for key in keys.iter() {
            BTreeMap::remove(self, key);
        }
    }

    fn flush(&mut self) {
        self.clear();
    }
}
