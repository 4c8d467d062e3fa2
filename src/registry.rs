use std::collections::HashMap;
use std::hash::Hash;

use tokio::sync::oneshot;

use crate::error::Outcome;
use crate::loader_op::send_response;

/// A key waiting to be dispatched, and every handle that asked for it.
#[derive(Debug)]
pub struct PendingEntry<K, V, E> {
    pub key: K,
    waiters: Vec<oneshot::Sender<Outcome<V, E>>>,
}

impl<K, V, E> PendingEntry<K, V, E> {
    /// Adds another handle to this key's fetch slot.
    pub fn attach(&mut self, response_tx: oneshot::Sender<Outcome<V, E>>) {
        self.waiters.push(response_tx);
    }
}

impl<K, V, E> PendingEntry<K, V, E>
where
    V: Clone,
    E: Clone,
{
    #[cfg(any(test, feature = "stats"))]
    pub fn waiter_count(&self) -> usize {
        self.waiters.len()
    }

    /// Fans `outcome` out to every waiter of this key.
    pub fn resolve(self, outcome: &Outcome<V, E>) {
        for response_tx in self.waiters {
            send_response(response_tx, outcome.clone());
        }
    }
}

/// Keys requested since the last dispatch, in first-registration order.
///
/// Owned by a single worker, so registration never races with dispatch.
#[derive(Debug)]
pub struct KeyRegistry<K, V, E> {
    entries: Vec<PendingEntry<K, V, E>>,
    index: HashMap<K, usize>,
}

impl<K, V, E> Default for KeyRegistry<K, V, E> {
    fn default() -> Self {
        Self { entries: Vec::new(), index: HashMap::new() }
    }
}

impl<K, V, E> KeyRegistry<K, V, E>
where
    K: Eq + Hash + Clone,
{
    /// Attaches `response_tx` to the pending entry for `key`, creating the entry if needed.
    /// Returns true when a new entry (fetch slot) was created.
    pub fn register(&mut self, key: K, response_tx: oneshot::Sender<Outcome<V, E>>) -> bool {
        if let Some(&slot) = self.index.get(&key) {
            self.entries[slot].attach(response_tx);
            return false;
        }
        self.index.insert(key.clone(), self.entries.len());
        self.entries.push(PendingEntry { key, waiters: vec![response_tx] });
        true
    }

    /// Number of distinct pending keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Takes every pending entry, leaving the registry empty for the next batch.
    pub fn take(&mut self) -> Vec<PendingEntry<K, V, E>> {
        self.index.clear();
        std::mem::take(&mut self.entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Registry = KeyRegistry<u32, String, String>;

    #[test]
    fn duplicate_keys_share_one_entry() {
        let mut registry = Registry::default();
        let (tx1, _rx1) = oneshot::channel();
        let (tx2, _rx2) = oneshot::channel();
        let (tx3, _rx3) = oneshot::channel();

        assert!(registry.register(1, tx1));
        assert!(registry.register(2, tx2));
        assert!(!registry.register(1, tx3));
        assert_eq!(registry.len(), 2);

        let entries = registry.take();
        assert!(registry.is_empty());
        assert_eq!(entries.iter().map(|e| e.key).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(entries[0].waiter_count(), 2);
        assert_eq!(entries[1].waiter_count(), 1);
    }

    #[test]
    fn key_registers_fresh_after_take() {
        let mut registry = Registry::default();
        let (tx1, _rx1) = oneshot::channel();
        let (tx2, _rx2) = oneshot::channel();

        assert!(registry.register(7, tx1));
        let _ = registry.take();
        assert!(registry.register(7, tx2));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn resolve_fans_out_to_every_waiter() {
        let mut registry = Registry::default();
        let (tx1, rx1) = oneshot::channel();
        let (tx2, rx2) = oneshot::channel();
        registry.register(3, tx1);
        registry.register(3, tx2);

        for entry in registry.take() {
            entry.resolve(&Ok("three".to_owned()));
        }
        assert_eq!(rx1.await, Ok(Ok("three".to_owned())));
        assert_eq!(rx2.await, Ok(Ok("three".to_owned())));
    }
}
