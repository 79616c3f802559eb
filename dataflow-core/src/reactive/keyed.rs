//! Keyed producers and consumers.
//!
//! A keyed producer publishes a collection, and announces change one key at
//! a time: `decohere_key(key, tag)` where the [`ChangeTag`] says whether the
//! key was updated or removed. Consumers keep the dirtied keys in a
//! [`KeyedInlet`] and, on reconcile, touch only those keys. A change to one
//! key of a large collection therefore costs work proportional to the path
//! that key takes through the graph, not to the size of the collection.
//!
//! # Tag collapsing
//!
//! Several changes to the same key between two reconciles collapse into the
//! latest tag: `Updated` then `Removed` is a removal, `Removed` then
//! `Updated` is an update.
//!
//! # Updates that turn out to be removals
//!
//! A stage can forward `Updated` for a key and later, at reconcile time,
//! find the key gone (a filter's predicate flipped to false, say). Consumers
//! therefore resolve every `Updated` by reading the producer: `None` there
//! means the key was removed.

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Arc;

use parking_lot::RwLock;

use super::subscriber::{Outlet, SubscriberId};
use super::Epoch;

/// What happened to a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeTag {
    Updated,
    Removed,
}

/// A consumer of a keyed collection.
///
/// `Removed` is final, but `Updated` is only a hint: the key may be gone once
/// the producer reconciles, as when a filter's predicate flips to false. An
/// implementation reads the key back with [`KeyedProducer::get`] after
/// reconciling and treats `None` as a removal.
pub trait KeyedConsumer<K>: Send + Sync {
    fn subscriber_id(&self) -> SubscriberId;

    /// `key` changed upstream. Must not evaluate anything.
    fn decohere_key(&self, key: &K, tag: ChangeTag);

    /// Bring every dirtied key up to date for `epoch`.
    fn reconcile_input(&self, epoch: Epoch);
}

/// A producer of a keyed collection.
pub trait KeyedProducer<K, V>: Send + Sync {
    /// The value at `key` as of the last reconcile.
    fn get(&self, key: &K) -> Option<V>;

    /// All present keys, in order.
    fn keys(&self) -> Vec<K>;

    /// The whole collection as of the last reconcile.
    fn current_value(&self) -> BTreeMap<K, V>
    where
        K: Ord,
    {
        self.keys()
            .into_iter()
            .filter_map(|key| self.get(&key).map(|value| (key, value)))
            .collect()
    }

    fn subscribe(&self, consumer: Arc<dyn KeyedConsumer<K>>);

    fn unsubscribe(&self, id: SubscriberId);

    /// Make `get` valid for `epoch`.
    fn reconcile_output(&self, epoch: Epoch);
}

/// Forward a key change to every live subscriber.
pub(crate) fn decohere_keyed_outputs<K>(
    outlet: &Outlet<dyn KeyedConsumer<K>>,
    key: &K,
    tag: ChangeTag,
) {
    for consumer in outlet.subscribers() {
        consumer.decohere_key(key, tag);
    }
}

/// Pending per-key changes of a keyed consumer.
#[derive(Debug, Clone)]
pub struct KeyedInlet<K> {
    pending: BTreeMap<K, ChangeTag>,
    version: Option<Epoch>,
}

impl<K: Ord + Clone> KeyedInlet<K> {
    pub fn new() -> Self {
        Self {
            pending: BTreeMap::new(),
            version: None,
        }
    }

    /// Record a change. Returns `false` if the key was already pending with
    /// the same tag, in which case downstream has already been told.
    pub fn decohere(&mut self, key: &K, tag: ChangeTag) -> bool {
        self.version = None;
        self.pending.insert(key.clone(), tag) != Some(tag)
    }

    /// Start a reconcile for `epoch`, taking the pending changes.
    ///
    /// Returns `None` if this epoch was already handled or nothing is pending.
    pub fn begin(&mut self, epoch: Epoch) -> Option<BTreeMap<K, ChangeTag>> {
        if self.version == Some(epoch) {
            return None;
        }
        self.version = Some(epoch);
        if self.pending.is_empty() {
            return None;
        }
        Some(std::mem::take(&mut self.pending))
    }

    pub fn is_decoherent(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

impl<K: Ord + Clone> Default for KeyedInlet<K> {
    fn default() -> Self {
        Self::new()
    }
}

/// A writable keyed collection at the root of a pipeline.
pub struct KeyedSource<K, V> {
    entries: RwLock<BTreeMap<K, V>>,
    outlet: Outlet<dyn KeyedConsumer<K>>,
}

impl<K, V> KeyedSource<K, V>
where
    K: Ord + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            entries: RwLock::new(BTreeMap::new()),
            outlet: Outlet::new(),
        })
    }

    pub fn from_entries(entries: impl IntoIterator<Item = (K, V)>) -> Arc<Self> {
        Arc::new(Self {
            entries: RwLock::new(entries.into_iter().collect()),
            outlet: Outlet::new(),
        })
    }

    /// Insert or replace `key`, returning the old value.
    pub fn put(&self, key: K, value: V) -> Option<V> {
        let old = self.entries.write().insert(key.clone(), value);
        decohere_keyed_outputs(&self.outlet, &key, ChangeTag::Updated);
        old
    }

    /// Remove `key`. Subscribers are only told if it was present.
    pub fn remove(&self, key: &K) -> Option<V> {
        let old = self.entries.write().remove(key);
        if old.is_some() {
            decohere_keyed_outputs(&self.outlet, key, ChangeTag::Removed);
        }
        old
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn subscriber_count(&self) -> usize {
        self.outlet.len()
    }
}

impl<K, V> KeyedProducer<K, V> for KeyedSource<K, V>
where
    K: Ord + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn get(&self, key: &K) -> Option<V> {
        self.entries.read().get(key).cloned()
    }

    fn keys(&self) -> Vec<K> {
        self.entries.read().keys().cloned().collect()
    }

    fn current_value(&self) -> BTreeMap<K, V> {
        self.entries.read().clone()
    }

    fn subscribe(&self, consumer: Arc<dyn KeyedConsumer<K>>) {
        self.outlet
            .subscribe(consumer.subscriber_id(), Arc::downgrade(&consumer));
    }

    fn unsubscribe(&self, id: SubscriberId) {
        self.outlet.unsubscribe(id);
    }

    fn reconcile_output(&self, _epoch: Epoch) {}
}

impl<K: Debug, V: Debug> Debug for KeyedSource<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyedSource")
            .field("entries", &*self.entries.read())
            .field("subscribers", &self.outlet.len())
            .finish()
    }
}


#[cfg(test)]
mod tests {
    use super::testing::KeyedProbe;
    use super::*;

    #[test]
    fn later_tags_overwrite_earlier_ones() {
        let mut inlet = KeyedInlet::new();
        assert!(inlet.decohere(&"a", ChangeTag::Updated));
        assert!(inlet.decohere(&"a", ChangeTag::Removed));
        assert!(!inlet.decohere(&"a", ChangeTag::Removed));
        assert!(inlet.decohere(&"b", ChangeTag::Updated));

        let pending = inlet.begin(1).unwrap();
        assert_eq!(pending.get("a"), Some(&ChangeTag::Removed));
        assert_eq!(pending.get("b"), Some(&ChangeTag::Updated));
        assert!(!inlet.is_decoherent());
    }

    #[test]
    fn inlet_begins_once_per_epoch() {
        let mut inlet = KeyedInlet::new();
        inlet.decohere(&1, ChangeTag::Updated);
        assert!(inlet.begin(5).is_some());
        assert!(inlet.begin(5).is_none());

        // Nothing pending in a fresh epoch.
        assert!(inlet.begin(6).is_none());

        // A new change in the same epoch reopens it.
        inlet.decohere(&2, ChangeTag::Updated);
        assert_eq!(inlet.begin(6).map(|p| p.len()), Some(1));
    }

    #[test]
    fn source_put_and_remove_notify_per_key() {
        let source = KeyedSource::new();
        let probe = KeyedProbe::<&str>::new();
        source.subscribe(probe.clone());

        source.put("x", 1);
        source.put("y", 2);
        source.remove(&"x");
        // Removing an absent key is silent.
        source.remove(&"z");

        assert_eq!(
            *probe.seen.lock(),
            vec![
                ("x", ChangeTag::Updated),
                ("y", ChangeTag::Updated),
                ("x", ChangeTag::Removed),
            ]
        );
        assert_eq!(source.get(&"y"), Some(2));
        assert_eq!(source.keys(), vec!["y"]);
    }

    #[test]
    fn default_current_value_collects_keys() {
        let source = KeyedSource::from_entries([(1, "one"), (2, "two")]);
        let snapshot = source.current_value();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[&1], "one");
    }
}
