//! Per-value map stage.
//!
//! A [`Map`] keeps no cache. It forwards decoherence untouched and applies
//! its function when a value is read, so each downstream read of a dirtied
//! key costs exactly one evaluation. Put a [`memoize`](super::memoize) stage
//! after it when several consumers read the same keys.

use std::fmt::Debug;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::reactive::{
    decohere_keyed_outputs, ChangeTag, Epoch, KeyedConsumer, KeyedProducer, Outlet, SubscriberId,
};

/// A keyed transformer applying a pure function to each value.
pub struct Map<K, I, O> {
    subscriber_id: SubscriberId,
    upstream: Arc<dyn KeyedProducer<K, I>>,
    evaluate: Box<dyn Fn(&K, I) -> O + Send + Sync>,
    outlet: Outlet<dyn KeyedConsumer<K>>,
    evaluations: AtomicUsize,
}

impl<K, I, O> Map<K, I, O>
where
    K: Ord + Clone + Send + Sync + 'static,
    I: Send + Sync + 'static,
    O: Send + Sync + 'static,
{
    pub fn new<F>(upstream: Arc<dyn KeyedProducer<K, I>>, evaluate: F) -> Arc<Self>
    where
        F: Fn(&K, I) -> O + Send + Sync + 'static,
    {
        let map = Arc::new(Self {
            subscriber_id: SubscriberId::new(),
            upstream: upstream.clone(),
            evaluate: Box::new(evaluate),
            outlet: Outlet::new(),
            evaluations: AtomicUsize::new(0),
        });
        upstream.subscribe(map.clone());
        map
    }

    pub fn evaluation_count(&self) -> usize {
        self.evaluations.load(Ordering::SeqCst)
    }

    pub fn disconnect(&self) {
        self.upstream.unsubscribe(self.subscriber_id);
    }
}

impl<K, I, O> KeyedConsumer<K> for Map<K, I, O>
where
    K: Ord + Clone + Send + Sync + 'static,
    I: Send + Sync + 'static,
    O: Send + Sync + 'static,
{
    fn subscriber_id(&self) -> SubscriberId {
        self.subscriber_id
    }

    fn decohere_key(&self, key: &K, tag: ChangeTag) {
        decohere_keyed_outputs(&self.outlet, key, tag);
    }

    fn reconcile_input(&self, epoch: Epoch) {
        self.upstream.reconcile_output(epoch);
    }
}

impl<K, I, O> KeyedProducer<K, O> for Map<K, I, O>
where
    K: Ord + Clone + Send + Sync + 'static,
    I: Send + Sync + 'static,
    O: Send + Sync + 'static,
{
    fn get(&self, key: &K) -> Option<O> {
        let input = self.upstream.get(key)?;
        self.evaluations.fetch_add(1, Ordering::SeqCst);
        Some((self.evaluate)(key, input))
    }

    fn keys(&self) -> Vec<K> {
        self.upstream.keys()
    }

    fn subscribe(&self, consumer: Arc<dyn KeyedConsumer<K>>) {
        self.outlet
            .subscribe(consumer.subscriber_id(), Arc::downgrade(&consumer));
    }

    fn unsubscribe(&self, id: SubscriberId) {
        self.outlet.unsubscribe(id);
    }

    fn reconcile_output(&self, epoch: Epoch) {
        self.upstream.reconcile_output(epoch);
    }
}

impl<K, I, O> Debug for Map<K, I, O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Map")
            .field("subscriber_id", &self.subscriber_id)
            .field("evaluations", &self.evaluations.load(Ordering::SeqCst))
            .finish()
    }
}
