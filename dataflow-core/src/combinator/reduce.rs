//! Keyed reduction stage.
//!
//! [`Reduce`] folds a keyed collection into one value. It is a keyed
//! consumer on its input side and a plain [`Producer`] on its output side:
//! any key change decoheres the whole output. Internally it mirrors the
//! collection into a [`ReduceTree`], so reconciling after `k` key changes
//! costs `O(k log n)` reducer calls.

use std::fmt::Debug;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::reactive::{
    decohere_outputs, ChangeTag, Consumer, Epoch, KeyedConsumer, KeyedInlet, KeyedProducer,
    Outlet, Producer, SubscriberId,
};
use crate::reduce::{ReduceTree, Reducer};

struct ReduceState<K, V, A, R> {
    inlet: KeyedInlet<K>,
    tree: ReduceTree<K, V, A, R>,
}

/// An incrementally maintained fold of a keyed collection.
pub struct Reduce<K, V, A, R> {
    subscriber_id: SubscriberId,
    upstream: Arc<dyn KeyedProducer<K, V>>,
    state: Mutex<ReduceState<K, V, A, R>>,
    outlet: Outlet<dyn Consumer>,
}

impl<K, V, A, R> Reduce<K, V, A, R>
where
    K: Ord + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
    A: Clone + Send + Sync + 'static,
    R: Reducer<V, A> + 'static,
{
    pub fn new(upstream: Arc<dyn KeyedProducer<K, V>>, reducer: R) -> Arc<Self> {
        let mut inlet = KeyedInlet::new();
        for key in upstream.keys() {
            inlet.decohere(&key, ChangeTag::Updated);
        }
        let reduce = Arc::new(Self {
            subscriber_id: SubscriberId::new(),
            upstream: upstream.clone(),
            state: Mutex::new(ReduceState {
                inlet,
                tree: ReduceTree::new(reducer),
            }),
            outlet: Outlet::new(),
        });
        upstream.subscribe(reduce.clone());
        reduce
    }

    /// Number of entries folded.
    pub fn len(&self) -> usize {
        self.state.lock().tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn tree_height(&self) -> u32 {
        self.state.lock().tree.height()
    }

    pub fn disconnect(&self) {
        self.upstream.unsubscribe(self.subscriber_id);
    }
}

impl<K, V, A, R> KeyedConsumer<K> for Reduce<K, V, A, R>
where
    K: Ord + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
    A: Clone + Send + Sync + 'static,
    R: Reducer<V, A> + 'static,
{
    fn subscriber_id(&self) -> SubscriberId {
        self.subscriber_id
    }

    fn decohere_key(&self, key: &K, tag: ChangeTag) {
        let was_coherent = {
            let mut state = self.state.lock();
            let was_coherent = !state.inlet.is_decoherent();
            state.inlet.decohere(key, tag);
            was_coherent
        };
        if was_coherent {
            decohere_outputs(&self.outlet);
        }
    }

    fn reconcile_input(&self, epoch: Epoch) {
        let Some(pending) = self.state.lock().inlet.begin(epoch) else {
            return;
        };
        self.upstream.reconcile_output(epoch);

        let resolved: Vec<(K, Option<V>)> = pending
            .into_iter()
            .map(|(key, tag)| {
                let value = match tag {
                    ChangeTag::Updated => self.upstream.get(&key),
                    ChangeTag::Removed => None,
                };
                (key, value)
            })
            .collect();

        let mut state = self.state.lock();
        for (key, value) in resolved {
            match value {
                Some(value) => {
                    state.tree.insert(key, value);
                }
                None => {
                    state.tree.remove(&key);
                }
            }
        }
    }
}

impl<K, V, A, R> Producer<A> for Reduce<K, V, A, R>
where
    K: Ord + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
    A: Clone + Send + Sync + 'static,
    R: Reducer<V, A> + 'static,
{
    fn current_value(&self) -> A {
        self.state.lock().tree.fold()
    }

    fn subscribe(&self, consumer: Arc<dyn Consumer>) {
        self.outlet
            .subscribe(consumer.subscriber_id(), Arc::downgrade(&consumer));
    }

    fn unsubscribe(&self, id: SubscriberId) {
        self.outlet.unsubscribe(id);
    }

    fn reconcile_output(&self, epoch: Epoch) {
        self.reconcile_input(epoch);
    }
}

impl<K: Debug, V: Debug, A, R> Debug for Reduce<K, V, A, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reduce")
            .field("subscriber_id", &self.subscriber_id)
            .field("tree", &self.state.lock().tree)
            .finish()
    }
}
