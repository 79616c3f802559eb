//! Cached keyed stage.
//!
//! [`KeyedStage`] is the shared machinery behind [`filter`](super::filter)
//! and [`memoize`](super::memoize): a keyed transformer that keeps its output
//! in a map and, on reconcile, re-derives only the keys that were dirtied.
//!
//! For each dirtied key the stage reads the upstream value (nothing for a
//! removal) and hands it to its evaluation function, which decides what, if
//! anything, the stage publishes under that key.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Debug;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::reactive::{
    decohere_keyed_outputs, ChangeTag, Epoch, KeyedConsumer, KeyedInlet, KeyedProducer, Outlet,
    SubscriberId,
};

type Evaluate<K, I, O> = Box<dyn Fn(&K, I) -> Option<O> + Send + Sync>;

struct StageState<K, O> {
    inlet: KeyedInlet<K>,
    cache: BTreeMap<K, O>,
}

/// A keyed transformer with a per-key output cache.
pub struct KeyedStage<K, I, O> {
    subscriber_id: SubscriberId,
    upstream: Arc<dyn KeyedProducer<K, I>>,
    evaluate: Evaluate<K, I, O>,
    state: Mutex<StageState<K, O>>,
    outlet: Outlet<dyn KeyedConsumer<K>>,
    evaluations: AtomicUsize,
}

impl<K, I, O> KeyedStage<K, I, O>
where
    K: Ord + Clone + Send + Sync + 'static,
    I: Send + Sync + 'static,
    O: Clone + Send + Sync + 'static,
{
    /// Create a stage over `upstream`. Keys the upstream already holds start
    /// out dirty, so the first reconcile picks them up.
    pub fn new<F>(upstream: Arc<dyn KeyedProducer<K, I>>, evaluate: F) -> Arc<Self>
    where
        F: Fn(&K, I) -> Option<O> + Send + Sync + 'static,
    {
        let mut inlet = KeyedInlet::new();
        for key in upstream.keys() {
            inlet.decohere(&key, ChangeTag::Updated);
        }
        let stage = Arc::new(Self {
            subscriber_id: SubscriberId::new(),
            upstream: upstream.clone(),
            evaluate: Box::new(evaluate),
            state: Mutex::new(StageState {
                inlet,
                cache: BTreeMap::new(),
            }),
            outlet: Outlet::new(),
            evaluations: AtomicUsize::new(0),
        });
        upstream.subscribe(stage.clone());
        stage
    }

    /// How many times the evaluation function has run.
    pub fn evaluation_count(&self) -> usize {
        self.evaluations.load(Ordering::SeqCst)
    }

    pub fn pending_len(&self) -> usize {
        self.state.lock().inlet.pending_len()
    }

    pub fn disconnect(&self) {
        self.upstream.unsubscribe(self.subscriber_id);
    }
}

impl<K, I, O> KeyedConsumer<K> for KeyedStage<K, I, O>
where
    K: Ord + Clone + Send + Sync + 'static,
    I: Send + Sync + 'static,
    O: Clone + Send + Sync + 'static,
{
    fn subscriber_id(&self) -> SubscriberId {
        self.subscriber_id
    }

    fn decohere_key(&self, key: &K, tag: ChangeTag) {
        let forward = self.state.lock().inlet.decohere(key, tag);
        if forward {
            decohere_keyed_outputs(&self.outlet, key, tag);
        }
    }

    fn reconcile_input(&self, epoch: Epoch) {
        let Some(pending) = self.state.lock().inlet.begin(epoch) else {
            return;
        };
        self.upstream.reconcile_output(epoch);

        let mut resolved = Vec::with_capacity(pending.len());
        for (key, tag) in pending {
            let output = match tag {
                ChangeTag::Updated => self.upstream.get(&key).and_then(|input| {
                    self.evaluations.fetch_add(1, Ordering::SeqCst);
                    (self.evaluate)(&key, input)
                }),
                ChangeTag::Removed => None,
            };
            resolved.push((key, output));
        }

        let mut state = self.state.lock();
        for (key, output) in resolved {
            match output {
                Some(value) => {
                    state.cache.insert(key, value);
                }
                None => {
                    state.cache.remove(&key);
                }
            }
        }
    }
}

impl<K, I, O> KeyedProducer<K, O> for KeyedStage<K, I, O>
where
    K: Ord + Clone + Send + Sync + 'static,
    I: Send + Sync + 'static,
    O: Clone + Send + Sync + 'static,
{
    fn get(&self, key: &K) -> Option<O> {
        self.state.lock().cache.get(key).cloned()
    }

    /// Cached keys plus keys still waiting to be reconciled.
    fn keys(&self) -> Vec<K> {
        let (mut keys, decoherent) = {
            let state = self.state.lock();
            let keys: BTreeSet<K> = state.cache.keys().cloned().collect();
            (keys, state.inlet.is_decoherent())
        };
        if decoherent {
            keys.extend(self.upstream.keys());
        }
        keys.into_iter().collect()
    }

    fn current_value(&self) -> BTreeMap<K, O> {
        self.state.lock().cache.clone()
    }

    fn subscribe(&self, consumer: Arc<dyn KeyedConsumer<K>>) {
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

impl<K: Debug, I, O: Debug> Debug for KeyedStage<K, I, O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyedStage")
            .field("subscriber_id", &self.subscriber_id)
            .field("cache", &self.state.lock().cache)
            .finish()
    }
}
