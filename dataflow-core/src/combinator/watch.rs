//! Per-key side effects.
//!
//! A [`Watch`] is the keyed counterpart of an
//! [`Observer`](crate::reactive::Observer): on reconcile it calls its
//! callback once for every key dirtied since the last pass, with the key's
//! new value or `None` if the key is gone.

use std::fmt::Debug;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::reactive::{ChangeTag, Epoch, KeyedConsumer, KeyedInlet, KeyedProducer, SubscriberId};

type Callback<K, V> = Box<dyn Fn(&K, Option<V>) + Send + Sync>;

/// A keyed consumer that reports every changed key.
pub struct Watch<K, V> {
    subscriber_id: SubscriberId,
    upstream: Arc<dyn KeyedProducer<K, V>>,
    callback: Callback<K, V>,
    inlet: Mutex<KeyedInlet<K>>,
    calls: AtomicUsize,
}

impl<K, V> Watch<K, V>
where
    K: Ord + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Create a watch. Keys the upstream already holds are reported on the
    /// first reconcile.
    pub fn new<F>(upstream: Arc<dyn KeyedProducer<K, V>>, callback: F) -> Arc<Self>
    where
        F: Fn(&K, Option<V>) + Send + Sync + 'static,
    {
        let mut inlet = KeyedInlet::new();
        for key in upstream.keys() {
            inlet.decohere(&key, ChangeTag::Updated);
        }
        let watch = Arc::new(Self {
            subscriber_id: SubscriberId::new(),
            upstream: upstream.clone(),
            callback: Box::new(callback),
            inlet: Mutex::new(inlet),
            calls: AtomicUsize::new(0),
        });
        upstream.subscribe(watch.clone());
        watch
    }

    /// How many times the callback has run.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn dispose(&self) {
        self.upstream.unsubscribe(self.subscriber_id);
    }
}

impl<K, V> KeyedConsumer<K> for Watch<K, V>
where
    K: Ord + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    fn subscriber_id(&self) -> SubscriberId {
        self.subscriber_id
    }

    fn decohere_key(&self, key: &K, tag: ChangeTag) {
        self.inlet.lock().decohere(key, tag);
    }

    fn reconcile_input(&self, epoch: Epoch) {
        let Some(pending) = self.inlet.lock().begin(epoch) else {
            return;
        };
        self.upstream.reconcile_output(epoch);

        for (key, tag) in pending {
            let value = match tag {
                ChangeTag::Updated => self.upstream.get(&key),
                ChangeTag::Removed => None,
            };
            self.calls.fetch_add(1, Ordering::SeqCst);
            (self.callback)(&key, value);
        }
    }
}

impl<K, V> Debug for Watch<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watch")
            .field("subscriber_id", &self.subscriber_id)
            .field("calls", &self.calls.load(Ordering::SeqCst))
            .finish()
    }
}
