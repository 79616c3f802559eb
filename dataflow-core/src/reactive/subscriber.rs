//! Subscriber bookkeeping.
//!
//! Every consumer in the graph gets a [`SubscriberId`] when it is created.
//! Producers keep their downstream consumers in an [`Outlet`]: a list of weak
//! handles keyed by that id. Producers never own their consumers, so dropping
//! the last strong handle to a consumer is enough to make it unreachable; the
//! outlet prunes dead entries the next time it notifies.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use smallvec::SmallVec;

/// Unique identifier for a subscriber.
///
/// Ids are used to unsubscribe and to avoid duplicate subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

impl SubscriberId {
    /// Generate a new unique subscriber ID.
    ///
    /// Uses an atomic counter to ensure uniqueness across threads.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

/// The downstream half of a producer.
///
/// `C` is the consumer trait object type, e.g. `dyn Consumer` or
/// `dyn KeyedConsumer<K>`.
pub struct Outlet<C: ?Sized> {
    subscribers: Mutex<SmallVec<[(SubscriberId, Weak<C>); 2]>>,
}

impl<C: ?Sized> Outlet<C> {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(SmallVec::new()),
        }
    }

    /// Register a consumer. Re-subscribing the same id replaces the handle.
    pub fn subscribe(&self, id: SubscriberId, consumer: Weak<C>) {
        let mut subscribers = self.subscribers.lock();
        if let Some(slot) = subscribers.iter_mut().find(|(existing, _)| *existing == id) {
            slot.1 = consumer;
        } else {
            subscribers.push((id, consumer));
        }
    }

    pub fn unsubscribe(&self, id: SubscriberId) {
        self.subscribers.lock().retain(|(existing, _)| *existing != id);
    }

    /// Live subscribers, strongest first-subscribed order.
    ///
    /// The lock is released before the caller gets the list, so callers can
    /// notify consumers that call back into this producer.
    pub fn subscribers(&self) -> Vec<Arc<C>> {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|(_, weak)| weak.strong_count() > 0);
        subscribers.iter().filter_map(|(_, weak)| weak.upgrade()).collect()
    }

    /// Number of subscribers still alive.
    pub fn len(&self) -> usize {
        self.subscribers
            .lock()
            .iter()
            .filter(|(_, weak)| weak.strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<C: ?Sized> Default for Outlet<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: ?Sized> std::fmt::Debug for Outlet<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Outlet").field("subscribers", &self.len()).finish()
    }
}
