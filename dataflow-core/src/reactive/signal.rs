//! Source Implementation
//!
//! A Source is the root of a pipeline: a cell holding a value that outside
//! code writes to.
//!
//! # How Sources Work
//!
//! 1. A source holds its current value behind a lock.
//!
//! 2. Consumers subscribe to it and are kept as weak handles.
//!
//! 3. When the value is set, every subscriber is decohered. Nothing is
//!    evaluated until somebody reconciles.
//!
//! A source is always coherent, so reconciling it is a no-op.

use std::fmt::Debug;
use std::sync::Arc;

use parking_lot::RwLock;

use super::subscriber::{Outlet, SubscriberId};
use super::{decohere_outputs, Consumer, Epoch, Producer};

/// A writable value at the root of the graph.
///
/// # Example
///
/// ```rust,ignore
/// let count = Source::new(0);
/// let doubled = Transform::new(count.clone(), |n| n * 2);
///
/// count.set(5);
/// doubled.reconcile_output(clock.advance());
/// assert_eq!(doubled.current_value(), 10);
/// ```
pub struct Source<T> {
    value: RwLock<T>,
    outlet: Outlet<dyn Consumer>,
}

impl<T> Source<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(value: T) -> Arc<Self> {
        Arc::new(Self {
            value: RwLock::new(value),
            outlet: Outlet::new(),
        })
    }

    pub fn get(&self) -> T {
        self.value.read().clone()
    }

    /// Replace the value and decohere all subscribers.
    pub fn set(&self, value: T) {
        *self.value.write() = value;
        decohere_outputs(&self.outlet);
    }

    /// Update the value using a function of the old one.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&T) -> T,
    {
        {
            let mut guard = self.value.write();
            *guard = f(&guard);
        }
        decohere_outputs(&self.outlet);
    }

    pub fn subscriber_count(&self) -> usize {
        self.outlet.len()
    }
}

impl<T> Producer<T> for Source<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn current_value(&self) -> T {
        self.get()
    }

    fn subscribe(&self, consumer: Arc<dyn Consumer>) {
        self.outlet
            .subscribe(consumer.subscriber_id(), Arc::downgrade(&consumer));
    }

    fn unsubscribe(&self, id: SubscriberId) {
        self.outlet.unsubscribe(id);
    }

    fn reconcile_output(&self, _epoch: Epoch) {}
}

impl<T: Debug> Debug for Source<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Source")
            .field("value", &*self.value.read())
            .field("subscribers", &self.outlet.len())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
