//! Reactive Primitives
//!
//! This module implements the push/pull core of the engine: producers that
//! announce change, consumers that react to it, and transformers that are
//! both.
//!
//! # Concepts
//!
//! ## Decoherence
//!
//! When a producer's value changes it does not push the new value anywhere.
//! It tells each subscriber that its input is now *decoherent*. Subscribers
//! that are transformers pass the message on to their own subscribers. This
//! phase is cheap and does no evaluation.
//!
//! ## Reconciliation
//!
//! Whoever wants a fresh value calls `reconcile` with an [`Epoch`]. A node
//! first reconciles its producer for that epoch, then, only if it is still
//! decoherent, re-evaluates. A node that already reconciled for the epoch
//! returns its cache immediately.
//!
//! ## Keyed collections
//!
//! Keyed producers publish per-key changes tagged with a [`ChangeTag`], so a
//! change to one key only costs work along that key's path. See [`keyed`].
//!
//! # Lock discipline
//!
//! Every node guards its own state with a `parking_lot` lock, and never holds
//! that lock while calling into another node. Producers keep weak handles to
//! their consumers so dropping a pipeline tears it down.

use std::sync::Arc;

mod effect;
mod epoch;
pub mod keyed;
mod memo;
mod signal;
mod subscriber;

pub use effect::Observer;
pub use epoch::{Epoch, EpochClock};
pub use keyed::{ChangeTag, KeyedConsumer, KeyedInlet, KeyedProducer, KeyedSource};
pub(crate) use keyed::decohere_keyed_outputs;
pub use memo::{Coherence, Transform};
pub use signal::Source;
pub use subscriber::{Outlet, SubscriberId};

/// A node that reacts to an upstream producer.
pub trait Consumer: Send + Sync {
    fn subscriber_id(&self) -> SubscriberId;

    /// The producer's value may have changed. Must not evaluate anything.
    fn on_decohere(&self);

    /// Bring this node up to date for `epoch`.
    fn reconcile_input(&self, epoch: Epoch);
}

/// A node that owns a value and notifies subscribers when it changes.
pub trait Producer<O>: Send + Sync {
    /// The value as of the last reconcile.
    fn current_value(&self) -> O;

    /// Register a consumer. The producer only keeps a weak handle.
    fn subscribe(&self, consumer: Arc<dyn Consumer>);

    fn unsubscribe(&self, id: SubscriberId);

    /// Make `current_value` valid for `epoch`.
    fn reconcile_output(&self, epoch: Epoch);
}

/// A consumer of `I` that is also a producer of `O`.
pub trait Transformer<I, O>: Consumer + Producer<O> {
    fn evaluate(&self, input: I) -> O;
}

/// Tell every live subscriber in `outlet` that its input changed.
pub(crate) fn decohere_outputs(outlet: &Outlet<dyn Consumer>) {
    for consumer in outlet.subscribers() {
        consumer.on_decohere();
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    /// Consumer that only counts notifications.
    pub struct Probe {
        id: SubscriberId,
        pub decoheres: AtomicUsize,
        pub reconciles: AtomicUsize,
    }

    impl Probe {
        pub fn new() -> Arc<Self> {
            Arc::new(Self {
                id: SubscriberId::new(),
                decoheres: AtomicUsize::new(0),
                reconciles: AtomicUsize::new(0),
            })
        }

        pub fn decohere_count(&self) -> usize {
            self.decoheres.load(Ordering::SeqCst)
        }
    }

    impl Consumer for Probe {
        fn subscriber_id(&self) -> SubscriberId {
            self.id
        }

        fn on_decohere(&self) {
            self.decoheres.fetch_add(1, Ordering::SeqCst);
        }

        fn reconcile_input(&self, _epoch: Epoch) {
            self.reconciles.fetch_add(1, Ordering::SeqCst);
        }
    }
}
