//! Transform Implementation
//!
//! A Transform is a cached derived value: it consumes one producer and
//! produces the result of a function applied to that producer's value.
//!
//! # How Transforms Work
//!
//! 1. A new transform starts decoherent, holding `O::default()`.
//!
//! 2. When the upstream decoheres it, the transform marks itself decoherent
//!    and forwards the decoherence to its own subscribers. Forwarding happens
//!    only on the coherent-to-decoherent edge, so a burst of writes costs one
//!    message per node.
//!
//! 3. On `reconcile(epoch)` the transform reconciles its upstream for the same
//!    epoch, then, if still decoherent, evaluates once and caches the result.
//!
//! 4. A transform that is coherent, or already reconciling for `epoch`,
//!    returns immediately. The second case also breaks cycles.
//!
//! # Thread Safety
//!
//! The evaluation function runs without the state lock held, so it may read
//! other nodes freely.

use std::fmt::Debug;
use std::sync::Arc;

use parking_lot::Mutex;

use super::subscriber::{Outlet, SubscriberId};
use super::{decohere_outputs, Consumer, Epoch, Producer, Transformer};

/// Whether a node's cache reflects its inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coherence {
    /// The cached value is up-to-date.
    Coherent,

    /// An input changed since the cache was computed.
    Decoherent,
}

struct TransformState<O> {
    value: O,
    coherence: Coherence,
    /// Epoch of the reconcile currently or most recently in progress.
    version: Option<Epoch>,
    evaluations: usize,
}

/// A cached function of one upstream producer.
pub struct Transform<I, O> {
    subscriber_id: SubscriberId,
    upstream: Arc<dyn Producer<I>>,
    evaluate: Box<dyn Fn(I) -> O + Send + Sync>,
    state: Mutex<TransformState<O>>,
    outlet: Outlet<dyn Consumer>,
}

impl<I, O> Transform<I, O>
where
    I: Send + Sync + 'static,
    O: Clone + Default + Send + Sync + 'static,
{
    /// Create a transform and subscribe it to `upstream`.
    pub fn new<F>(upstream: Arc<dyn Producer<I>>, evaluate: F) -> Arc<Self>
    where
        F: Fn(I) -> O + Send + Sync + 'static,
    {
        let transform = Arc::new(Self {
            subscriber_id: SubscriberId::new(),
            upstream: upstream.clone(),
            evaluate: Box::new(evaluate),
            state: Mutex::new(TransformState {
                value: O::default(),
                coherence: Coherence::Decoherent,
                version: None,
                evaluations: 0,
            }),
            outlet: Outlet::new(),
        });
        upstream.subscribe(transform.clone());
        transform
    }

    pub fn state(&self) -> Coherence {
        self.state.lock().coherence
    }

    /// How many times the evaluation function has run.
    pub fn evaluation_count(&self) -> usize {
        self.state.lock().evaluations
    }

    pub fn subscriber_count(&self) -> usize {
        self.outlet.len()
    }

    /// Stop listening to the upstream producer.
    pub fn disconnect(&self) {
        self.upstream.unsubscribe(self.subscriber_id);
    }
}

impl<I, O> Consumer for Transform<I, O>
where
    I: Send + Sync + 'static,
    O: Clone + Default + Send + Sync + 'static,
{
    fn subscriber_id(&self) -> SubscriberId {
        self.subscriber_id
    }

    fn on_decohere(&self) {
        let was_coherent = {
            let mut state = self.state.lock();
            state.version = None;
            std::mem::replace(&mut state.coherence, Coherence::Decoherent) == Coherence::Coherent
        };
        if was_coherent {
            decohere_outputs(&self.outlet);
        }
    }

    fn reconcile_input(&self, epoch: Epoch) {
        {
            let mut state = self.state.lock();
            if state.coherence == Coherence::Coherent || state.version == Some(epoch) {
                return;
            }
            state.version = Some(epoch);
        }

        self.upstream.reconcile_output(epoch);
        let output = self.evaluate(self.upstream.current_value());

        let mut state = self.state.lock();
        state.value = output;
        state.evaluations += 1;
        // A decohere that raced the evaluation clears `version`; stay dirty then.
        if state.version == Some(epoch) {
            state.coherence = Coherence::Coherent;
        }
    }
}

impl<I, O> Producer<O> for Transform<I, O>
where
    I: Send + Sync + 'static,
    O: Clone + Default + Send + Sync + 'static,
{
    fn current_value(&self) -> O {
        self.state.lock().value.clone()
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

impl<I, O> Transformer<I, O> for Transform<I, O>
where
    I: Send + Sync + 'static,
    O: Clone + Default + Send + Sync + 'static,
{
    fn evaluate(&self, input: I) -> O {
        (self.evaluate)(input)
    }
}

impl<I, O: Debug> Debug for Transform<I, O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Transform")
            .field("subscriber_id", &self.subscriber_id)
            .field("value", &state.value)
            .field("coherence", &state.coherence)
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::testing::Probe;
    use crate::reactive::{EpochClock, Source};
    use std::sync::atomic::{AtomicI32, Ordering};

    #[test]
    fn transform_starts_decoherent_with_default() {
        let source = Source::new(2);
        let doubled = Transform::new(source.clone(), |n: i32| n * 2);

        assert_eq!(doubled.state(), Coherence::Decoherent);
        assert_eq!(doubled.current_value(), 0);

        doubled.reconcile_output(1);
        assert_eq!(doubled.current_value(), 4);
        assert_eq!(doubled.state(), Coherence::Coherent);
    }

    #[test]
    fn transform_reconcile_is_idempotent_per_epoch() {
        let source = Source::new(1);
        let call_count = Arc::new(AtomicI32::new(0));
        let call_count_clone = call_count.clone();

        let plus_one = Transform::new(source.clone(), move |n: i32| {
            call_count_clone.fetch_add(1, Ordering::SeqCst);
            n + 1
        });

        plus_one.reconcile_output(1);
        plus_one.reconcile_output(1);
        assert_eq!(call_count.load(Ordering::SeqCst), 1);

        // Nothing changed, so a later epoch is free too.
        plus_one.reconcile_output(2);
        assert_eq!(call_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn transform_recomputes_after_decohere() {
        let clock = EpochClock::new();
        let source = Source::new(1);
        let squared = Transform::new(source.clone(), |n: i32| n * n);

        squared.reconcile_output(clock.advance());
        assert_eq!(squared.current_value(), 1);

        source.set(3);
        assert_eq!(squared.state(), Coherence::Decoherent);
        // Decohere alone does not evaluate.
        assert_eq!(squared.evaluation_count(), 1);
        assert_eq!(squared.current_value(), 1);

        squared.reconcile_output(clock.advance());
        assert_eq!(squared.current_value(), 9);
        assert_eq!(squared.evaluation_count(), 2);
    }

    #[test]
    fn chained_transforms_pull_upstream() {
        let clock = EpochClock::new();
        let source = Source::new(2);
        let doubled = Transform::new(source.clone(), |n: i32| n * 2);
        let described = Transform::new(doubled.clone(), |n: i32| format!("n={n}"));

        source.set(5);
        described.reconcile_output(clock.advance());

        assert_eq!(described.current_value(), "n=10");
        assert_eq!(doubled.evaluation_count(), 1);
    }

    #[test]
    fn decohere_forwards_once_until_reconciled() {
        let clock = EpochClock::new();
        let source = Source::new(0);
        let ident = Transform::new(source.clone(), |n: i32| n);
        let probe = Probe::new();
        ident.subscribe(probe.clone());

        ident.reconcile_output(clock.advance());
        source.set(1);
        source.set(2);
        source.set(3);
        assert_eq!(probe.decohere_count(), 1);

        ident.reconcile_output(clock.advance());
        source.set(4);
        assert_eq!(probe.decohere_count(), 2);
    }

    #[test]
    fn disconnected_transform_stops_listening() {
        let source = Source::new(0);
        let ident = Transform::new(source.clone(), |n: i32| n);
        assert_eq!(source.subscriber_count(), 1);

        ident.disconnect();
        assert_eq!(source.subscriber_count(), 0);
    }
}
