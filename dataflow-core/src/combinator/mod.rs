//! Keyed Combinators
//!
//! Building blocks for pipelines over keyed collections:
//!
//! - [`filter`] keeps the entries whose value passes a predicate.
//! - [`map`] applies a pure function to every value.
//! - [`memoize`] caches its upstream collection.
//! - [`watch`] runs a callback for each changed key.
//! - [`reduce`] folds the collection into one value.
//!
//! # How a change travels
//!
//! A change to key `k` at the source reaches every stage as
//! `decohere_key(k, tag)`. Stateful stages note `k` as pending and pass the
//! message on. When the sink is reconciled it pulls its upstream for the
//! same epoch, and each stage re-derives only its pending keys. Keys nobody
//! touched are never read.
//!
//! Stages forward an `Updated` tag as they receive it. If the key turns out
//! to be gone at reconcile time (a filter now rejects it), the next stage
//! reads `None` and treats the key as removed.
//!
//! The [`KeyedPipeline`] extension trait offers the same constructors as
//! methods:
//!
//! ```rust,ignore
//! let totals = orders.clone()
//!     .filter(|_, order| order.open)
//!     .map_values(|_, order| order.amount)
//!     .reduce(Sum);
//! ```

use std::sync::Arc;

use crate::reactive::KeyedProducer;
use crate::reduce::Reducer;

mod map;
mod reduce;
mod stage;
mod watch;

pub use map::Map;
pub use reduce::Reduce;
pub use stage::KeyedStage;
pub use watch::Watch;

/// Keep entries whose value satisfies `predicate`.
///
/// The predicate runs once per dirtied key per reconcile. A key whose value
/// stops passing is dropped from the output.
pub fn filter<K, V, P>(upstream: Arc<dyn KeyedProducer<K, V>>, predicate: P) -> Arc<KeyedStage<K, V, V>>
where
    K: Ord + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    P: Fn(&K, &V) -> bool + Send + Sync + 'static,
{
    KeyedStage::new(upstream, move |key, value| predicate(key, &value).then_some(value))
}

/// Apply `f` to every value.
pub fn map<K, I, O, F>(upstream: Arc<dyn KeyedProducer<K, I>>, f: F) -> Arc<Map<K, I, O>>
where
    K: Ord + Clone + Send + Sync + 'static,
    I: Send + Sync + 'static,
    O: Send + Sync + 'static,
    F: Fn(&K, I) -> O + Send + Sync + 'static,
{
    Map::new(upstream, f)
}

/// Cache the upstream collection, re-reading only dirtied keys.
pub fn memoize<K, V>(upstream: Arc<dyn KeyedProducer<K, V>>) -> Arc<KeyedStage<K, V, V>>
where
    K: Ord + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    KeyedStage::new(upstream, |_, value| Some(value))
}

/// Call `callback(key, value)` for every changed key on reconcile.
pub fn watch<K, V, F>(upstream: Arc<dyn KeyedProducer<K, V>>, callback: F) -> Arc<Watch<K, V>>
where
    K: Ord + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
    F: Fn(&K, Option<V>) + Send + Sync + 'static,
{
    Watch::new(upstream, callback)
}

/// Fold the collection with `reducer`.
pub fn reduce<K, V, A, R>(upstream: Arc<dyn KeyedProducer<K, V>>, reducer: R) -> Arc<Reduce<K, V, A, R>>
where
    K: Ord + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
    A: Clone + Send + Sync + 'static,
    R: Reducer<V, A> + 'static,
{
    Reduce::new(upstream, reducer)
}

/// Method-call syntax for the combinators on any shared keyed producer.
pub trait KeyedPipeline<K, V>: KeyedProducer<K, V> + Sized + 'static
where
    K: Ord + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn filter<P>(self: Arc<Self>, predicate: P) -> Arc<KeyedStage<K, V, V>>
    where
        P: Fn(&K, &V) -> bool + Send + Sync + 'static,
    {
        filter(self, predicate)
    }

    fn map_values<O, F>(self: Arc<Self>, f: F) -> Arc<Map<K, V, O>>
    where
        O: Send + Sync + 'static,
        F: Fn(&K, V) -> O + Send + Sync + 'static,
    {
        map(self, f)
    }

    fn memoize(self: Arc<Self>) -> Arc<KeyedStage<K, V, V>> {
        memoize(self)
    }

    fn watch<F>(self: Arc<Self>, callback: F) -> Arc<Watch<K, V>>
    where
        F: Fn(&K, Option<V>) + Send + Sync + 'static,
    {
        watch(self, callback)
    }

    fn reduce<A, R>(self: Arc<Self>, reducer: R) -> Arc<Reduce<K, V, A, R>>
    where
        A: Clone + Send + Sync + 'static,
        R: Reducer<V, A> + 'static,
    {
        reduce(self, reducer)
    }
}

impl<K, V, T> KeyedPipeline<K, V> for T
where
    T: KeyedProducer<K, V> + 'static,
    K: Ord + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{ChangeTag, EpochClock, KeyedSource, Producer};
    use crate::reactive::keyed::KeyedConsumer;
    use crate::reactive::keyed::testing::KeyedProbe;
    use crate::reduce::Sum;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counted<K, V>(
        counter: &Arc<AtomicUsize>,
        predicate: impl Fn(&K, &V) -> bool + Send + Sync + 'static,
    ) -> impl Fn(&K, &V) -> bool + Send + Sync + 'static {
        let counter = counter.clone();
        move |k: &K, v: &V| {
            counter.fetch_add(1, Ordering::SeqCst);
            predicate(k, v)
        }
    }

    #[test]
    fn filter_drops_and_restores_keys() {
        let clock = EpochClock::new();
        let source = KeyedSource::from_entries([("a", 1i64), ("b", 2), ("c", 3)]);
        let odd = filter(source.clone(), |_, v: &i64| v % 2 == 1);

        odd.reconcile_output(clock.advance());
        assert_eq!(odd.keys(), vec!["a", "c"]);

        source.put("a", 4);
        source.put("b", 5);
        odd.reconcile_output(clock.advance());
        assert_eq!(odd.get(&"a"), None);
        assert_eq!(odd.get(&"b"), Some(5));
        assert_eq!(odd.keys(), vec!["b", "c"]);
    }

    #[test]
    fn filter_flip_reaches_watch_as_removal() {
        let clock = EpochClock::new();
        let source = KeyedSource::from_entries([("x", 1i64)]);
        let positive = filter(source.clone(), |_, v: &i64| *v > 0);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let watcher = watch(positive.clone(), move |k: &&str, v: Option<i64>| {
            seen_clone.lock().push((*k, v));
        });

        watcher.reconcile_input(clock.advance());
        assert_eq!(*seen.lock(), vec![("x", Some(1))]);

        source.put("x", -1);
        watcher.reconcile_input(clock.advance());
        assert_eq!(seen.lock().last(), Some(&("x", None)));
    }

    #[test]
    fn filter_flip_is_tagged_updated_and_reads_back_as_none() {
        let clock = EpochClock::new();
        let source = KeyedSource::from_entries([("x", 1i64), ("y", 2)]);
        let positive = filter(source.clone(), |_, v: &i64| *v > 0);
        let total = reduce(positive.clone(), Sum);
        total.reconcile_output(clock.advance());
        assert_eq!(total.current_value(), 3);

        let probe = KeyedProbe::<&str>::new();
        positive.subscribe(probe.clone());
        source.put("x", -1);

        // The tag is decided before the predicate runs
        assert_eq!(*probe.seen.lock(), vec![("x", ChangeTag::Updated)]);

        // Reading the key back after reconcile resolves it as a removal
        total.reconcile_output(clock.advance());
        assert_eq!(positive.get(&"x"), None);
        assert_eq!(total.current_value(), 2);
        assert_eq!(total.len(), 1);
    }

    #[test]
    fn repeated_updates_in_one_epoch_cost_one_evaluation() {
        let clock = EpochClock::new();
        let source = KeyedSource::from_entries([("k", 0i64), ("other", 5)]);
        let predicate_calls = Arc::new(AtomicUsize::new(0));
        let kept = filter(source.clone(), counted(&predicate_calls, |_: &&str, _: &i64| true));
        let doubled = map(kept.clone(), |_, v: i64| v * 2);
        let cached = memoize(doubled.clone());
        cached.reconcile_output(clock.advance());
        assert_eq!(doubled.evaluation_count(), 2);

        source.put("k", 1);
        source.put("k", 2);
        cached.reconcile_output(clock.advance());

        // Both writes land in one epoch: one predicate call, one evaluation
        assert_eq!(predicate_calls.load(Ordering::SeqCst), 3);
        assert_eq!(doubled.evaluation_count(), 3);
        assert_eq!(cached.evaluation_count(), 3);
        assert_eq!(cached.get(&"k"), Some(4));
    }

    #[test]
    fn filter_forwards_tags_per_key() {
        let source = KeyedSource::new();
        let all = filter(source.clone(), |_: &i32, _: &i32| true);
        let probe = KeyedProbe::<i32>::new();
        all.subscribe(probe.clone());

        source.put(1, 10);
        source.remove(&1);
        assert_eq!(
            *probe.seen.lock(),
            vec![(1, ChangeTag::Updated), (1, ChangeTag::Removed)]
        );
    }

    #[test]
    fn one_key_change_costs_one_evaluation() {
        let clock = EpochClock::new();
        let source = KeyedSource::from_entries((0..100).map(|k| (k, k)));
        let predicate_calls = Arc::new(AtomicUsize::new(0));
        let kept = filter(source.clone(), counted(&predicate_calls, |_: &i32, v: &i32| *v >= 0));
        let doubled = map(kept.clone(), |_, v: i32| v * 2);
        let cached = memoize(doubled.clone());
        let watcher = watch(cached.clone(), |_: &i32, _: Option<i32>| {});

        watcher.reconcile_input(clock.advance());
        assert_eq!(predicate_calls.load(Ordering::SeqCst), 100);
        assert_eq!(doubled.evaluation_count(), 100);
        assert_eq!(watcher.call_count(), 100);

        source.put(42, 1000);
        watcher.reconcile_input(clock.advance());

        assert_eq!(predicate_calls.load(Ordering::SeqCst), 101);
        assert_eq!(doubled.evaluation_count(), 101);
        assert_eq!(cached.evaluation_count(), 101);
        assert_eq!(watcher.call_count(), 101);
        assert_eq!(cached.get(&42), Some(2000));
    }

    #[test]
    fn reconcile_twice_in_one_epoch_is_free() {
        let source = KeyedSource::from_entries([(1, 1)]);
        let cached = memoize(source.clone());

        cached.reconcile_output(7);
        cached.reconcile_output(7);
        assert_eq!(cached.evaluation_count(), 1);
    }

    #[test]
    fn memoize_evicts_removed_keys() {
        let clock = EpochClock::new();
        let source = KeyedSource::from_entries([(1, "one"), (2, "two")]);
        let cached = memoize(source.clone());
        cached.reconcile_output(clock.advance());

        source.remove(&1);
        // Still cached until reconciled.
        assert_eq!(cached.get(&1), Some("one"));

        cached.reconcile_output(clock.advance());
        assert_eq!(cached.get(&1), None);
        assert_eq!(cached.current_value().len(), 1);
    }

    #[test]
    fn update_then_remove_collapses_to_remove() {
        let clock = EpochClock::new();
        let source = KeyedSource::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let watcher = watch(source.clone(), move |k: &u8, v: Option<u8>| {
            seen_clone.lock().push((*k, v));
        });

        source.put(1, 1);
        source.put(1, 2);
        source.remove(&1);
        watcher.reconcile_input(clock.advance());
        assert_eq!(*seen.lock(), vec![(1, None)]);
    }

    #[test]
    fn reduce_tracks_sum_of_filtered_values() {
        let clock = EpochClock::new();
        let source = KeyedSource::from_entries((1..=1000i64).map(|k| (k, k)));
        let total = reduce(source.clone(), Sum);

        total.reconcile_output(clock.advance());
        assert_eq!(total.current_value(), 500500);

        source.put(500, 0);
        total.reconcile_output(clock.advance());
        assert_eq!(total.current_value(), 500000);

        source.remove(&1000);
        total.reconcile_output(clock.advance());
        assert_eq!(total.current_value(), 499000);
        assert_eq!(total.len(), 999);
    }

    #[test]
    fn reduce_decoheres_its_consumers_once() {
        let clock = EpochClock::new();
        let source = KeyedSource::from_entries([(1, 1i64)]);
        let total = reduce(source.clone(), Sum);
        let probe = crate::reactive::testing::Probe::new();
        total.subscribe(probe.clone());
        total.reconcile_output(clock.advance());

        source.put(2, 2);
        source.put(3, 3);
        assert_eq!(probe.decohere_count(), 1);
    }

    #[test]
    fn pipeline_methods_chain() {
        let clock = EpochClock::new();
        let source = KeyedSource::from_entries([("a", 1i64), ("b", -2), ("c", 3)]);
        let total = source
            .clone()
            .filter(|_, v: &i64| *v > 0)
            .map_values(|_, v: i64| v * 10)
            .reduce(Sum);

        total.reconcile_output(clock.advance());
        assert_eq!(total.current_value(), 40);

        source.put("b", 2);
        total.reconcile_output(clock.advance());
        assert_eq!(total.current_value(), 60);
    }

    #[test]
    fn dropping_a_stage_detaches_it() {
        let source = KeyedSource::from_entries([(1, 1)]);
        let cached = memoize(source.clone());
        assert_eq!(source.subscriber_count(), 1);

        drop(cached);
        assert_eq!(source.subscriber_count(), 0);
        source.put(2, 2);
    }
}
