//! Scope handles.

use std::fmt;
use std::sync::Arc;

use super::model::Model;
use super::ScopeId;
use crate::reactive::{Consumer, Epoch, KeyedConsumer, KeyedProducer, Producer, SubscriberId};
use crate::value::{Record, Value};

/// A live, compiled scope.
///
/// Cloning a handle is cheap; clones refer to the same scope. Reads return
/// the state as of the last reconcile. Writes take effect on the next one.
///
/// A scope is also a [`Producer`] of its whole value and a [`KeyedProducer`]
/// of its `key: value` fields, so it can feed transforms and combinators.
#[derive(Clone)]
pub struct Scope {
    model: Arc<Model>,
    id: ScopeId,
}

impl Scope {
    pub(crate) fn new(model: Arc<Model>, id: ScopeId) -> Self {
        Self { model, id }
    }

    pub fn id(&self) -> ScopeId {
        self.id
    }

    /// The value of `key`, falling back to enclosing scopes. `Absent` if no
    /// scope in the chain defines it.
    pub fn get(&self, key: &Value) -> Value {
        self.model.lookup(self.id, key)
    }

    /// The value of a field of this scope only.
    pub fn get_local(&self, key: &Value) -> Option<Value> {
        self.model.get_local(self.id, key)
    }

    /// All items of this scope, nested scopes included.
    pub fn snapshot(&self) -> Record {
        self.model.snapshot(self.id)
    }

    pub fn to_value(&self) -> Value {
        Value::Record(self.snapshot())
    }

    /// Keys of this scope's fields, in order.
    pub fn keys(&self) -> Vec<Value> {
        self.model.field_keys(self.id)
    }

    /// Number of items, bare ones included.
    pub fn len(&self) -> usize {
        self.model.item_count(self.id)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The nested scope stored at `key`.
    pub fn child(&self, key: &Value) -> Option<Scope> {
        let id = self.model.child_scope(self.id, key)?;
        Some(Scope::new(self.model.clone(), id))
    }

    pub fn parent(&self) -> Option<Scope> {
        let id = self.model.parent(self.id)?;
        Some(Scope::new(self.model.clone(), id))
    }

    /// False once the scope has been replaced or removed from its parent.
    pub fn is_live(&self) -> bool {
        self.model.is_live(self.id)
    }

    /// Write `value` to `key`.
    ///
    /// The write lands on the local field if there is one, else on the
    /// nearest enclosing scope that defines `key`, else on a new local field.
    /// Records become nested scopes and expressions are compiled.
    pub fn put(&self, key: impl Into<Value>, value: impl Into<Value>) {
        self.model.put(self.id, key.into(), value.into());
    }

    /// Remove a local field. Returns `false` if there was none.
    pub fn remove(&self, key: &Value) -> bool {
        self.model.remove(self.id, key)
    }

    /// Make `key` a local field fed by `producer`. The subscription holds
    /// until the field is replaced or removed, or the scope is disconnected.
    pub fn bind(&self, key: impl Into<Value>, producer: Arc<dyn Producer<Value>>) {
        self.model.bind(self.id, key.into(), producer);
    }

    /// Bring this scope, and every scope compiled with it, up to date.
    pub fn reconcile_input(&self, epoch: Epoch) {
        self.model.reconcile(epoch);
    }

    /// Release every producer subscription in this scope's subtree.
    /// Returns how many were released.
    pub fn disconnect(&self) -> usize {
        self.model.disconnect(self.id)
    }

    /// Updater evaluations across the whole model since it was built.
    pub fn evaluation_count(&self) -> u64 {
        self.model.evaluation_count()
    }
}

impl Producer<Value> for Scope {
    fn current_value(&self) -> Value {
        self.to_value()
    }

    fn subscribe(&self, consumer: Arc<dyn Consumer>) {
        self.model.subscribe(self.id, consumer);
    }

    fn unsubscribe(&self, id: SubscriberId) {
        self.model.unsubscribe(self.id, id);
    }

    fn reconcile_output(&self, epoch: Epoch) {
        self.model.reconcile(epoch);
    }
}

impl KeyedProducer<Value, Value> for Scope {
    fn get(&self, key: &Value) -> Option<Value> {
        self.get_local(key)
    }

    fn keys(&self) -> Vec<Value> {
        self.model.field_keys(self.id)
    }

    fn subscribe(&self, consumer: Arc<dyn KeyedConsumer<Value>>) {
        self.model.subscribe_keyed(self.id, consumer);
    }

    fn unsubscribe(&self, id: SubscriberId) {
        self.model.unsubscribe_keyed(self.id, id);
    }

    fn reconcile_output(&self, epoch: Epoch) {
        self.model.reconcile(epoch);
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("id", &self.id)
            .field("value", &self.snapshot())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::compiler::{evaluate_literal, FunctionTable, ModelBuilder};
    use crate::config::EngineConfig;
    use crate::reactive::keyed::testing::KeyedProbe;
    use crate::reactive::testing::Probe;
    use crate::reactive::{ChangeTag, EpochClock, Source, Transform};
    use crate::value::{binary, child, children, conditional, invoke, select, BinaryOp, Item};

    fn one_shot(literal: &Record) -> Value {
        evaluate_literal(&literal.clone().into(), FunctionTable::math())
    }

    fn build(literal: Record) -> Scope {
        ModelBuilder::new().build(literal.into()).unwrap()
    }

    #[test]
    fn first_reconcile_evaluates_every_updater() {
        let clock = EpochClock::new();
        let scope = build(
            Record::new()
                .with_field("x", 2)
                .with_field("y", binary(BinaryOp::Times, select("x"), 10))
                .with_field("z", binary(BinaryOp::Plus, select("y"), select("x"))),
        );

        // Nothing evaluated before the first reconcile
        assert_eq!(scope.get(&"y".into()), Value::Absent);

        scope.reconcile_input(clock.advance());
        assert_eq!(scope.get(&"y".into()), Value::from(20));
        assert_eq!(scope.get(&"z".into()), Value::from(22));
        assert_eq!(scope.evaluation_count(), 2);
    }

    #[test]
    fn reconcile_is_idempotent_per_epoch() {
        let clock = EpochClock::new();
        let scope = build(
            Record::new()
                .with_field("x", 1)
                .with_field("y", binary(BinaryOp::Plus, select("x"), 1)),
        );

        let epoch = clock.advance();
        scope.reconcile_input(epoch);
        let first = scope.snapshot();
        let evaluations = scope.evaluation_count();

        scope.reconcile_input(epoch);
        assert_eq!(scope.snapshot(), first);
        assert_eq!(scope.evaluation_count(), evaluations);

        // A fresh epoch with no writes has nothing to do either
        scope.reconcile_input(clock.advance());
        assert_eq!(scope.evaluation_count(), evaluations);
    }

    #[test]
    fn only_readers_of_a_written_field_re_evaluate() {
        let clock = EpochClock::new();
        let scope = build(
            Record::new()
                .with_field("a", 1)
                .with_field("b", 2)
                .with_field("from_a", binary(BinaryOp::Times, select("a"), 2))
                .with_field("from_b", binary(BinaryOp::Times, select("b"), 2)),
        );
        scope.reconcile_input(clock.advance());
        assert_eq!(scope.evaluation_count(), 2);

        scope.put("a", 5);
        scope.reconcile_input(clock.advance());
        assert_eq!(scope.get(&"from_a".into()), Value::from(10));
        assert_eq!(scope.evaluation_count(), 3);
    }

    #[test]
    fn unchanged_results_stop_propagation() {
        let clock = EpochClock::new();
        let scope = build(
            Record::new()
                .with_field("n", 3)
                .with_field("positive", binary(BinaryOp::Gt, select("n"), 0))
                .with_field("label", conditional(select("positive"), "yes", "no")),
        );
        scope.reconcile_input(clock.advance());
        assert_eq!(scope.evaluation_count(), 2);

        // `positive` re-evaluates to the same value, so `label` is skipped
        scope.put("n", 4);
        scope.reconcile_input(clock.advance());
        assert_eq!(scope.evaluation_count(), 3);
        assert_eq!(scope.get(&"label".into()), Value::text("yes"));

        scope.put("n", -1);
        scope.reconcile_input(clock.advance());
        assert_eq!(scope.evaluation_count(), 5);
        assert_eq!(scope.get(&"label".into()), Value::text("no"));
    }

    #[test]
    fn dependencies_follow_the_branch_taken() {
        let clock = EpochClock::new();
        let scope = build(
            Record::new()
                .with_field("flag", true)
                .with_field("left", 1)
                .with_field("right", 2)
                .with_field("pick", conditional(select("flag"), select("left"), select("right"))),
        );
        scope.reconcile_input(clock.advance());
        let evaluations = scope.evaluation_count();

        // `right` was never read, so writing it costs nothing
        scope.put("right", 20);
        scope.reconcile_input(clock.advance());
        assert_eq!(scope.evaluation_count(), evaluations);

        scope.put("flag", false);
        scope.reconcile_input(clock.advance());
        assert_eq!(scope.get(&"pick".into()), Value::from(20));
    }

    #[test]
    fn writing_a_missing_name_wakes_its_readers() {
        let clock = EpochClock::new();
        let scope = build(Record::new().with_field("y", binary(BinaryOp::Plus, select("later"), 1)));
        scope.reconcile_input(clock.advance());
        assert_eq!(scope.get(&"y".into()), Value::Absent);

        scope.put("later", 41);
        scope.reconcile_input(clock.advance());
        assert_eq!(scope.get(&"y".into()), Value::from(42));
    }

    #[test]
    fn put_compiles_expressions_and_records() {
        let clock = EpochClock::new();
        let scope = build(Record::new().with_field("x", 3));
        scope.put("sq", invoke("pow", vec![select("x"), 2.into()]));
        scope.put("inner", Record::new().with_field("twice", binary(BinaryOp::Times, select("x"), 2)));
        scope.reconcile_input(clock.advance());

        assert_eq!(scope.get(&"sq".into()), Value::from(9));
        let inner = scope.child(&"inner".into()).unwrap();
        assert_eq!(inner.get(&"twice".into()), Value::from(6));
        assert_eq!(inner.parent().map(|p| p.id()), Some(scope.id()));
    }

    #[test]
    fn replacing_a_nested_scope_retires_it() {
        let clock = EpochClock::new();
        let scope = build(
            Record::new()
                .with_field("inner", Record::new().with_field("v", 1))
                .with_field("read", select_inner_v()),
        );
        scope.reconcile_input(clock.advance());
        assert_eq!(scope.get(&"read".into()), Value::from(1));

        let old = scope.child(&"inner".into()).unwrap();
        scope.put("inner", 7);
        scope.reconcile_input(clock.advance());

        assert!(!old.is_live());
        assert_eq!(scope.get(&"read".into()), Value::Absent);
    }

    fn select_inner_v() -> Value {
        crate::value::select_path(vec![
            crate::value::Step::Field("inner".into()),
            crate::value::Step::Field("v".into()),
        ])
    }

    #[test]
    fn positional_items_and_children() {
        let clock = EpochClock::new();
        let scope = build(
            Record::new()
                .with_value(10)
                .with_value(20)
                .with_field("second", child(1))
                .with_field("count", invoke("max", vec![])),
        );
        scope.put("all", children());
        scope.reconcile_input(clock.advance());

        assert_eq!(scope.get(&"second".into()), Value::from(20));
        assert_eq!(scope.len(), 5);
        let all = scope.get(&"all".into());
        assert_eq!(all.as_record().map(Record::len), Some(5));
        assert_eq!(scope.snapshot().item(0), Some(&Item::Value(10.into())));
    }

    #[test]
    fn bound_producer_feeds_a_field() {
        let clock = EpochClock::new();
        let source = Source::new(Value::from(1));
        let scope = build(Record::new().with_field("plus_one", binary(BinaryOp::Plus, select("input"), 1)));
        scope.bind("input", source.clone());
        assert_eq!(source.subscriber_count(), 1);

        scope.reconcile_input(clock.advance());
        assert_eq!(scope.get(&"plus_one".into()), Value::from(2));

        source.set(Value::from(10));
        scope.reconcile_input(clock.advance());
        assert_eq!(scope.get(&"plus_one".into()), Value::from(11));

        assert_eq!(scope.disconnect(), 1);
        assert_eq!(source.subscriber_count(), 0);
    }

    #[test]
    fn scope_is_a_whole_value_producer() {
        let clock = EpochClock::new();
        let scope = build(
            Record::new()
                .with_field("x", 1)
                .with_field("y", binary(BinaryOp::Plus, select("x"), 1)),
        );
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        let y = Transform::new(Arc::new(scope.clone()), move |value: Value| {
            count_clone.fetch_add(1, Ordering::SeqCst);
            value.as_record().and_then(|r| r.get(&"y".into()).cloned()).unwrap_or_default()
        });

        y.reconcile_input(clock.advance());
        assert_eq!(y.current_value(), Value::from(2));

        let probe = Probe::new();
        y.subscribe(probe.clone());

        // Writing the scope decoheres the transform, which tells the probe
        scope.put("x", 5);
        assert_eq!(probe.decohere_count(), 1);

        y.reconcile_input(clock.advance());
        assert_eq!(y.current_value(), Value::from(6));
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn keyed_subscribers_see_field_changes() {
        let scope = build(
            Record::new()
                .with_field("x", 1)
                .with_field("y", binary(BinaryOp::Plus, select("x"), 1))
                .with_field("z", 0),
        );
        scope.reconcile_input(1);
        let probe = KeyedProbe::<Value>::new();
        KeyedProducer::subscribe(&scope, probe.clone());

        scope.put("x", 2);
        scope.remove(&"z".into());

        let seen = probe.seen.lock().clone();
        assert!(seen.contains(&("x".into(), ChangeTag::Updated)));
        assert!(seen.contains(&("y".into(), ChangeTag::Updated)));
        assert!(seen.contains(&("z".into(), ChangeTag::Removed)));
        assert_eq!(KeyedProducer::keys(&scope), vec![Value::text("x"), Value::text("y")]);
    }

    #[test]
    fn cycle_reads_the_field_reached_first_as_absent() {
        let clock = EpochClock::new();
        let mut literal = Record::new()
            .with_field("x", 1)
            .with_field(
                "a",
                binary(BinaryOp::Plus, binary(BinaryOp::Or, select("b"), 0), select("x")),
            )
            .with_field("b", select("a"));
        let scope = build(literal.clone());

        scope.reconcile_input(clock.advance());
        assert_eq!(scope.get(&"a".into()), Value::from(1));
        assert_eq!(scope.get(&"b".into()), Value::Absent);
        assert_eq!(scope.to_value(), one_shot(&literal));

        // One evaluation per field of the cycle, not one per pull level
        let before = scope.evaluation_count();
        scope.put("x", 2);
        literal.set("x", 2);
        scope.reconcile_input(clock.advance());
        assert_eq!(scope.evaluation_count() - before, 2);
        assert_eq!(scope.get(&"a".into()), Value::from(2));
        assert_eq!(scope.to_value(), one_shot(&literal));

        // Breaking the cycle goes back to incremental passes
        scope.put("b", 5);
        literal.set("b", 5);
        scope.reconcile_input(clock.advance());
        assert_eq!(scope.to_value(), one_shot(&literal));
        let before = scope.evaluation_count();
        scope.put("x", 3);
        literal.set("x", 3);
        scope.reconcile_input(clock.advance());
        assert_eq!(scope.evaluation_count() - before, 1);
        assert_eq!(scope.get(&"a".into()), Value::from(8));
        assert_eq!(scope.to_value(), one_shot(&literal));
    }

    #[test]
    fn whole_scope_read_sees_itself_as_absent() {
        let clock = EpochClock::new();
        let mut literal = Record::new().with_field("n", 1).with_field("all", children());
        let scope = build(literal.clone());
        scope.reconcile_input(clock.advance());
        assert_eq!(scope.to_value(), one_shot(&literal));

        for n in 2..=4 {
            let before = scope.evaluation_count();
            scope.put("n", n);
            literal.set("n", n);
            scope.reconcile_input(clock.advance());
            assert_eq!(scope.evaluation_count() - before, 1);
            assert_eq!(scope.to_value(), one_shot(&literal));
        }
        assert_eq!(
            scope.get(&"all".into()),
            Value::Record(Record::new().with_value(Value::from(4)).with_value(Value::Absent))
        );
    }

    #[test]
    fn deep_chain_settles_in_one_reconcile() {
        let clock = EpochClock::new();
        // Declared last link first, so the first pass pulls the whole chain.
        let mut literal = Record::new();
        for i in (1..=40).rev() {
            literal = literal.with_field(
                format!("f{i}"),
                binary(BinaryOp::Plus, select(format!("f{}", i - 1)), 1),
            );
        }
        let literal = literal.with_field("f0", 0);
        let scope = ModelBuilder::with_config(EngineConfig {
            max_pull_depth: 8,
            ..EngineConfig::default()
        })
        .build(literal.clone().into())
        .unwrap();

        scope.reconcile_input(clock.advance());
        assert_eq!(scope.get(&"f40".into()), Value::from(40));
        assert_eq!(scope.to_value(), one_shot(&literal));

        // With the links known, a write costs one evaluation per reader
        let before = scope.evaluation_count();
        scope.put("f0", 10);
        scope.reconcile_input(clock.advance());
        assert_eq!(scope.evaluation_count() - before, 40);
        assert_eq!(scope.get(&"f40".into()), Value::from(50));
    }
}
