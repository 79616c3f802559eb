//! Integration Tests for the Dataflow Engine
//!
//! These tests drive the public API end to end: sources feeding combinator
//! pipelines, compiled scopes, and the scope agent.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use proptest::prelude::*;

use dataflow_core::combinator::{filter, reduce, watch};
use dataflow_core::reduce::{FnReducer, Sum};
use dataflow_core::value::{children, conditional, invoke};
use dataflow_core::{
    binary, evaluate_literal, select, BinaryOp, EngineConfig, EpochClock, FunctionTable,
    KeyedConsumer, KeyedPipeline, KeyedProducer, KeyedSource, ModelBuilder, Producer, Record,
    ScopeAgent, Transform, Value,
};

fn is_even(value: &i64) -> bool {
    value % 2 == 0
}

/// Reconciling twice in the same epoch does no extra work.
#[test]
fn reconcile_is_idempotent_within_an_epoch() {
    let clock = EpochClock::new();
    let source = KeyedSource::from_entries((0..10i64).map(|i| (i, i)));
    let evens = filter(source.clone(), |_, v: &i64| is_even(v));

    let epoch = clock.advance();
    evens.reconcile_output(epoch);
    let after_first = evens.evaluation_count();
    evens.reconcile_output(epoch);

    assert_eq!(after_first, 10);
    assert_eq!(evens.evaluation_count(), after_first);
}

/// Changing one key only re-evaluates that key downstream.
#[test]
fn keyed_changes_stay_local() {
    let clock = EpochClock::new();
    let source = KeyedSource::from_entries((0..100i64).map(|i| (i, i)));
    let doubled = source.clone().map_values(|_, v: i64| v * 2);
    let cached = doubled.clone().memoize();
    cached.reconcile_output(clock.advance());
    assert_eq!(doubled.evaluation_count(), 100);

    source.put(42, 1);
    cached.reconcile_output(clock.advance());

    // One key changed, one evaluation.
    assert_eq!(doubled.evaluation_count(), 101);
    assert_eq!(cached.get(&42), Some(2));
    assert_eq!(cached.get(&41), Some(82));
    assert_eq!(doubled.evaluation_count(), 101);
}

/// Summing 1..=1000, then zeroing one entry, refolds only its path.
#[test]
fn reduction_updates_in_log_time() {
    let clock = EpochClock::new();
    let source = KeyedSource::from_entries((1..=1000i64).map(|i| (i, i)));
    let total = reduce(source.clone(), Sum);
    total.reconcile_output(clock.advance());
    assert_eq!(total.current_value(), 500_500);

    let ops = Arc::new(AtomicUsize::new(0));
    let counting = {
        let accumulate_ops = ops.clone();
        let combine_ops = ops.clone();
        FnReducer::new(
            || 0i64,
            move |acc: i64, v: &i64| {
                accumulate_ops.fetch_add(1, Ordering::SeqCst);
                acc + v
            },
            move |a: i64, b: i64| {
                combine_ops.fetch_add(1, Ordering::SeqCst);
                a + b
            },
        )
    };
    let counted = reduce(source.clone(), counting);
    counted.reconcile_output(clock.advance());
    ops.store(0, Ordering::SeqCst);

    source.put(500, 0);
    let epoch = clock.advance();
    total.reconcile_output(epoch);
    counted.reconcile_output(epoch);

    assert_eq!(total.current_value(), 500_000);
    assert_eq!(counted.current_value(), 500_000);
    // Each node on one root-to-leaf path refolds with at most three calls.
    let bound = 3 * (counted.tree_height() as usize + 1);
    assert!(ops.load(Ordering::SeqCst) <= bound, "ops = {}", ops.load(Ordering::SeqCst));
}

/// A key whose value stops passing the filter disappears downstream.
#[test]
fn filter_flip_is_seen_as_removal() {
    let clock = EpochClock::new();
    let source = KeyedSource::<&'static str, i64>::new();
    let evens = filter(source.clone(), |_, v: &i64| is_even(v));

    let seen: Arc<Mutex<Vec<(&'static str, Option<i64>)>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = {
        let seen = seen.clone();
        watch(evens.clone(), move |key, value| seen.lock().push((*key, value)))
    };

    source.put("two", 2);
    sink.reconcile_input(clock.advance());
    assert_eq!(evens.get(&"two"), Some(2));

    source.put("two", 3);
    sink.reconcile_input(clock.advance());
    assert_eq!(evens.get(&"two"), None);
    assert_eq!(evens.keys(), Vec::<&str>::new());

    assert_eq!(*seen.lock(), vec![("two", Some(2)), ("two", None)]);
}

/// Local fields shadow enclosing ones; removing the local reveals the outer.
#[test]
fn scope_fallback_after_local_removal() {
    let clock = EpochClock::new();
    let root = ModelBuilder::new()
        .build(
            Record::new()
                .with_field("x", 9)
                .with_field(
                    "inner",
                    Record::new().with_field("y", select("x")).with_field("x", 2),
                )
                .into(),
        )
        .unwrap();
    root.reconcile_input(clock.advance());

    let inner = root.child(&"inner".into()).unwrap();
    assert_eq!(inner.get(&"y".into()), Value::from(2));

    assert!(inner.remove(&"x".into()));
    root.reconcile_input(clock.advance());
    assert_eq!(inner.get(&"y".into()), Value::from(9));
    assert_eq!(inner.get_local(&"x".into()), None);
}

/// A write from a child to a name it does not own lands on the owner, where
/// a sibling reading the name picks it up.
#[test]
fn delegated_write_reaches_sibling() {
    let clock = EpochClock::new();
    let root = ModelBuilder::new()
        .build(
            Record::new()
                .with_field("count", 1)
                .with_field("writer", Record::new().with_field("label", "w"))
                .with_field(
                    "reader",
                    Record::new().with_field("seen", binary(BinaryOp::Plus, select("count"), 100)),
                )
                .into(),
        )
        .unwrap();
    root.reconcile_input(clock.advance());

    let writer = root.child(&"writer".into()).unwrap();
    let reader = root.child(&"reader".into()).unwrap();
    assert_eq!(reader.get(&"seen".into()), Value::from(101));

    writer.put("count", 5);
    root.reconcile_input(clock.advance());

    assert_eq!(writer.get_local(&"count".into()), None);
    assert_eq!(root.get(&"count".into()), Value::from(5));
    assert_eq!(reader.get(&"seen".into()), Value::from(105));
}

/// The live scope and the one-shot interpreter agree, and the reconciled
/// snapshot survives MessagePack.
#[test]
fn snapshot_matches_literal_evaluation() {
    let clock = EpochClock::new();
    let literal: Value = Record::new()
        .with_field("a", 3)
        .with_field("b", binary(BinaryOp::Times, select("a"), select("a")))
        .with_field(
            "big",
            conditional(binary(BinaryOp::Gt, select("b"), 5), "yes", "no"),
        )
        .with_field("root", invoke("sqrt", vec![select("b")]))
        .with_field("nested", Record::new().with_field("c", binary(BinaryOp::Minus, select("b"), 1)))
        .with_value(Value::from("bare"))
        .into();

    let scope = ModelBuilder::new().build(literal.clone()).unwrap();
    scope.reconcile_input(clock.advance());
    let snapshot = scope.to_value();

    let expected = evaluate_literal(&literal, FunctionTable::math());
    assert_eq!(snapshot, expected);

    let bytes = snapshot.to_msgpack().unwrap();
    assert_eq!(Value::from_msgpack(&bytes).unwrap(), expected);
}

/// A chain longer than the pull depth, declared last link first, still
/// settles in one reconcile.
#[test]
fn long_reverse_chain_settles() {
    let clock = EpochClock::new();
    let mut literal = Record::new();
    for i in (1..=300).rev() {
        literal = literal.with_field(
            format!("f{i}"),
            binary(BinaryOp::Plus, select(format!("f{}", i - 1)), 1),
        );
    }
    let literal: Value = literal.with_field("f0", 0).into();

    let scope = ModelBuilder::new().build(literal.clone()).unwrap();
    scope.reconcile_input(clock.advance());

    assert_eq!(scope.get(&"f300".into()), Value::from(300));
    assert_eq!(scope.to_value(), evaluate_literal(&literal, FunctionTable::math()));

    scope.put("f0", 1);
    scope.reconcile_input(clock.advance());
    assert_eq!(scope.get(&"f300".into()), Value::from(301));
}

const KEYS: [&str; 10] = ["x", "a", "b", "me", "all", "c0", "c6", "c12", "inner", "fresh"];

/// Candidate values for a write, picked by index.
fn field_value(choice: usize) -> Value {
    match choice {
        0 => Value::from(3),
        1 => Value::from(-2),
        2 => binary(BinaryOp::Plus, select("x"), 1),
        3 => binary(BinaryOp::Plus, binary(BinaryOp::Or, select("b"), 0), select("x")),
        4 => select("a"),
        5 => binary(BinaryOp::Plus, select("me"), 1),
        6 => select("c12"),
        7 => children(),
        _ => Record::new()
            .with_field("y", binary(BinaryOp::Times, select("x"), 2))
            .with_field("z", select("c3"))
            .into(),
    }
}

/// A cycle, a self reference, a whole-scope read, and a chain deeper than
/// the pull depth, declared last link first.
fn tangled_literal() -> Record {
    let mut literal = Record::new()
        .with_field("x", 1)
        .with_field("a", field_value(3))
        .with_field("b", field_value(4))
        .with_field("me", field_value(5))
        .with_field("all", field_value(7));
    for i in (1..=12).rev() {
        literal = literal.with_field(
            format!("c{i}"),
            binary(BinaryOp::Plus, select(format!("c{}", i - 1)), 1),
        );
    }
    literal
        .with_field("c0", select("x"))
        .with_field(
            "inner",
            Record::new()
                .with_field("y", binary(BinaryOp::Times, select("x"), 2))
                .with_field("z", select("c6")),
        )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// After any sequence of writes and removals, the live scope holds what
    /// evaluating the edited literal from scratch gives.
    #[test]
    fn live_scope_matches_fresh_evaluation(
        ops in proptest::collection::vec((0..KEYS.len(), proptest::option::of(0usize..9)), 1..12)
    ) {
        let clock = EpochClock::new();
        let mut literal = tangled_literal();
        let scope = ModelBuilder::with_config(EngineConfig {
            max_pull_depth: 4,
            ..EngineConfig::default()
        })
        .build(literal.clone().into())
        .unwrap();
        scope.reconcile_input(clock.advance());
        prop_assert_eq!(
            scope.to_value(),
            evaluate_literal(&literal.clone().into(), FunctionTable::math())
        );

        for (key, choice) in ops {
            let key = Value::from(KEYS[key]);
            match choice {
                Some(choice) => {
                    scope.put(key.clone(), field_value(choice));
                    literal.set(key, field_value(choice));
                }
                None => {
                    scope.remove(&key);
                    literal.remove(&key);
                }
            }
            scope.reconcile_input(clock.advance());
            prop_assert_eq!(
                scope.to_value(),
                evaluate_literal(&literal.clone().into(), FunctionTable::math())
            );
        }
    }
}

/// A scope drives a transform like any other producer.
#[test]
fn scope_feeds_transform() {
    let clock = EpochClock::new();
    let scope = Arc::new(
        ModelBuilder::new()
            .build(Record::new().with_field("n", 4).into())
            .unwrap(),
    );
    let length = Transform::new(scope.clone(), |value: Value| {
        value.as_record().map(|record| record.len()).unwrap_or(0)
    });

    assert_eq!(length.current_value(), 0);
    length.reconcile_output(clock.advance());
    assert_eq!(length.current_value(), 1);

    scope.put("m", 5);
    length.reconcile_output(clock.advance());
    assert_eq!(length.current_value(), 2);
}

/// A scope's fields can be watched key by key.
#[test]
fn scope_fields_are_watchable() {
    let clock = EpochClock::new();
    let scope = Arc::new(
        ModelBuilder::new()
            .build(
                Record::new()
                    .with_field("x", 1)
                    .with_field("y", binary(BinaryOp::Plus, select("x"), 1))
                    .into(),
            )
            .unwrap(),
    );
    scope.reconcile_input(clock.advance());

    let seen: Arc<Mutex<Vec<(Value, Option<Value>)>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = {
        let seen = seen.clone();
        watch(scope.clone() as Arc<dyn KeyedProducer<Value, Value>>, move |key, value| {
            seen.lock().push((key.clone(), value))
        })
    };
    sink.reconcile_input(clock.advance());
    seen.lock().clear();

    // The write decoheres `x` and, through the graph, `y`.
    scope.put("x", 10);
    sink.reconcile_input(clock.advance());

    let seen = seen.lock();
    assert!(seen.contains(&(Value::from("x"), Some(Value::from(10)))));
    assert!(seen.contains(&(Value::from("y"), Some(Value::from(11)))));
}

#[tokio::test]
async fn agent_serializes_access_to_a_scope() {
    let scope = ModelBuilder::new()
        .build(
            Record::new()
                .with_field("x", 1)
                .with_field("y", binary(BinaryOp::Times, select("x"), 3))
                .into(),
        )
        .unwrap();
    let handle = ScopeAgent::spawn(scope, &EngineConfig::default());

    assert_eq!(handle.get("y").await.unwrap(), Value::from(3));
    handle.put("x", 7).await.unwrap();
    assert_eq!(handle.get("y").await.unwrap(), Value::from(21));

    handle.shutdown().await.unwrap();
    assert!(handle.get("y").await.is_err());
}
