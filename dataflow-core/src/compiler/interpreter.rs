//! Expression interpreter.
//!
//! [`evaluate`] walks an expression against an [`Environment`], which is how
//! selectors reach scope state. The compiled model supplies an environment
//! that pulls fields through the dependency graph and records every read.
//! [`evaluate_literal`] supplies a plain one that evaluates a record literal
//! from scratch, with no caching between calls.
//!
//! Both agree on every rule: nested records are scopes, expression fields
//! are computed, fields with non-constant keys and bare non-record items are
//! kept as written, and a later field with a duplicate key replaces the
//! earlier one in place. A field read while it is still being evaluated, by
//! itself or around a cycle, reads as `Absent`. Fields are forced in document
//! order, so within a cycle the others see the field reached first as `Absent`.

use indexmap::IndexMap;

use super::functions::FunctionTable;
use super::ItemKey;
use crate::value::{BinaryOp, Expr, Item, Record, Selector, Step, Value};

/// What an expression can see while it is evaluated.
pub trait Environment {
    fn functions(&self) -> &FunctionTable;

    /// `$name`: the local field, else the nearest enclosing scope's.
    fn lookup(&mut self, name: &Value) -> Value;

    /// `$[key]`: a local item by position (numbers) or by key.
    fn child(&mut self, key: &Value) -> Value;

    /// `$`: the whole local scope as a record.
    fn snapshot(&mut self) -> Value;
}

/// Evaluate `value` in `env`. Constants evaluate to themselves.
pub fn evaluate(value: &Value, env: &mut dyn Environment) -> Value {
    match value {
        Value::Expr(expr) => evaluate_expr(expr, env),
        Value::Record(record) if !record.is_constant() => Value::Record(
            record
                .iter()
                .map(|item| match item {
                    Item::Value(value) => Item::Value(evaluate(value, env)),
                    Item::Field { key, value } => Item::Field {
                        key: evaluate(key, env),
                        value: evaluate(value, env),
                    },
                })
                .collect(),
        ),
        constant => constant.clone(),
    }
}

fn evaluate_expr(expr: &Expr, env: &mut dyn Environment) -> Value {
    match expr {
        Expr::Selector(selector) => select(selector, env),
        Expr::Unary { op, operand } => op.apply(&evaluate(operand, env)),
        Expr::Binary { op, lhs, rhs } => {
            let lhs = evaluate(lhs, env);
            match op {
                BinaryOp::And if !lhs.is_truthy() => lhs,
                BinaryOp::Or if lhs.is_truthy() => lhs,
                BinaryOp::And | BinaryOp::Or => evaluate(rhs, env),
                _ => op.apply(&lhs, &evaluate(rhs, env)),
            }
        }
        Expr::Conditional {
            test,
            then,
            otherwise,
        } => {
            if evaluate(test, env).is_truthy() {
                evaluate(then, env)
            } else {
                evaluate(otherwise, env)
            }
        }
        Expr::Invoke { function, args } => {
            let Some(function) = function_name(function).and_then(|name| env.functions().get(name).cloned())
            else {
                return Value::Absent;
            };
            let args: Vec<Value> = args.iter().map(|arg| evaluate(arg, env)).collect();
            function(&args)
        }
    }
}

fn select(selector: &Selector, env: &mut dyn Environment) -> Value {
    let Some((first, rest)) = selector.steps().split_first() else {
        return env.snapshot();
    };
    let mut current = match first {
        Step::Field(name) => {
            let name = evaluate(name, env);
            env.lookup(&name)
        }
        Step::Child(key) => {
            let key = evaluate(key, env);
            env.child(&key)
        }
        Step::Children | Step::Descendants => first.select(&env.snapshot()),
    };
    for step in rest {
        current = step.select(&current);
    }
    current
}

/// `"sqrt"` and `$sqrt` both name the function `sqrt`.
fn function_name(function: &Value) -> Option<&str> {
    match function {
        Value::Text(name) => Some(name),
        Value::Expr(expr) => match expr.as_ref() {
            Expr::Selector(selector) => selector.as_name().and_then(Value::as_text),
            _ => None,
        },
        _ => None,
    }
}

// ----------------------------------------------------------------------------
// Plain evaluation
// ----------------------------------------------------------------------------

/// Evaluate a record literal from scratch and return the resulting record.
///
/// Produces exactly what a compiled scope built from `literal` holds after
/// its first reconcile. Non-record input is evaluated as a lone expression.
pub fn evaluate_literal(literal: &Value, functions: &FunctionTable) -> Value {
    let mut interpreter = Interpreter {
        functions,
        frames: Vec::new(),
    };
    match literal {
        Value::Record(record) => {
            let root = interpreter.materialize(record, None);
            Value::Record(interpreter.snapshot(root))
        }
        other => {
            let root = interpreter.materialize(&Record::new(), None);
            evaluate(other, &mut FrameEnv { interpreter: &mut interpreter, frame: root })
        }
    }
}

enum Entry {
    Pending(Value),
    Evaluating,
    Done(Value),
    Scope(usize),
    /// A field with a non-constant key.
    Opaque(Item),
}

struct Frame {
    parent: Option<usize>,
    entries: IndexMap<ItemKey, Entry>,
}

struct Interpreter<'a> {
    functions: &'a FunctionTable,
    frames: Vec<Frame>,
}

impl Interpreter<'_> {
    fn materialize(&mut self, record: &Record, parent: Option<usize>) -> usize {
        let id = self.frames.len();
        self.frames.push(Frame {
            parent,
            entries: IndexMap::new(),
        });
        let mut position = 0;
        for item in record {
            let (key, entry) = match item {
                Item::Field { key, .. } if !key.is_constant() => {
                    position += 1;
                    (ItemKey::Position(position - 1), Entry::Opaque(item.clone()))
                }
                Item::Field { key, value } => (ItemKey::Field(key.clone()), self.entry(value, id)),
                Item::Value(value @ Value::Record(_)) => {
                    position += 1;
                    (ItemKey::Position(position - 1), self.entry(value, id))
                }
                Item::Value(value) => {
                    position += 1;
                    (ItemKey::Position(position - 1), Entry::Done(value.clone()))
                }
            };
            self.frames[id].entries.insert(key, entry);
        }
        id
    }

    fn entry(&mut self, value: &Value, frame: usize) -> Entry {
        match value {
            Value::Record(record) => Entry::Scope(self.materialize(record, Some(frame))),
            Value::Expr(_) => Entry::Pending(value.clone()),
            other => Entry::Done(other.clone()),
        }
    }

    fn force(&mut self, frame: usize, key: &ItemKey) -> Value {
        let Some(entry) = self.frames[frame].entries.get_mut(key) else {
            return Value::Absent;
        };
        match entry {
            Entry::Done(value) => value.clone(),
            Entry::Opaque(item) => item.value().clone(),
            Entry::Evaluating => Value::Absent,
            Entry::Scope(child) => {
                let child = *child;
                Value::Record(self.snapshot(child))
            }
            Entry::Pending(_) => {
                let Entry::Pending(expr) = std::mem::replace(entry, Entry::Evaluating) else {
                    return Value::Absent;
                };
                let value = evaluate(&expr, &mut FrameEnv { interpreter: self, frame });
                if let Some(entry) = self.frames[frame].entries.get_mut(key) {
                    *entry = Entry::Done(value.clone());
                }
                value
            }
        }
    }

    fn snapshot(&mut self, frame: usize) -> Record {
        let keys: Vec<ItemKey> = self.frames[frame].entries.keys().cloned().collect();
        keys.into_iter()
            .map(|key| {
                let value = self.force(frame, &key);
                match key {
                    ItemKey::Field(key) => Item::Field { key, value },
                    _ => match self.frames[frame].entries.get(&key) {
                        Some(Entry::Opaque(item)) => item.clone(),
                        _ => Item::Value(value),
                    },
                }
            })
            .collect()
    }
}

struct FrameEnv<'a, 'b> {
    interpreter: &'a mut Interpreter<'b>,
    frame: usize,
}

impl Environment for FrameEnv<'_, '_> {
    fn functions(&self) -> &FunctionTable {
        self.interpreter.functions
    }

    fn lookup(&mut self, name: &Value) -> Value {
        let key = ItemKey::Field(name.clone());
        let mut frame = Some(self.frame);
        while let Some(id) = frame {
            if self.interpreter.frames[id].entries.contains_key(&key) {
                return self.interpreter.force(id, &key);
            }
            frame = self.interpreter.frames[id].parent;
        }
        Value::Absent
    }

    fn child(&mut self, key: &Value) -> Value {
        let key = match key.as_i64() {
            Some(index) => match usize::try_from(index)
                .ok()
                .and_then(|index| self.interpreter.frames[self.frame].entries.get_index(index))
            {
                Some((key, _)) => key.clone(),
                None => return Value::Absent,
            },
            None => ItemKey::Field(key.clone()),
        };
        self.interpreter.force(self.frame, &key)
    }

    fn snapshot(&mut self) -> Value {
        Value::Record(self.interpreter.snapshot(self.frame))
    }
}
