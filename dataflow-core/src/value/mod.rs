//! Structured Values
//!
//! This module defines the value tree that the dataflow engine computes over.
//! The same tree is also the syntax of expressions: selectors, operators,
//! conditionals and invocations are [`Expr`] nodes embedded in it through
//! [`Value::Expr`].
//!
//! # Shape
//!
//! - Scalars: `Absent`, `Extant`, `Bool`, `Num`, `Text`, `Data`
//! - Composites: `Record`, an ordered sequence of [`Item`]s where each item is
//!   either a bare value or a `key: value` field
//! - Expressions: `Expr`, a closed set of operator nodes
//!
//! A value is *constant* when it contains no expression nodes anywhere.
//! Constant values pass through the compiler untouched; everything else gets
//! wired into the reactive graph.
//!
//! # Immutability
//!
//! Values are plain owned data. Once a value leaves the scope that computed it
//! (through `get` or a snapshot) it is a copy, so mutation can only happen
//! inside the owning scope.

mod codec;
mod expr;
mod num;
mod ops;

pub use expr::{binary, child, children, conditional, descendants, identity, invoke, select, select_path, unary};
pub use expr::{BinaryOp, Expr, Selector, Step, UnaryOp};
pub use num::Num;

use serde::{Deserialize, Serialize};

/// A node in the structured value tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Value {
    /// No value. Also the result of unresolvable lookups and type errors.
    #[default]
    Absent,
    /// Present, but carrying no value.
    Extant,
    Bool(bool),
    Num(Num),
    Text(String),
    Data(Vec<u8>),
    Record(Record),
    Expr(Box<Expr>),
}

impl Value {
    pub fn text(text: impl Into<String>) -> Self {
        Value::Text(text.into())
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Value::Absent)
    }

    /// Anything other than `Absent`.
    pub fn is_defined(&self) -> bool {
        !self.is_absent()
    }

    /// True when the value contains no expression nodes.
    pub fn is_constant(&self) -> bool {
        match self {
            Value::Expr(_) => false,
            Value::Record(record) => record.is_constant(),
            _ => true,
        }
    }

    /// Truthiness used by conditionals and logical operators.
    ///
    /// `Absent`, `Extant` and `false` are falsy; every other value is truthy.
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Absent | Value::Extant | Value::Bool(false))
    }

    pub fn as_num(&self) -> Option<Num> {
        match self {
            Value::Num(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        self.as_num().and_then(Num::as_i64)
    }

    pub fn as_f64(&self) -> Option<f64> {
        self.as_num().map(Num::as_f64)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<&Record> {
        match self {
            Value::Record(record) => Some(record),
            _ => None,
        }
    }

    pub fn as_expr(&self) -> Option<&Expr> {
        match self {
            Value::Expr(expr) => Some(expr),
            _ => None,
        }
    }

    /// Short name of the variant, for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Absent => "absent",
            Value::Extant => "extant",
            Value::Bool(_) => "bool",
            Value::Num(_) => "num",
            Value::Text(_) => "text",
            Value::Data(_) => "data",
            Value::Record(_) => "record",
            Value::Expr(_) => "expr",
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Num(Num::Int(value))
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Num(Num::Int(value as i64))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Num(Num::Float(value))
    }
}

impl From<Num> for Value {
    fn from(value: Num) -> Self {
        Value::Num(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Value::Data(value)
    }
}

impl From<Record> for Value {
    fn from(value: Record) -> Self {
        Value::Record(value)
    }
}

impl From<Expr> for Value {
    fn from(value: Expr) -> Self {
        Value::Expr(Box::new(value))
    }
}

/// One entry of a [`Record`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Item {
    /// A bare positional value.
    Value(Value),
    /// A `key: value` field.
    Field { key: Value, value: Value },
}

impl Item {
    pub fn field(key: impl Into<Value>, value: impl Into<Value>) -> Self {
        Item::Field {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn key(&self) -> Option<&Value> {
        match self {
            Item::Value(_) => None,
            Item::Field { key, .. } => Some(key),
        }
    }

    pub fn value(&self) -> &Value {
        match self {
            Item::Value(value) => value,
            Item::Field { value, .. } => value,
        }
    }

    pub fn into_value(self) -> Value {
        match self {
            Item::Value(value) => value,
            Item::Field { value, .. } => value,
        }
    }

    pub fn is_constant(&self) -> bool {
        match self {
            Item::Value(value) => value.is_constant(),
            Item::Field { key, value } => key.is_constant() && value.is_constant(),
        }
    }
}

/// An ordered sequence of items.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Record {
    items: Vec<Item>,
}

impl Record {
    pub fn new() -> Self {
        Self { items: Vec::new() }
    }

    pub fn from_items(items: Vec<Item>) -> Self {
        Self { items }
    }

    /// Builder-style field append.
    pub fn with_field(mut self, key: impl Into<Value>, value: impl Into<Value>) -> Self {
        self.items.push(Item::field(key, value));
        self
    }

    /// Builder-style bare value append.
    pub fn with_value(mut self, value: impl Into<Value>) -> Self {
        self.items.push(Item::Value(value.into()));
        self
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> &[Item] {
        &self.items
    }

    pub fn into_items(self) -> Vec<Item> {
        self.items
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Item> {
        self.items.iter()
    }

    /// Item values in order, keys dropped.
    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.items.iter().map(Item::value)
    }

    pub fn item(&self, index: usize) -> Option<&Item> {
        self.items.get(index)
    }

    /// The value of the first field with the given key.
    pub fn get(&self, key: &Value) -> Option<&Value> {
        self.items.iter().find_map(|item| match item {
            Item::Field { key: k, value } if k == key => Some(value),
            _ => None,
        })
    }

    pub fn contains_key(&self, key: &Value) -> bool {
        self.get(key).is_some()
    }

    pub fn push(&mut self, item: Item) {
        self.items.push(item);
    }

    /// Replace the first field with `key`, or append a new field.
    pub fn set(&mut self, key: impl Into<Value>, value: impl Into<Value>) {
        let key = key.into();
        let value = value.into();
        for item in &mut self.items {
            if let Item::Field { key: k, value: v } = item {
                if *k == key {
                    *v = value;
                    return;
                }
            }
        }
        self.items.push(Item::Field { key, value });
    }

    /// Remove the first field with `key`, returning its value.
    pub fn remove(&mut self, key: &Value) -> Option<Value> {
        let index = self.items.iter().position(|item| item.key() == Some(key))?;
        Some(self.items.remove(index).into_value())
    }

    pub fn is_constant(&self) -> bool {
        self.items.iter().all(Item::is_constant)
    }
}

impl FromIterator<Item> for Record {
    fn from_iter<I: IntoIterator<Item = Item>>(iter: I) -> Self {
        Self {
            items: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a Record {
    type Item = &'a Item;
    type IntoIter = std::slice::Iter<'a, Item>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}
