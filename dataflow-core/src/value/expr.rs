//! Expression nodes.
//!
//! Expressions are ordinary values: a record literal such as
//! `{x: 2, y: $x + 1}` carries the `$x + 1` as a [`Value::Expr`] holding a
//! [`Expr::Binary`]. The set of node kinds is closed; the interpreter and the
//! compiler match on it exhaustively.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::Value;

/// An expression node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Expr {
    /// A path into the enclosing scope, e.g. `$x`, `$a.b`, `$[0]`, `$*`.
    Selector(Selector),
    Unary {
        op: UnaryOp,
        operand: Value,
    },
    Binary {
        op: BinaryOp,
        lhs: Value,
        rhs: Value,
    },
    /// `test ? then : otherwise`
    Conditional {
        test: Value,
        then: Value,
        otherwise: Value,
    },
    /// `function(args...)`; the function is looked up by name.
    Invoke {
        function: Value,
        args: Vec<Value>,
    },
}

/// A selector path. An empty path selects the scope itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Selector {
    steps: Vec<Step>,
}

impl Selector {
    pub fn new(steps: Vec<Step>) -> Self {
        Self { steps }
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// The name looked up by a plain `$name` selector, if that is all it is.
    pub fn as_name(&self) -> Option<&Value> {
        match self.steps.as_slice() {
            [Step::Field(name)] => Some(name),
            _ => None,
        }
    }
}

/// One step of a selector path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Step {
    /// Named lookup. As the first step it falls back to enclosing scopes.
    Field(Value),
    /// Positional (number) or keyed (anything else) child, local only.
    Child(Value),
    /// All item values, one level down.
    Children,
    /// All item values at every depth, pre-order.
    Descendants,
}

impl Step {
    /// Apply this step to a plain value.
    pub fn select(&self, value: &Value) -> Value {
        let Some(record) = value.as_record() else {
            return Value::Absent;
        };
        match self {
            Step::Field(key) => record.get(key).cloned().unwrap_or_default(),
            Step::Child(key) => match key.as_i64() {
                Some(index) if index >= 0 => record
                    .item(index as usize)
                    .map(|item| item.value().clone())
                    .unwrap_or_default(),
                Some(_) => Value::Absent,
                None => record.get(key).cloned().unwrap_or_default(),
            },
            Step::Children => Value::Record(record.values().cloned().map(super::Item::Value).collect()),
            Step::Descendants => {
                let mut out = super::Record::new();
                collect_descendants(record, &mut out);
                Value::Record(out)
            }
        }
    }
}

fn collect_descendants(record: &super::Record, out: &mut super::Record) {
    for value in record.values() {
        out.push(super::Item::Value(value.clone()));
        if let Some(inner) = value.as_record() {
            collect_descendants(inner, out);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum UnaryOp {
    /// `-x`
    Negative,
    /// `+x`
    Positive,
    /// `!x`
    Not,
    /// `~x`
    BitNot,
}

impl UnaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            UnaryOp::Negative => "-",
            UnaryOp::Positive => "+",
            UnaryOp::Not => "!",
            UnaryOp::BitNot => "~",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BinaryOp {
    Or,
    And,
    BitOr,
    BitXor,
    BitAnd,
    Lt,
    Le,
    Eq,
    Ne,
    Ge,
    Gt,
    Plus,
    Minus,
    Times,
    Divide,
    Modulo,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Or => "||",
            BinaryOp::And => "&&",
            BinaryOp::BitOr => "|",
            BinaryOp::BitXor => "^",
            BinaryOp::BitAnd => "&",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Ge => ">=",
            BinaryOp::Gt => ">",
            BinaryOp::Plus => "+",
            BinaryOp::Minus => "-",
            BinaryOp::Times => "*",
            BinaryOp::Divide => "/",
            BinaryOp::Modulo => "%",
        }
    }

    /// `&&` and `||` evaluate their right operand lazily.
    pub fn is_short_circuit(self) -> bool {
        matches!(self, BinaryOp::Or | BinaryOp::And)
    }
}

impl fmt::Display for UnaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

// ----------------------------------------------------------------------------
// Constructors
// ----------------------------------------------------------------------------

/// `$name`
pub fn select(name: impl Into<Value>) -> Value {
    select_path(vec![Step::Field(name.into())])
}

/// An arbitrary selector path, e.g. `$a.b` is
/// `select_path(vec![Step::Field("a".into()), Step::Field("b".into())])`.
pub fn select_path(steps: Vec<Step>) -> Value {
    Expr::Selector(Selector::new(steps)).into()
}

/// `$` (the enclosing scope itself)
pub fn identity() -> Value {
    select_path(Vec::new())
}

/// `$[key]`
pub fn child(key: impl Into<Value>) -> Value {
    select_path(vec![Step::Child(key.into())])
}

/// `$*`
pub fn children() -> Value {
    select_path(vec![Step::Children])
}

/// `$**`
pub fn descendants() -> Value {
    select_path(vec![Step::Descendants])
}

pub fn unary(op: UnaryOp, operand: impl Into<Value>) -> Value {
    Expr::Unary {
        op,
        operand: operand.into(),
    }
    .into()
}

pub fn binary(op: BinaryOp, lhs: impl Into<Value>, rhs: impl Into<Value>) -> Value {
    Expr::Binary {
        op,
        lhs: lhs.into(),
        rhs: rhs.into(),
    }
    .into()
}

pub fn conditional(test: impl Into<Value>, then: impl Into<Value>, otherwise: impl Into<Value>) -> Value {
    Expr::Conditional {
        test: test.into(),
        then: then.into(),
        otherwise: otherwise.into(),
    }
    .into()
}

pub fn invoke(function: impl Into<Value>, args: Vec<Value>) -> Value {
    Expr::Invoke {
        function: function.into(),
        args,
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Record;

    fn sample() -> Value {
        Record::new()
            .with_field("a", 1)
            .with_value(Record::new().with_field("b", 2))
            .with_field("c", "three")
            .into()
    }

    #[test]
    fn field_and_child_steps() {
        let value = sample();
        assert_eq!(Step::Field("a".into()).select(&value), Value::from(1));
        assert_eq!(Step::Child(2.into()).select(&value), Value::text("three"));
        assert_eq!(Step::Child("c".into()).select(&value), Value::text("three"));
        assert_eq!(Step::Child(9.into()).select(&value), Value::Absent);
        assert_eq!(Step::Field("a".into()).select(&Value::from(3)), Value::Absent);
    }

    #[test]
    fn children_and_descendants() {
        let value = sample();
        let children = Step::Children.select(&value);
        assert_eq!(children.as_record().map(Record::len), Some(3));

        let descendants = Step::Descendants.select(&value);
        let flat: Vec<Value> = descendants.as_record().unwrap().values().cloned().collect();
        assert_eq!(flat.len(), 4);
        assert_eq!(flat[2], Value::from(2));
    }

    #[test]
    fn plain_selector_exposes_its_name() {
        let Value::Expr(expr) = select("x") else {
            panic!("selector should be an expression");
        };
        let Expr::Selector(selector) = *expr else {
            panic!("expected a selector");
        };
        assert_eq!(selector.as_name(), Some(&Value::text("x")));
    }
}
