//! Operator semantics.
//!
//! Every operator is total: operands of the wrong type produce
//! [`Value::Absent`] instead of an error, so one bad field cannot stall the
//! rest of a scope.

use std::cmp::Ordering;

use super::{BinaryOp, Num, UnaryOp, Value};

impl UnaryOp {
    pub fn apply(self, operand: &Value) -> Value {
        match (self, operand) {
            (UnaryOp::Negative, Value::Num(n)) => Value::Num(n.neg()),
            (UnaryOp::Positive, Value::Num(n)) => Value::Num(*n),
            (UnaryOp::Not, Value::Bool(b)) => Value::Bool(!b),
            (UnaryOp::Not, Value::Absent) => Value::Bool(true),
            (UnaryOp::BitNot, Value::Num(Num::Int(i))) => Value::from(!i),
            _ => Value::Absent,
        }
    }
}

impl BinaryOp {
    /// Apply the operator to two evaluated operands.
    ///
    /// `&&` and `||` are handled here for completeness, but the interpreter
    /// short-circuits them before both operands are evaluated.
    pub fn apply(self, lhs: &Value, rhs: &Value) -> Value {
        match self {
            BinaryOp::Or => {
                if lhs.is_truthy() {
                    lhs.clone()
                } else {
                    rhs.clone()
                }
            }
            BinaryOp::And => {
                if lhs.is_truthy() {
                    rhs.clone()
                } else {
                    lhs.clone()
                }
            }
            BinaryOp::BitOr => bitwise(lhs, rhs, |a, b| a | b, |a, b| a | b),
            BinaryOp::BitXor => bitwise(lhs, rhs, |a, b| a ^ b, |a, b| a ^ b),
            BinaryOp::BitAnd => bitwise(lhs, rhs, |a, b| a & b, |a, b| a & b),
            BinaryOp::Lt => compare(lhs, rhs, |o| o == Ordering::Less),
            BinaryOp::Le => compare(lhs, rhs, |o| o != Ordering::Greater),
            BinaryOp::Ge => compare(lhs, rhs, |o| o != Ordering::Less),
            BinaryOp::Gt => compare(lhs, rhs, |o| o == Ordering::Greater),
            BinaryOp::Eq => Value::Bool(equivalent(lhs, rhs)),
            BinaryOp::Ne => Value::Bool(!equivalent(lhs, rhs)),
            BinaryOp::Plus => match (lhs, rhs) {
                (Value::Num(a), Value::Num(b)) => Value::Num(a.add(*b)),
                (Value::Text(a), Value::Text(b)) => Value::Text(format!("{a}{b}")),
                _ => Value::Absent,
            },
            BinaryOp::Minus => arithmetic(lhs, rhs, |a, b| Some(a.sub(b))),
            BinaryOp::Times => arithmetic(lhs, rhs, |a, b| Some(a.mul(b))),
            BinaryOp::Divide => arithmetic(lhs, rhs, Num::div),
            BinaryOp::Modulo => arithmetic(lhs, rhs, Num::rem),
        }
    }
}

/// Equality as seen by `==`: numbers compare numerically, everything else
/// structurally.
pub(crate) fn equivalent(lhs: &Value, rhs: &Value) -> bool {
    match (lhs, rhs) {
        (Value::Num(a), Value::Num(b)) => a.numeric_cmp(*b) == Ordering::Equal,
        _ => lhs == rhs,
    }
}

fn arithmetic(lhs: &Value, rhs: &Value, op: impl FnOnce(Num, Num) -> Option<Num>) -> Value {
    match (lhs, rhs) {
        (Value::Num(a), Value::Num(b)) => op(*a, *b).map(Value::Num).unwrap_or_default(),
        _ => Value::Absent,
    }
}

fn compare(lhs: &Value, rhs: &Value, test: impl FnOnce(Ordering) -> bool) -> Value {
    let ordering = match (lhs, rhs) {
        (Value::Num(a), Value::Num(b)) => a.numeric_cmp(*b),
        (Value::Text(a), Value::Text(b)) => a.cmp(b),
        (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
        _ => return Value::Absent,
    };
    Value::Bool(test(ordering))
}

fn bitwise(
    lhs: &Value,
    rhs: &Value,
    ints: impl FnOnce(i64, i64) -> i64,
    bools: impl FnOnce(bool, bool) -> bool,
) -> Value {
    match (lhs, rhs) {
        (Value::Num(Num::Int(a)), Value::Num(Num::Int(b))) => Value::from(ints(*a, *b)),
        (Value::Bool(a), Value::Bool(b)) => Value::Bool(bools(*a, *b)),
        _ => Value::Absent,
    }
}
