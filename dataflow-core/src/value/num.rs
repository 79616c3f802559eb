//! Numeric values.
//!
//! `Num` keeps integers and floats apart so that integer arithmetic stays
//! exact. Ordering and hashing are total (floats compare with `total_cmp`),
//! which lets numbers appear as record keys and reduction-tree keys.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// A number in the structured value model.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    /// Widen to `f64`.
    pub fn as_f64(self) -> f64 {
        match self {
            Num::Int(i) => i as f64,
            Num::Float(f) => f,
        }
    }

    /// The exact integer value, if there is one.
    pub fn as_i64(self) -> Option<i64> {
        match self {
            Num::Int(i) => Some(i),
            Num::Float(f) if f.is_finite() && f.fract() == 0.0 => {
                if f >= i64::MIN as f64 && f <= i64::MAX as f64 {
                    Some(f as i64)
                } else {
                    None
                }
            }
            Num::Float(_) => None,
        }
    }

    pub fn is_zero(self) -> bool {
        match self {
            Num::Int(i) => i == 0,
            Num::Float(f) => f == 0.0,
        }
    }

    /// Numeric comparison across representations (`1 == 1.0`).
    pub fn numeric_cmp(self, other: Num) -> Ordering {
        match (self, other) {
            (Num::Int(a), Num::Int(b)) => a.cmp(&b),
            (a, b) => {
                let (x, y) = (a.as_f64(), b.as_f64());
                x.partial_cmp(&y).unwrap_or_else(|| x.total_cmp(&y))
            }
        }
    }

    pub fn add(self, rhs: Num) -> Num {
        match (self, rhs) {
            (Num::Int(a), Num::Int(b)) => a
                .checked_add(b)
                .map(Num::Int)
                .unwrap_or(Num::Float(a as f64 + b as f64)),
            (a, b) => Num::Float(a.as_f64() + b.as_f64()),
        }
    }

    pub fn sub(self, rhs: Num) -> Num {
        match (self, rhs) {
            (Num::Int(a), Num::Int(b)) => a
                .checked_sub(b)
                .map(Num::Int)
                .unwrap_or(Num::Float(a as f64 - b as f64)),
            (a, b) => Num::Float(a.as_f64() - b.as_f64()),
        }
    }

    pub fn mul(self, rhs: Num) -> Num {
        match (self, rhs) {
            (Num::Int(a), Num::Int(b)) => a
                .checked_mul(b)
                .map(Num::Int)
                .unwrap_or(Num::Float(a as f64 * b as f64)),
            (a, b) => Num::Float(a.as_f64() * b.as_f64()),
        }
    }

    /// Division. Returns `None` for a zero divisor; inexact integer
    /// division promotes to float.
    pub fn div(self, rhs: Num) -> Option<Num> {
        if rhs.is_zero() {
            return None;
        }
        match (self, rhs) {
            (Num::Int(a), Num::Int(b)) => match (a.checked_rem(b), a.checked_div(b)) {
                (Some(0), Some(q)) => Some(Num::Int(q)),
                _ => Some(Num::Float(a as f64 / b as f64)),
            },
            (a, b) => Some(Num::Float(a.as_f64() / b.as_f64())),
        }
    }

    /// Remainder. Returns `None` for a zero divisor.
    pub fn rem(self, rhs: Num) -> Option<Num> {
        if rhs.is_zero() {
            return None;
        }
        match (self, rhs) {
            (Num::Int(a), Num::Int(b)) => Some(a.checked_rem(b).map(Num::Int).unwrap_or(Num::Int(0))),
            (a, b) => Some(Num::Float(a.as_f64() % b.as_f64())),
        }
    }

    pub fn neg(self) -> Num {
        match self {
            Num::Int(i) => i.checked_neg().map(Num::Int).unwrap_or(Num::Float(-(i as f64))),
            Num::Float(f) => Num::Float(-f),
        }
    }
}

impl PartialEq for Num {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Num {}

impl PartialOrd for Num {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Num {
    // Structural: Int(1) and Float(1.0) are distinct keys, ints first on ties.
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Num::Int(a), Num::Int(b)) => a.cmp(b),
            (Num::Float(a), Num::Float(b)) => a.total_cmp(b),
            (Num::Int(a), Num::Float(b)) => (*a as f64).total_cmp(b).then(Ordering::Less),
            (Num::Float(a), Num::Int(b)) => a.total_cmp(&(*b as f64)).then(Ordering::Greater),
        }
    }
}

impl Hash for Num {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Num::Int(i) => {
                state.write_u8(0);
                i.hash(state);
            }
            Num::Float(f) => {
                state.write_u8(1);
                f.to_bits().hash(state);
            }
        }
    }
}

impl fmt::Display for Num {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Num::Int(i) => write!(f, "{i}"),
            Num::Float(x) => write!(f, "{x}"),
        }
    }
}

impl From<i64> for Num {
    fn from(value: i64) -> Self {
        Num::Int(value)
    }
}

impl From<i32> for Num {
    fn from(value: i32) -> Self {
        Num::Int(value as i64)
    }
}

impl From<f64> for Num {
    fn from(value: f64) -> Self {
        Num::Float(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_arithmetic_stays_exact() {
        assert_eq!(Num::Int(2).add(Num::Int(3)), Num::Int(5));
        assert_eq!(Num::Int(6).div(Num::Int(3)), Some(Num::Int(2)));
        assert_eq!(Num::Int(7).div(Num::Int(2)), Some(Num::Float(3.5)));
    }

    #[test]
    fn overflow_promotes_to_float() {
        assert_eq!(Num::Int(i64::MAX).add(Num::Int(1)), Num::Float(i64::MAX as f64 + 1.0));
    }

    #[test]
    fn zero_divisor_has_no_result() {
        assert_eq!(Num::Int(1).div(Num::Int(0)), None);
        assert_eq!(Num::Float(1.0).rem(Num::Float(0.0)), None);
    }

    #[test]
    fn keys_are_structural_but_comparison_is_numeric() {
        assert_ne!(Num::Int(1), Num::Float(1.0));
        assert_eq!(Num::Int(1).numeric_cmp(Num::Float(1.0)), Ordering::Equal);
        assert!(Num::Int(1) < Num::Float(1.5));
    }
}
