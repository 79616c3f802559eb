//! Function bindings for `Invoke`.
//!
//! A [`FunctionTable`] maps names to native functions. Scopes receive the
//! table when they are built and only ever read it. The shared math table is
//! built once, on first use.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use crate::value::{Num, Value};

/// A native function. Arguments arrive evaluated; wrong arity or argument
/// types should produce `Value::Absent`.
pub type Function = Arc<dyn Fn(&[Value]) -> Value + Send + Sync>;

/// Read-only lookup of functions by name.
#[derive(Clone, Default)]
pub struct FunctionTable {
    functions: HashMap<String, Function>,
}

impl FunctionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// The shared math table: `abs`, `floor`, `ceil`, `round`, `sqrt`,
    /// `pow`, `exp`, `ln`, `sin`, `cos`, `tan`, `min`, `max`.
    pub fn math() -> &'static FunctionTable {
        static MATH: OnceLock<FunctionTable> = OnceLock::new();
        MATH.get_or_init(build_math)
    }

    /// Builder-style registration.
    pub fn with<F>(mut self, name: impl Into<String>, function: F) -> Self
    where
        F: Fn(&[Value]) -> Value + Send + Sync + 'static,
    {
        self.insert(name, function);
        self
    }

    /// Register `function` under `name`, replacing any previous binding.
    pub fn insert<F>(&mut self, name: impl Into<String>, function: F)
    where
        F: Fn(&[Value]) -> Value + Send + Sync + 'static,
    {
        self.functions.insert(name.into(), Arc::new(function));
    }

    /// Copy every binding of `other` into this table. Existing names win.
    pub fn extend_from(&mut self, other: &FunctionTable) {
        for (name, function) in &other.functions {
            self.functions
                .entry(name.clone())
                .or_insert_with(|| function.clone());
        }
    }

    pub fn get(&self, name: &str) -> Option<&Function> {
        self.functions.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

impl fmt::Debug for FunctionTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.functions.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("FunctionTable").field("functions", &names).finish()
    }
}

fn build_math() -> FunctionTable {
    FunctionTable::new()
        .with("abs", |args| {
            unary_num(args, |n| match n {
                Num::Int(i) => i.checked_abs().map(Num::Int).unwrap_or(Num::Float((i as f64).abs())),
                Num::Float(f) => Num::Float(f.abs()),
            })
        })
        .with("floor", |args| integral(args, f64::floor))
        .with("ceil", |args| integral(args, f64::ceil))
        .with("round", |args| integral(args, f64::round))
        .with("sqrt", |args| unary_float(args, f64::sqrt))
        .with("exp", |args| unary_float(args, f64::exp))
        .with("ln", |args| unary_float(args, f64::ln))
        .with("sin", |args| unary_float(args, f64::sin))
        .with("cos", |args| unary_float(args, f64::cos))
        .with("tan", |args| unary_float(args, f64::tan))
        .with("pow", |args| match args {
            [Value::Num(Num::Int(base)), Value::Num(Num::Int(exp))] if *exp >= 0 => u32::try_from(*exp)
                .ok()
                .and_then(|exp| base.checked_pow(exp))
                .map(Value::from)
                .unwrap_or_else(|| Value::from((*base as f64).powf(*exp as f64))),
            [Value::Num(base), Value::Num(exp)] => Value::from(base.as_f64().powf(exp.as_f64())),
            _ => Value::Absent,
        })
        .with("min", |args| extreme(args, std::cmp::Ordering::Less))
        .with("max", |args| extreme(args, std::cmp::Ordering::Greater))
}

fn unary_num(args: &[Value], f: impl FnOnce(Num) -> Num) -> Value {
    match args {
        [Value::Num(n)] => Value::Num(f(*n)),
        _ => Value::Absent,
    }
}

fn unary_float(args: &[Value], f: impl FnOnce(f64) -> f64) -> Value {
    match args {
        [Value::Num(n)] => Value::from(f(n.as_f64())),
        _ => Value::Absent,
    }
}

// Integers are already integral.
fn integral(args: &[Value], f: impl FnOnce(f64) -> f64) -> Value {
    match args {
        [Value::Num(Num::Int(i))] => Value::from(*i),
        [Value::Num(Num::Float(x))] => Value::from(f(*x)),
        _ => Value::Absent,
    }
}

fn extreme(args: &[Value], keep: std::cmp::Ordering) -> Value {
    let mut best: Option<Num> = None;
    for arg in args {
        let Value::Num(n) = arg else {
            return Value::Absent;
        };
        best = match best {
            Some(current) if n.numeric_cmp(current) != keep => Some(current),
            _ => Some(*n),
        };
    }
    best.map(Value::Num).unwrap_or_default()
}
