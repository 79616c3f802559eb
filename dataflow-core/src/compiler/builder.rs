//! Model construction.

use std::sync::Arc;

use tracing::debug;

use super::functions::FunctionTable;
use super::model::Model;
use super::scope::Scope;
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::value::Value;

/// Compiles record literals into live scopes.
///
/// All mutation of a literal while it is materialized and compiled happens
/// inside [`ModelBuilder::build`]; callers only ever see the finished scope.
#[derive(Debug, Clone, Default)]
pub struct ModelBuilder {
    config: EngineConfig,
    functions: FunctionTable,
}

impl ModelBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self {
            config,
            functions: FunctionTable::new(),
        }
    }

    /// Make `function` available to `Invoke` as `name`.
    pub fn function<F>(mut self, name: impl Into<String>, function: F) -> Self
    where
        F: Fn(&[Value]) -> Value + Send + Sync + 'static,
    {
        self.functions.insert(name, function);
        self
    }

    /// Add every binding of `table`. Bindings already registered win.
    pub fn functions(mut self, table: &FunctionTable) -> Self {
        self.functions.extend_from(table);
        self
    }

    /// Materialize and compile `literal`, which must be a record.
    ///
    /// Nothing is evaluated until the returned scope is first reconciled.
    pub fn build(&self, literal: Value) -> Result<Scope> {
        let Value::Record(record) = literal else {
            return Err(Error::NotARecord {
                found: literal.kind(),
            });
        };

        let mut functions = self.functions.clone();
        if self.config.math_functions {
            functions.extend_from(FunctionTable::math());
        }
        debug!(functions = functions.len(), items = record.len(), "building model");

        let model = Model::new(Arc::new(functions), self.config.max_pull_depth);
        let root = model.install_root(record);
        Ok(Scope::new(model, root))
    }
}
