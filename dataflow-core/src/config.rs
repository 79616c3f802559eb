//! Engine configuration.
//!
//! Loaded from JSON. Every field has a default, so `{}` is a valid config.
//!
//! ```json
//! {
//!     "mailbox_capacity": 64,
//!     "math_functions": true,
//!     "max_pull_depth": 256
//! }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Bound on a scope agent's command channel.
    pub mailbox_capacity: usize,

    /// Whether compiled scopes see the shared math function table.
    pub math_functions: bool,

    /// How deep a reconcile may recurse pulling field updaters through one
    /// another before giving up on a field (it evaluates to `Absent`).
    pub max_pull_depth: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: 64,
            math_functions: true,
            max_pull_depth: 256,
        }
    }
}

impl EngineConfig {
    /// Parse a config from a JSON string.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read and parse a JSON config file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| Error::ConfigIo {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&json)
    }
}
