//! Error types.
//!
//! Graph operations themselves never fail: unresolved names and operator type
//! errors fold into [`Value::Absent`](crate::value::Value::Absent). The errors
//! here cover the edges of the crate: configuration, value encoding, and the
//! scope agent's mailbox.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// A config file could not be read.
    #[error("failed to read config file {path}: {source}")]
    ConfigIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON input (config or value) was malformed.
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to encode value: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("failed to decode value: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    /// The compiler was handed something other than a record literal.
    #[error("expected a record literal, found {found}")]
    NotARecord { found: &'static str },

    /// The scope agent's task has stopped.
    #[error("scope agent has shut down")]
    AgentClosed,
}

pub type Result<T> = std::result::Result<T, Error>;
