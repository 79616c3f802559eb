//! Value serialization.
//!
//! The engine does not own a wire format; these helpers exist so reconciled
//! snapshots can be handed to the rest of the runtime (and checked in tests)
//! through the value model's own serde representation.

use crate::error::Result;

use super::Value;

impl Value {
    /// Encode as MessagePack.
    pub fn to_msgpack(&self) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec(self)?)
    }

    /// Decode from MessagePack produced by [`Value::to_msgpack`].
    pub fn from_msgpack(bytes: &[u8]) -> Result<Self> {
        Ok(rmp_serde::from_slice(bytes)?)
    }

    /// Encode as JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode from JSON produced by [`Value::to_json`].
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
