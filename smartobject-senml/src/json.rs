//! JSON serialization support for SenML

use crate::{Result, SenMLError, SenMLPack};

impl SenMLPack {
    /// Serialize to compact JSON (no whitespace)
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| SenMLError::serialization(e.to_string()))
    }

    /// Deserialize a pack from a JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| SenMLError::deserialization(e.to_string()))
    }
}
