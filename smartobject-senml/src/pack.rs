//! SenML Pack - ordered collection of SenML records

use crate::{Result, SenMLError, SenMLRecord};
use serde::{Deserialize, Serialize};

/// A SenML Pack is the JSON array that wraps one or more records
///
/// The smart object always emits single-record packs, one per resource
/// representation.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SenMLPack {
    /// Array of SenML records
    pub records: Vec<SenMLRecord>,
}

impl SenMLPack {
    /// Create a new empty pack
    pub fn new() -> Self {
        Self {
            records: Vec::new(),
        }
    }

    /// Create a pack holding exactly one record
    pub fn single(record: SenMLRecord) -> Self {
        Self {
            records: vec![record],
        }
    }

    /// Get the number of records in this pack
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if this pack is empty
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Validate this pack according to RFC 8428
    pub fn validate(&self) -> Result<()> {
        if self.records.is_empty() {
            return Err(SenMLError::validation("SenML pack cannot be empty"));
        }

        for (i, record) in self.records.iter().enumerate() {
            record.validate().map_err(|e| {
                SenMLError::validation(format!("Invalid record at index {}: {}", i, e))
            })?;
        }

        Ok(())
    }
}

impl FromIterator<SenMLRecord> for SenMLPack {
    fn from_iter<I: IntoIterator<Item = SenMLRecord>>(iter: I) -> Self {
        Self {
            records: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for SenMLPack {
    type Item = SenMLRecord;
    type IntoIter = std::vec::IntoIter<SenMLRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.into_iter()
    }
}
