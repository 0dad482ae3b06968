//! SenML Record types and values

use serde::{Deserialize, Serialize, Serializer};

/// A SenML Record represents a single sensor measurement or actuator state
///
/// Only the fields the smart object emits are modelled: the base name and
/// version identify the producing resource, the remaining fields carry one
/// measurement. Absent fields are omitted from the wire, never written as
/// `null`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SenMLRecord {
    /// Base Name - `<deviceId>:<resourceName>`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bn: Option<String>,

    /// Base Version
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "compact_number"
    )]
    pub bver: Option<f64>,

    /// Unit - SenML units registry symbol
    #[serde(skip_serializing_if = "Option::is_none")]
    pub u: Option<String>,

    /// Value - numeric measurement value
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "compact_number"
    )]
    pub v: Option<f64>,

    /// String Value
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vs: Option<String>,

    /// Boolean Value
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vb: Option<bool>,

    /// Time - seconds since the epoch
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "compact_number"
    )]
    pub t: Option<f64>,
}

/// Union type for the value kinds a record can carry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SenMLValue {
    /// Numeric value, emitted as `v`
    Number(f64),
    /// Boolean value, emitted as `vb`
    Boolean(bool),
    /// String value, emitted as `vs`
    String(String),
}

impl From<f64> for SenMLValue {
    fn from(value: f64) -> Self {
        SenMLValue::Number(value)
    }
}

impl From<i64> for SenMLValue {
    fn from(value: i64) -> Self {
        SenMLValue::Number(value as f64)
    }
}

impl From<bool> for SenMLValue {
    fn from(value: bool) -> Self {
        SenMLValue::Boolean(value)
    }
}

impl From<&str> for SenMLValue {
    fn from(value: &str) -> Self {
        SenMLValue::String(value.to_string())
    }
}

impl From<String> for SenMLValue {
    fn from(value: String) -> Self {
        SenMLValue::String(value)
    }
}

impl SenMLRecord {
    /// Create a new empty record
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a record identified by a base name
    pub fn with_base_name<S: Into<String>>(base_name: S) -> Self {
        Self {
            bn: Some(base_name.into()),
            ..Default::default()
        }
    }

    /// Set the base version
    pub fn with_version(mut self, version: f64) -> Self {
        self.bver = Some(version);
        self
    }

    /// Set the unit for this record
    pub fn with_unit<S: Into<String>>(mut self, unit: S) -> Self {
        self.u = Some(unit.into());
        self
    }

    /// Set the timestamp in seconds since the epoch
    pub fn with_time(mut self, time: f64) -> Self {
        self.t = Some(time);
        self
    }

    /// Replace the value, clearing any other value kind
    pub fn with_value<V: Into<SenMLValue>>(mut self, value: V) -> Self {
        self.v = None;
        self.vb = None;
        self.vs = None;

        match value.into() {
            SenMLValue::Number(v) => self.v = Some(v),
            SenMLValue::Boolean(vb) => self.vb = Some(vb),
            SenMLValue::String(vs) => self.vs = Some(vs),
        }
        self
    }

    /// Number of value-kind fields that are populated
    fn value_kinds(&self) -> usize {
        [self.v.is_some(), self.vb.is_some(), self.vs.is_some()]
            .into_iter()
            .filter(|set| *set)
            .count()
    }

    /// Validate this record according to RFC 8428 rules
    pub fn validate(&self) -> crate::Result<()> {
        match self.value_kinds() {
            0 => {
                return Err(crate::SenMLError::validation(
                    "Record must have a value field (v, vs or vb)",
                ));
            }
            1 => {}
            _ => {
                return Err(crate::SenMLError::validation(
                    "Record must not carry more than one value kind",
                ));
            }
        }

        for (field, number) in [("bver", self.bver), ("v", self.v), ("t", self.t)] {
            if let Some(number) = number {
                if !number.is_finite() {
                    return Err(crate::SenMLError::invalid_field_value(
                        field,
                        number.to_string().as_str(),
                    ));
                }
            }
        }

        Ok(())
    }
}

/// Writes whole numbers as JSON integers so `42.0` goes out as `42`.
fn compact_number<S>(value: &Option<f64>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    const MAX_EXACT: f64 = 9_007_199_254_740_992.0;

    match value {
        Some(v) if v.fract() == 0.0 && v.abs() <= MAX_EXACT => serializer.serialize_i64(*v as i64),
        Some(v) => serializer.serialize_f64(*v),
        None => serializer.serialize_none(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_value_sets_one_kind() {
        let record = SenMLRecord::with_base_name("dev:switch")
            .with_value(3.0)
            .with_value(true);

        assert_eq!(record.v, None);
        assert_eq!(record.vb, Some(true));
        assert_eq!(record.vs, None);
    }

    #[test]
    fn test_record_validation() {
        let valid = SenMLRecord::with_base_name("dev:humidity").with_value(40i64);
        assert!(valid.validate().is_ok());

        assert!(SenMLRecord::new().validate().is_err());

        let two_kinds = SenMLRecord {
            v: Some(1.0),
            vb: Some(true),
            ..Default::default()
        };
        assert!(two_kinds.validate().is_err());

        let not_finite = SenMLRecord::new().with_value(f64::NAN);
        assert!(matches!(
            not_finite.validate(),
            Err(crate::SenMLError::InvalidFieldValue { .. })
        ));
    }

    #[test]
    fn test_whole_numbers_serialize_as_integers() {
        let record = SenMLRecord::with_base_name("dev:temperature")
            .with_version(0.1)
            .with_value(42i64)
            .with_time(1_690_000_000.0);

        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(
            json,
            r#"{"bn":"dev:temperature","bver":0.1,"v":42,"t":1690000000}"#
        );
    }
}
