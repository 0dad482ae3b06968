//! Single-record SenML JSON codec
//!
//! Every resource representation is one measurement wrapped in a one-element
//! pack. [`encode`] builds and serializes that pack; [`decode`] is its inverse
//! and is used by clients and tests.

use crate::{Result, SenMLError, SenMLPack, SenMLRecord, SenMLValue};

/// Encode one measurement as a SenML JSON pack
///
/// Numbers are written to `v`, booleans to `vb` and strings to `vs`. The unit
/// is left out entirely when `unit` is `None`. `timestamp_ms` is converted to
/// seconds since the epoch for the `t` field.
///
/// # Example
///
/// ```rust
/// use smartobject_senml::codec::encode;
///
/// let json = encode("dev:humidity", 0.1, Some("%RH"), 42i64, 1_690_000_000_000).unwrap();
/// assert_eq!(
///     json,
///     r#"[{"bn":"dev:humidity","bver":0.1,"u":"%RH","v":42,"t":1690000000}]"#
/// );
/// ```
pub fn encode<V: Into<SenMLValue>>(
    base_name: &str,
    version: f64,
    unit: Option<&str>,
    value: V,
    timestamp_ms: i64,
) -> Result<String> {
    let mut record = SenMLRecord::with_base_name(base_name)
        .with_version(version)
        .with_value(value)
        .with_time(timestamp_ms as f64 / 1000.0);

    if let Some(unit) = unit {
        record = record.with_unit(unit);
    }

    let pack = SenMLPack::single(record);
    pack.validate()?;
    pack.to_json()
}

/// Decode a single-record SenML JSON pack
pub fn decode(json: &str) -> Result<SenMLRecord> {
    let pack = SenMLPack::from_json(json)?;
    if pack.len() != 1 {
        return Err(SenMLError::validation(format!(
            "expected exactly one record, found {}",
            pack.len()
        )));
    }
    pack.validate()?;

    pack.into_iter()
        .next()
        .ok_or_else(|| SenMLError::validation("SenML pack cannot be empty"))
}
