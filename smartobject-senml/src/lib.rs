//! # Smart Object SenML
//!
//! A small implementation of [RFC 8428](https://tools.ietf.org/html/rfc8428) -
//! Sensor Measurement Lists (SenML) - scoped to what a CoAP smart object needs
//! to describe its resources: one record per representation carrying a base
//! name, a version, an optional unit, a single value and a timestamp.
//!
//! ## Quick Start
//!
//! ```rust
//! use smartobject_senml::{codec, Result};
//!
//! fn example() -> Result<()> {
//!     let json = codec::encode("urn:dev:1234:temperature", 0.1, Some("Cel"), 21i64, 1_690_000_000_000)?;
//!     let record = codec::decode(&json)?;
//!     assert_eq!(record.v, Some(21.0));
//!     Ok(())
//! }
//! # example().unwrap();
//! ```

pub mod error;
pub mod pack;
pub mod record;

#[cfg(feature = "json")]
pub mod codec;

#[cfg(feature = "json")]
pub mod json;

pub use error::{Result, SenMLError};
pub use pack::SenMLPack;
pub use record::{SenMLRecord, SenMLValue};

/// Current wall-clock time in milliseconds since the Unix epoch
pub fn now_millis() -> i64 {
    (time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}
