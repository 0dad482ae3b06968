//! Error types for SenML operations

use thiserror::Error;

/// Result type alias for SenML operations
pub type Result<T> = std::result::Result<T, SenMLError>;

/// Errors that can occur while building, encoding or decoding SenML
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SenMLError {
    /// A record or pack breaks an RFC 8428 structural rule
    #[error("Validation failed: {message}")]
    ValidationError { message: String },

    /// A field carries a value that cannot be represented on the wire
    #[error("Invalid value for field '{field}': {value}")]
    InvalidFieldValue { field: String, value: String },

    /// The serializer failed to produce a payload
    #[error("Serialization error: {message}")]
    SerializationError { message: String },

    /// The payload could not be parsed back into a pack
    #[error("Deserialization error: {message}")]
    DeserializationError { message: String },
}

impl SenMLError {
    /// Create a validation error
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::ValidationError {
            message: message.into(),
        }
    }

    /// Create an invalid field value error
    pub fn invalid_field_value<S: Into<String>>(field: S, value: S) -> Self {
        Self::InvalidFieldValue {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Create a serialization error
    pub fn serialization<S: Into<String>>(message: S) -> Self {
        Self::SerializationError {
            message: message.into(),
        }
    }

    /// Create a deserialization error
    pub fn deserialization<S: Into<String>>(message: S) -> Self {
        Self::DeserializationError {
            message: message.into(),
        }
    }
}

#[cfg(feature = "json")]
impl From<serde_json::Error> for SenMLError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_data() || err.is_syntax() || err.is_eof() {
            Self::deserialization(err.to_string())
        } else {
            Self::serialization(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SenMLError::validation("pack is empty");
        assert_eq!(err.to_string(), "Validation failed: pack is empty");

        let err = SenMLError::invalid_field_value("v", "NaN");
        assert_eq!(err.to_string(), "Invalid value for field 'v': NaN");
    }

    #[cfg(feature = "json")]
    #[test]
    fn test_json_syntax_error_maps_to_deserialization() {
        let err: SenMLError = serde_json::from_str::<Vec<u8>>("[1,").unwrap_err().into();
        assert!(matches!(err, SenMLError::DeserializationError { .. }));
    }
}
