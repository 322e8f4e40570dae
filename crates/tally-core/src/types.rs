//! Validation errors and field limits shared by records and settings.

use thiserror::Error;

/// Maximum length of a record or setting key, in characters.
pub const MAX_KEY_LEN: usize = 256;

/// Maximum length of a record description, in characters. Longer input is truncated.
pub const MAX_DESCRIPTION_LEN: usize = 256;

/// Maximum length of a setting value once serialized to JSON.
pub const MAX_SETTING_VALUE_LEN: usize = 256;

/// Latest accepted timestamp (9999-12-31T23:59:59Z).
pub const MAX_TIMESTAMP: i64 = 253_402_300_799;

/// Reasons a candidate record or setting is rejected.
///
/// A rejection drops the whole item; nothing is partially applied.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// The candidate was not a JSON object.
    #[error("item must be an object")]
    NotAnObject,

    /// A required field was absent or null.
    #[error("missing required field {field}")]
    Missing { field: &'static str },

    /// A field could not be coerced to the expected type.
    #[error("{field} must be {expected}, got {value}")]
    InvalidType {
        field: &'static str,
        expected: &'static str,
        value: String,
    },

    /// The provided value was empty.
    #[error("{field} cannot be empty")]
    Empty { field: &'static str },

    /// A field exceeded its length limit.
    #[error("{field} is {len} characters long, limit is {max}")]
    TooLong {
        field: &'static str,
        len: usize,
        max: usize,
    },

    /// A timestamp fell outside the supported range.
    #[error("{field} out of range: {value}")]
    OutOfRange { field: &'static str, value: i64 },
}
