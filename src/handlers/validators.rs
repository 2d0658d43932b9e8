//! Input validation for key and value query parameters.
//!
//! Lengths are counted in characters and the limits are exclusive: a key
//! of exactly `max_key_length` characters is rejected.

use std::collections::HashMap;

use crate::config::StoreConfig;
use crate::errors::KvError;

/// Query parameter holding the record key.
pub const KEY_PARAM: &str = "k";
/// Query parameter holding the record value.
pub const VALUE_PARAM: &str = "v";

/// Validate and return the `k` parameter.
pub fn validate_key<'a>(
    params: &'a HashMap<String, String>,
    limits: &StoreConfig,
) -> Result<&'a str, KvError> {
    let key = params
        .get(KEY_PARAM)
        .ok_or(KvError::MissingKeyParam)?;

    if key.is_empty() {
        return Err(KvError::EmptyKey);
    }
    if key.chars().count() >= limits.max_key_length {
        return Err(KvError::MaximumKeyLengthReached);
    }
    Ok(key)
}

/// Validate and return the `v` parameter.  An empty value is allowed.
pub fn validate_value<'a>(
    params: &'a HashMap<String, String>,
    limits: &StoreConfig,
) -> Result<&'a str, KvError> {
    let value = params
        .get(VALUE_PARAM)
        .ok_or(KvError::MissingValueParam)?;

    if value.chars().count() >= limits.max_value_length {
        return Err(KvError::MaximumValueLengthReached);
    }
    Ok(value)
}
