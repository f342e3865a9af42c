//! MessagePack codec helpers.
//!
//! Thin wrappers around `rmp-serde` used to persist [`WorldSnapshot`]s and
//! anything else that crosses a process boundary. Structs are encoded with
//! named fields so optional fields can be skipped.
//!
//! [`WorldSnapshot`]: crate::WorldSnapshot

use serde::{Deserialize, Serialize};

use crate::error::EcsError;

/// Encode a value to MessagePack bytes.
///
/// # Errors
///
/// Returns [`EcsError::Encode`] if serialisation fails.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, EcsError> {
    Ok(rmp_serde::to_vec_named(value)?)
}

/// Decode a value from MessagePack bytes.
///
/// # Errors
///
/// Returns [`EcsError::Decode`] if deserialisation fails.
pub fn decode<'a, T: Deserialize<'a>>(bytes: &'a [u8]) -> Result<T, EcsError> {
    Ok(rmp_serde::from_slice(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_invalid_bytes() {
        let result: Result<crate::WorldSnapshot, _> = decode(&[0xFF, 0xFF]);
        assert!(matches!(result, Err(EcsError::Decode(_))));
    }
}
