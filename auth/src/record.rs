//! Typed JSON boundary for everything persisted in the key-value store.
//!
//! Session, code and attempt records are stored as JSON strings. All reads
//! and writes go through [`encode`] and [`decode`] so a malformed record
//! always surfaces as [`AuthError::CorruptRecord`] naming the offending key.

use crate::error::{AuthError, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Serialize a record for storage under `key`.
///
/// # Errors
///
/// Returns [`AuthError::Internal`] if the value cannot be serialized.
pub fn encode<T: Serialize>(key: &str, value: &T) -> Result<String> {
    serde_json::to_string(value)
        .map_err(|e| AuthError::Internal(format!("Failed to encode record '{key}': {e}")))
}

/// Deserialize a record read from `key`.
///
/// # Errors
///
/// Returns [`AuthError::CorruptRecord`] if the stored JSON does not match `T`.
pub fn decode<T: DeserializeOwned>(key: &str, raw: &str) -> Result<T> {
    serde_json::from_str(raw).map_err(|e| {
        tracing::error!(key = %key, error = %e, "Stored record failed to decode");
        AuthError::CorruptRecord {
            key: key.to_string(),
            reason: e.to_string(),
        }
    })
}

/// Deserialize an optional record, passing absence through.
///
/// # Errors
///
/// Returns [`AuthError::CorruptRecord`] if the stored JSON does not match `T`.
pub fn decode_opt<T: DeserializeOwned>(key: &str, raw: Option<String>) -> Result<Option<T>> {
    raw.map(|raw| decode(key, &raw)).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        value: u32,
    }

    #[test]
    fn test_decode_reports_key_on_corruption() {
        let err = decode::<Sample>("code:sign-up:a@b.c", "{not json").unwrap_err();
        match err {
            AuthError::CorruptRecord { key, .. } => assert_eq!(key, "code:sign-up:a@b.c"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_decode_opt_passes_absence_through() {
        assert_eq!(decode_opt::<Sample>("k", None).unwrap(), None);
        let raw = encode("k", &Sample { value: 7 }).unwrap();
        assert_eq!(
            decode_opt::<Sample>("k", Some(raw)).unwrap(),
            Some(Sample { value: 7 })
        );
    }
}
