//! Versioned serialization for values that cross a process boundary
//!
//! Values are wrapped in an [`Envelope`] that records what they are and which schema
//! version wrote them. Decoding checks both before touching the payload, so a cookie
//! minted by an older build, or a payload of the wrong type, is rejected instead of
//! being half-parsed.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;

/// A type with a registered wire identity
pub trait Versioned: Serialize + DeserializeOwned {
    /// Stable name of the payload type
    const KIND: &'static str;
    /// Schema version; bump on any incompatible field change
    const VERSION: u16;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub kind: String,
    pub version: u16,
    pub payload: serde_json::Value,
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("unexpected payload kind: expected {expected}, found {found}")]
    KindMismatch { expected: &'static str, found: String },

    #[error("unsupported {kind} version: expected {expected}, found {found}")]
    VersionMismatch {
        kind: &'static str,
        expected: u16,
        found: u16,
    },

    #[error("payload serialization failed: {0}")]
    Json(#[from] serde_json::Error),
}

/// Wrap a value in its envelope
///
/// # Errors
///
/// Returns an error if the value cannot be represented as JSON
pub fn encode<T: Versioned>(value: &T) -> Result<Envelope, CodecError> {
    Ok(Envelope {
        kind: T::KIND.to_string(),
        version: T::VERSION,
        payload: serde_json::to_value(value)?,
    })
}

/// Unwrap an envelope, checking kind and version first
///
/// # Errors
///
/// Returns an error if the kind or version does not match `T`, or the payload
/// does not deserialize into `T`
pub fn decode<T: Versioned>(envelope: Envelope) -> Result<T, CodecError> {
    if envelope.kind != T::KIND {
        return Err(CodecError::KindMismatch {
            expected: T::KIND,
            found: envelope.kind,
        });
    }
    if envelope.version != T::VERSION {
        return Err(CodecError::VersionMismatch {
            kind: T::KIND,
            expected: T::VERSION,
            found: envelope.version,
        });
    }
    Ok(serde_json::from_value(envelope.payload)?)
}

/// Encode straight to a JSON string
///
/// # Errors
///
/// Returns an error if serialization fails
pub fn to_string<T: Versioned>(value: &T) -> Result<String, CodecError> {
    Ok(serde_json::to_string(&encode(value)?)?)
}

/// Decode from a JSON string produced by [`to_string`]
///
/// # Errors
///
/// Returns an error if the string is not an envelope or the envelope does not hold a `T`
pub fn from_str<T: Versioned>(raw: &str) -> Result<T, CodecError> {
    decode(serde_json::from_str::<Envelope>(raw)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CsrfToken, User};
    use chrono::{Duration, Utc};

    #[test]
    fn test_decode_rejects_other_kind() {
        let token = CsrfToken::new("abc".to_string(), Utc::now() + Duration::minutes(5));
        let envelope = encode(&token).unwrap();

        match decode::<User>(envelope) {
            Err(CodecError::KindMismatch { expected, found }) => {
                assert_eq!(expected, "user");
                assert_eq!(found, "csrf_token");
            }
            other => panic!("expected kind mismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_rejects_other_version() {
        let token = CsrfToken::new("abc".to_string(), Utc::now() + Duration::minutes(5));
        let mut envelope = encode(&token).unwrap();
        envelope.version += 1;

        assert!(matches!(
            decode::<CsrfToken>(envelope),
            Err(CodecError::VersionMismatch { .. })
        ));
    }

    #[test]
    fn test_string_form_carries_kind_and_version() {
        let user = User::new("Ada", "ada@example.com");
        let raw = to_string(&user).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();

        assert_eq!(value["kind"], "user");
        assert_eq!(value["version"], 1);

        let decoded: User = from_str(&raw).unwrap();
        assert_eq!(decoded.email, "ada@example.com");
    }
}
