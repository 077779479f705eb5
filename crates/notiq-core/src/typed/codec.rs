//! KeyCodec - conversion between typed keys and the stored `(tag, payload)` pair.

use serde_json::Value;
use thiserror::Error;

use super::key::NotificationKey;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("failed to encode key '{tag}': {source}")]
    Encode {
        tag: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("no decoder registered for key tag '{0}'")]
    UnknownTag(String),

    #[error("key tag mismatch: expected '{expected}', found '{found}'")]
    TagMismatch { expected: String, found: String },

    #[error("failed to decode key '{tag}': {source}")]
    Decode {
        tag: String,
        #[source]
        source: serde_json::Error,
    },
}

/// A key in its stored form.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedKey {
    pub tag: String,
    pub payload: Value,
}

/// Stateless JSON codec for `NotificationKey`s.
pub struct KeyCodec;

impl KeyCodec {
    pub fn encode<K: NotificationKey>(key: &K) -> Result<EncodedKey, CodecError> {
        let payload = serde_json::to_value(key).map_err(|source| CodecError::Encode {
            tag: K::TAG.to_string(),
            source,
        })?;
        Ok(EncodedKey {
            tag: K::TAG.to_string(),
            payload,
        })
    }

    pub fn decode<K: NotificationKey>(tag: &str, payload: &Value) -> Result<K, CodecError> {
        if tag != K::TAG {
            return Err(CodecError::TagMismatch {
                expected: K::TAG.to_string(),
                found: tag.to_string(),
            });
        }
        // from_value needs ownership; payloads are small.
        serde_json::from_value(payload.clone()).map_err(|source| CodecError::Decode {
            tag: tag.to_string(),
            source,
        })
    }
}
