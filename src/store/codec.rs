//! # Payload codecs
//!
//! A codec converts a [`Value`] to and from bytes for the durable tier. The
//! store records which codec produced a payload (a `codec_tag`) so it can be
//! decoded later without guessing (§4.4). Codecs whose `is_persistent` is
//! `false` may never be written to the durable tier — the store routes their
//! values to the ephemeral tier instead (§4.4, resolved Open Question: the
//! opaque tag is ephemeral-only and never serialized).

use crate::value::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// The codec tag used for ordinary (non-opaque) values (§4.4).
pub const BINCODE_CODEC_TAG: &str = "bincode/1";

/// The codec tag reserved for `Value::Opaque` payloads. Never persistent.
pub const OPAQUE_CODEC_TAG: &str = "opaque/ephemeral";

/// Errors raised while encoding or decoding a payload (§7, part of `StoreError`).
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("unknown codec tag: {0}")]
    UnknownTag(String),
    #[error("encode failed: {0}")]
    EncodeFailed(String),
    #[error("decode failed: {0}")]
    DecodeFailed(String),
    #[error("codec {0} cannot persist opaque values")]
    NotPersistable(String),
}

/// Converts a [`Value`] to and from bytes under a stable tag.
pub trait Codec: Send + Sync {
    fn tag(&self) -> &'static str;
    /// Whether this codec's output may be written to the durable tier.
    fn is_persistent(&self) -> bool;
    fn encode(&self, value: &Value) -> Result<Vec<u8>, CodecError>;
    fn decode(&self, bytes: &[u8]) -> Result<Value, CodecError>;
}

/// The default durable-tier codec: `bincode`, for any `Value` that isn't
/// `Opaque` (opaque values are rejected at encode time).
pub struct BincodeCodec;

impl Codec for BincodeCodec {
    fn tag(&self) -> &'static str {
        BINCODE_CODEC_TAG
    }

    fn is_persistent(&self) -> bool {
        true
    }

    fn encode(&self, value: &Value) -> Result<Vec<u8>, CodecError> {
        if matches!(value, Value::Opaque(_)) {
            return Err(CodecError::NotPersistable(self.tag().to_string()));
        }
        bincode::serialize(value).map_err(|e| CodecError::EncodeFailed(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value, CodecError> {
        bincode::deserialize(bytes).map_err(|e| CodecError::DecodeFailed(e.to_string()))
    }
}

/// The ephemeral-only codec for opaque payloads: it never actually encodes
/// to bytes, since opaque values only ever live in the in-memory tier.
pub struct OpaqueCodec;

impl Codec for OpaqueCodec {
    fn tag(&self) -> &'static str {
        OPAQUE_CODEC_TAG
    }

    fn is_persistent(&self) -> bool {
        false
    }

    fn encode(&self, _value: &Value) -> Result<Vec<u8>, CodecError> {
        Err(CodecError::NotPersistable(self.tag().to_string()))
    }

    fn decode(&self, _bytes: &[u8]) -> Result<Value, CodecError> {
        Err(CodecError::NotPersistable(self.tag().to_string()))
    }
}

/// Lookup table from codec tag to implementation.
pub struct CodecRegistry {
    codecs: BTreeMap<&'static str, Arc<dyn Codec>>,
}

impl Default for CodecRegistry {
    fn default() -> Self {
        let mut codecs: BTreeMap<&'static str, Arc<dyn Codec>> = BTreeMap::new();
        codecs.insert(BINCODE_CODEC_TAG, Arc::new(BincodeCodec));
        codecs.insert(OPAQUE_CODEC_TAG, Arc::new(OpaqueCodec));
        CodecRegistry { codecs }
    }
}

impl CodecRegistry {
    /// Pick the codec for a value: `opaque` for `Value::Opaque`, `bincode`
    /// for everything else (§4.4).
    pub fn codec_for(&self, value: &Value) -> Arc<dyn Codec> {
        let tag = if matches!(value, Value::Opaque(_)) {
            OPAQUE_CODEC_TAG
        } else {
            BINCODE_CODEC_TAG
        };
        self.codecs
            .get(tag)
            .cloned()
            .expect("built-in codec tags are always registered")
    }

    pub fn by_tag(&self, tag: &str) -> Result<Arc<dyn Codec>, CodecError> {
        self.codecs
            .get(tag)
            .cloned()
            .ok_or_else(|| CodecError::UnknownTag(tag.to_string()))
    }
}
