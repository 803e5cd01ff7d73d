//! Pluggable byte transform applied around every store and load.
//!
//! The codec sees the caller's bytes before they enter the pending buffer and
//! the persisted bytes after they leave the database. Encryption lives here.

use thiserror::Error;

use crate::feature::StoreFeature;

/// Error type for codec operations.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Failed to encode value: {0}")]
    Encode(String),

    #[error("Failed to decode value: {0}")]
    Decode(String),
}

/// Symmetric byte transform keyed by the value's feature tags.
pub trait ValueCodec: Send + Sync {
    /// Transform caller bytes into persisted bytes.
    fn encode(&self, bytes: &[u8], features: &[StoreFeature]) -> Result<Vec<u8>, CodecError>;

    /// Transform persisted bytes back into caller bytes.
    fn decode(&self, bytes: &[u8], features: &[StoreFeature]) -> Result<Vec<u8>, CodecError>;
}

/// Codec that stores bytes unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityCodec;

impl ValueCodec for IdentityCodec {
    fn encode(&self, bytes: &[u8], _features: &[StoreFeature]) -> Result<Vec<u8>, CodecError> {
        Ok(bytes.to_vec())
    }

    fn decode(&self, bytes: &[u8], _features: &[StoreFeature]) -> Result<Vec<u8>, CodecError> {
        Ok(bytes.to_vec())
    }
}
