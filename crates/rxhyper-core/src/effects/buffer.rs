//! Byte buffer utilities capability

use bytes::Bytes;

use crate::errors::RxResult;

/// Buffer helpers used when parsing keys and rendering them for logs.
pub trait Buffers: Send + Sync {
    /// Lowercase hex rendering
    fn to_hex(&self, bytes: &[u8]) -> String;

    /// Parse hex into bytes
    fn from_hex(&self, text: &str) -> RxResult<Bytes>;

    /// Whether `bytes` has the shape of a log key
    fn is_key(&self, bytes: &[u8]) -> bool;
}
