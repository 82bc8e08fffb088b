//! Standard value codec
//!
//! `binary` passes bytes through, `utf8` stores text, `json` stores one JSON
//! document per block. Text written to a JSON log becomes a JSON string.

use bytes::Bytes;
use rxhyper_core::{Block, RxError, RxResult, ValueCodec, ValueEncoding};

/// Binary, UTF-8, and JSON block codec
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardCodec;

impl StandardCodec {
    /// Create the codec
    pub fn new() -> Self {
        Self
    }
}

impl ValueCodec for StandardCodec {
    fn encode(&self, block: &Block, encoding: ValueEncoding) -> RxResult<Bytes> {
        match (encoding, block) {
            (ValueEncoding::Binary, Block::Binary(bytes)) => Ok(bytes.clone()),
            (ValueEncoding::Binary | ValueEncoding::Utf8, Block::Text(text)) => {
                Ok(Bytes::copy_from_slice(text.as_bytes()))
            }
            (ValueEncoding::Binary, Block::Json(value)) => Ok(Bytes::from(serde_json::to_vec(value)?)),
            (ValueEncoding::Utf8, Block::Binary(bytes)) => {
                std::str::from_utf8(bytes)
                    .map_err(|e| RxError::codec(format!("Block is not valid UTF-8: {e}")))?;
                Ok(bytes.clone())
            }
            (ValueEncoding::Utf8, Block::Json(serde_json::Value::String(text))) => {
                Ok(Bytes::copy_from_slice(text.as_bytes()))
            }
            (ValueEncoding::Utf8, Block::Json(value)) => Ok(Bytes::from(value.to_string())),
            (ValueEncoding::Json, Block::Json(value)) => Ok(Bytes::from(serde_json::to_vec(value)?)),
            (ValueEncoding::Json, Block::Text(text)) => Ok(Bytes::from(serde_json::to_vec(text)?)),
            // Raw bytes on a JSON log must already be a JSON document
            (ValueEncoding::Json, Block::Binary(bytes)) => {
                serde_json::from_slice::<serde_json::Value>(bytes)?;
                Ok(bytes.clone())
            }
        }
    }

    fn decode(&self, bytes: Bytes, encoding: ValueEncoding) -> RxResult<Block> {
        match encoding {
            ValueEncoding::Binary => Ok(Block::Binary(bytes)),
            ValueEncoding::Utf8 => String::from_utf8(bytes.to_vec())
                .map(Block::Text)
                .map_err(|e| RxError::codec(format!("Stored block is not valid UTF-8: {e}"))),
            ValueEncoding::Json => Ok(Block::Json(serde_json::from_slice(&bytes)?)),
        }
    }
}
