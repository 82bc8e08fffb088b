//! Block values and the codec capability

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::errors::RxResult;

/// How block values are encoded on the log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueEncoding {
    /// Raw bytes
    #[default]
    Binary,
    /// UTF-8 text
    Utf8,
    /// JSON documents
    Json,
}

/// A decoded block value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Block {
    /// Raw bytes
    Binary(Bytes),
    /// UTF-8 text
    Text(String),
    /// JSON document
    Json(serde_json::Value),
}

impl Block {
    /// Text content, for text blocks and JSON strings
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Block::Text(text) => Some(text),
            Block::Json(serde_json::Value::String(text)) => Some(text),
            _ => None,
        }
    }
}

impl From<&str> for Block {
    fn from(value: &str) -> Self {
        Block::Text(value.to_string())
    }
}

impl From<String> for Block {
    fn from(value: String) -> Self {
        Block::Text(value)
    }
}

impl From<serde_json::Value> for Block {
    fn from(value: serde_json::Value) -> Self {
        Block::Json(value)
    }
}

impl From<Bytes> for Block {
    fn from(value: Bytes) -> Self {
        Block::Binary(value)
    }
}

impl From<Vec<u8>> for Block {
    fn from(value: Vec<u8>) -> Self {
        Block::Binary(Bytes::from(value))
    }
}

/// Codec capability used by the log libraries to turn blocks into bytes
pub trait ValueCodec: Send + Sync {
    /// Encode a block for storage
    fn encode(&self, block: &Block, encoding: ValueEncoding) -> RxResult<Bytes>;

    /// Decode a stored block
    fn decode(&self, bytes: Bytes, encoding: ValueEncoding) -> RxResult<Block>;
}
