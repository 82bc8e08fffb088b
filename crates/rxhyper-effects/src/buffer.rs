//! Hex buffer utilities

use bytes::Bytes;
use rxhyper_core::{Buffers, RxError, RxResult, KEY_LEN};

/// Hex encoding helpers over `hex`
#[derive(Debug, Clone, Copy, Default)]
pub struct HexBuffers;

impl HexBuffers {
    /// Create the handler
    pub fn new() -> Self {
        Self
    }
}

impl Buffers for HexBuffers {
    fn to_hex(&self, bytes: &[u8]) -> String {
        hex::encode(bytes)
    }

    fn from_hex(&self, text: &str) -> RxResult<Bytes> {
        hex::decode(text)
            .map(Bytes::from)
            .map_err(|e| RxError::usage(format!("Invalid hex string: {e}")))
    }

    fn is_key(&self, bytes: &[u8]) -> bool {
        bytes.len() == KEY_LEN
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_and_key_shape() {
        let buffers = HexBuffers::new();
        assert_eq!(buffers.to_hex(&[0xab, 0x01]), "ab01");
        assert_eq!(&buffers.from_hex("ab01").unwrap()[..], &[0xab, 0x01]);
        assert!(buffers.from_hex("xyz").is_err());
        assert!(buffers.is_key(&[0u8; KEY_LEN]));
        assert!(!buffers.is_key(&[0u8; 4]));
    }
}
