//! Replication framing used by the memory log and store
//!
//! Newline-delimited JSON. Each side first announces the logs it carries with
//! a handshake, then streams every block it has, in index order, followed by
//! live appends. The receiving log applies a block only when its index equals
//! the local length and parks blocks that arrive early.

use bytes::{Buf, Bytes, BytesMut};
use rxhyper_core::{LogKey, RxError, RxResult};
use serde::{Deserialize, Serialize};

/// One replication frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    /// The sender carries this log
    Handshake {
        /// Log key
        key: LogKey,
        /// Sender's length at handshake time
        length: u64,
    },
    /// One stored block
    Block {
        /// Log key
        key: LogKey,
        /// Block index
        index: u64,
        /// Hex encoded stored bytes
        block: String,
    },
}

impl Frame {
    /// Block frame for raw stored bytes
    pub fn block(key: LogKey, index: u64, bytes: &[u8]) -> Self {
        Frame::Block {
            key,
            index,
            block: hex::encode(bytes),
        }
    }

    /// Log the frame belongs to
    pub fn key(&self) -> LogKey {
        match self {
            Frame::Handshake { key, .. } | Frame::Block { key, .. } => *key,
        }
    }

    /// Serialize as one newline-terminated line
    pub fn encode(&self) -> RxResult<Bytes> {
        let mut line = serde_json::to_vec(self)?;
        line.push(b'\n');
        Ok(Bytes::from(line))
    }

    /// Stored bytes carried by a block frame
    pub fn payload(&self) -> RxResult<Option<Bytes>> {
        match self {
            Frame::Handshake { .. } => Ok(None),
            Frame::Block { block, .. } => hex::decode(block)
                .map(|bytes| Some(Bytes::from(bytes)))
                .map_err(|e| RxError::transport(format!("Malformed block frame: {e}"))),
        }
    }
}

/// Reassembles frames from arbitrarily split chunks
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: BytesMut,
}

impl FrameDecoder {
    /// Feed a chunk, returning every complete frame it finished
    pub fn push(&mut self, chunk: &[u8]) -> RxResult<Vec<Frame>> {
        self.buffer.extend_from_slice(chunk);
        let mut frames = Vec::new();
        while let Some(end) = self.buffer.iter().position(|b| *b == b'\n') {
            let line = self.buffer.split_to(end);
            self.buffer.advance(1);
            if line.is_empty() {
                continue;
            }
            let frame = serde_json::from_slice(&line)
                .map_err(|e| RxError::transport(format!("Malformed replication frame: {e}")))?;
            frames.push(frame);
        }
        Ok(frames)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_survive_arbitrary_splits() {
        let key = LogKey::from_bytes([3u8; 32]);
        let mut wire = Frame::Handshake { key, length: 1 }.encode().unwrap().to_vec();
        wire.extend_from_slice(&Frame::block(key, 0, b"hello").encode().unwrap());

        let mut decoder = FrameDecoder::default();
        let (head, tail) = wire.split_at(7);
        assert!(decoder.push(head).unwrap().is_empty());
        let frames = decoder.push(tail).unwrap();

        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0], Frame::Handshake { key, length: 1 });
        assert_eq!(frames[1].payload().unwrap().unwrap(), Bytes::from_static(b"hello"));
        assert_eq!(frames[1].key(), key);
    }

    #[test]
    fn garbage_is_a_transport_error() {
        let mut decoder = FrameDecoder::default();
        assert!(matches!(
            decoder.push(b"{nope}\n"),
            Err(RxError::Transport { .. })
        ));
    }
}
