//! Replicated log boundary
//!
//! The log library itself (on-disk format, Merkle proofs, wire protocol) is an
//! external collaborator. This module fixes the capability set the facades
//! consume from it.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast;

use super::codec::{Block, ValueCodec, ValueEncoding};
use super::duplex::ByteDuplex;
use super::storage::StorageBackend;
use crate::errors::{RxError, RxResult};

/// Length of a log key in bytes
pub const KEY_LEN: usize = 32;

/// Public key identifying a log
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LogKey([u8; KEY_LEN]);

impl LogKey {
    /// Wrap raw key bytes
    pub const fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Parse a key from a byte slice of exactly [`KEY_LEN`] bytes
    pub fn from_slice(bytes: &[u8]) -> RxResult<Self> {
        let array: [u8; KEY_LEN] = bytes.try_into().map_err(|_| {
            RxError::usage(format!(
                "Log keys are {KEY_LEN} bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self(array))
    }

    /// Parse a hex encoded key
    pub fn from_hex(text: &str) -> RxResult<Self> {
        let bytes =
            hex::decode(text).map_err(|e| RxError::usage(format!("Invalid hex key: {e}")))?;
        Self::from_slice(&bytes)
    }

    /// Raw key bytes
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    /// Lowercase hex rendering
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for LogKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for LogKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LogKey({})", &self.to_hex()[..8])
    }
}

/// Options for opening a log
#[derive(Clone, Default)]
pub struct LogOptions {
    /// Key of an existing log; writable logs get a fresh key when absent
    pub key: Option<LogKey>,
    /// Name used by stores to derive the key
    pub name: Option<String>,
    /// Block value encoding
    pub value_encoding: ValueEncoding,
    /// Storage backend; falls back to the subsystem's default storage
    pub storage: Option<Arc<dyn StorageBackend>>,
    /// Event channel capacity; falls back to the library's default
    pub event_buffer: Option<usize>,
}

impl LogOptions {
    /// Options with a value encoding
    pub fn with_encoding(value_encoding: ValueEncoding) -> Self {
        Self {
            value_encoding,
            ..Self::default()
        }
    }

    /// Set the key
    pub fn key(mut self, key: LogKey) -> Self {
        self.key = Some(key);
        self
    }

    /// Set the name
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the storage backend
    pub fn storage(mut self, storage: Arc<dyn StorageBackend>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Set the event channel capacity
    pub fn event_buffer(mut self, capacity: usize) -> Self {
        self.event_buffer = Some(capacity);
        self
    }
}

impl fmt::Debug for LogOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogOptions")
            .field("key", &self.key)
            .field("name", &self.name)
            .field("value_encoding", &self.value_encoding)
            .field("storage", &self.storage.as_ref().map(|_| ".."))
            .field("event_buffer", &self.event_buffer)
            .finish()
    }
}

/// Options for a single block read
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GetOptions {
    /// Wait for the block to arrive from a peer instead of returning `None`
    pub wait: bool,
}

/// Options for a block read stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadStreamOptions {
    /// First index to read
    pub start: u64,
    /// Exclusive end; defaults to the length at subscription time
    pub end: Option<u64>,
    /// Keep following appends after the current end
    pub live: bool,
}

impl ReadStreamOptions {
    /// Live stream from the start of the log
    pub fn live() -> Self {
        Self {
            live: true,
            ..Self::default()
        }
    }
}

/// Options for a raw byte stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ByteStreamOptions {
    /// First block index
    pub start: u64,
    /// Exclusive end block index
    pub end: Option<u64>,
}

/// Half-open block range used for downloads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRange {
    /// First index
    pub start: u64,
    /// Exclusive end; `None` means everything the remote has
    pub end: Option<u64>,
}

impl BlockRange {
    /// Range `[start, end)`
    pub fn new(start: u64, end: u64) -> Self {
        Self {
            start,
            end: Some(end),
        }
    }
}

/// Result of a successful append
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendOutcome {
    /// Log length after the append
    pub length: u64,
    /// Total encoded size of the log after the append
    pub byte_length: u64,
}

/// Events emitted by a log
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogEvent {
    /// Blocks were appended locally or received from a peer
    Append,
    /// A replication peer connected
    PeerAdd,
    /// A replication peer disconnected
    PeerRemove,
    /// The log closed
    Close,
}

/// Completion handle returned when peer discovery starts
pub type PeerDiscoveryDone = Box<dyn FnOnce() + Send>;

/// Replicated append-only log
#[async_trait]
pub trait ReplicatedLog: Send + Sync {
    /// Wait until the log is opened
    async fn ready(&self) -> RxResult<()>;

    /// Public key; `None` until ready
    fn key(&self) -> Option<LogKey>;

    /// Key used for peer discovery; `None` until ready
    fn discovery_key(&self) -> Option<LogKey>;

    /// Identity of the underlying log, shared by all of its sessions and
    /// snapshots
    fn instance_id(&self) -> usize;

    /// Number of blocks
    fn length(&self) -> u64;

    /// Whether this instance can append
    fn writable(&self) -> bool;

    /// Whether the log has been closed
    fn is_closed(&self) -> bool;

    /// Append blocks in order
    async fn append(&self, blocks: Vec<Block>) -> RxResult<AppendOutcome>;

    /// Read the block at `index`
    async fn get(&self, index: u64, options: GetOptions) -> RxResult<Option<Block>>;

    /// Stream blocks in index order
    fn create_read_stream(&self, options: ReadStreamOptions) -> BoxStream<'static, RxResult<Block>>;

    /// Stream raw encoded block bytes in index order
    fn create_byte_stream(&self, options: ByteStreamOptions) -> BoxStream<'static, RxResult<Bytes>>;

    /// Resolve once the range is available locally
    async fn download(&self, range: BlockRange) -> RxResult<()>;

    /// Open a replication transport
    fn replicate(&self, is_initiator: bool) -> RxResult<Arc<dyn ByteDuplex>>;

    /// Open another session on the same log
    fn session(&self, options: LogOptions) -> RxResult<Arc<dyn ReplicatedLog>>;

    /// Open a session frozen at the current length
    fn snapshot(&self, options: LogOptions) -> RxResult<Arc<dyn ReplicatedLog>>;

    /// Mark peer discovery as in progress until the handle is called
    fn finding_peers(&self) -> PeerDiscoveryDone;

    /// Subscribe to log events
    fn subscribe(&self) -> broadcast::Receiver<LogEvent>;

    /// Close this session
    async fn close(&self) -> RxResult<()>;
}

impl fmt::Debug for dyn ReplicatedLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplicatedLog").field("key", &self.key()).finish_non_exhaustive()
    }
}

/// Constructor capability of a log library
pub trait LogFactory: Send + Sync {
    /// Construct a log; call [`ReplicatedLog::ready`] before use
    fn open(
        &self,
        storage: Arc<dyn StorageBackend>,
        codec: Arc<dyn ValueCodec>,
        options: LogOptions,
    ) -> RxResult<Arc<dyn ReplicatedLog>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn key_hex_roundtrip_and_length_check() {
        let key = LogKey::from_bytes([7u8; KEY_LEN]);
        assert_eq!(LogKey::from_hex(&key.to_hex()).unwrap(), key);
        assert_matches!(
            LogKey::from_slice(&[1, 2, 3]),
            Err(RxError::Usage { .. })
        );
        assert!(LogKey::from_hex("zz").is_err());
    }

    #[test]
    fn options_builders() {
        let key = LogKey::from_bytes([1u8; KEY_LEN]);
        let options = LogOptions::with_encoding(ValueEncoding::Json)
            .key(key)
            .name("hotsauce");
        assert_eq!(options.key, Some(key));
        assert_eq!(options.name.as_deref(), Some("hotsauce"));
        assert_eq!(options.value_encoding, ValueEncoding::Json);
        assert!(ReadStreamOptions::live().live);
    }
}
