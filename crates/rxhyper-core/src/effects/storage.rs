//! Storage backend capability
//!
//! The log libraries persist blocks through files opened on a backend. The
//! configured backend is exposed to facades as the `make_file` factory.

use bytes::Bytes;
use std::sync::Arc;

use crate::errors::RxResult;

/// Random-access block file
pub trait BlockFile: Send + Sync {
    /// Read the block at `index`, if written
    fn read(&self, index: u64) -> RxResult<Option<Bytes>>;

    /// Write the block at `index`
    fn write(&self, index: u64, block: Bytes) -> RxResult<()>;

    /// Number of contiguous blocks from index 0
    fn len(&self) -> u64;

    /// Whether no block has been written
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Release the file; later reads and writes fail
    fn close(&self) -> RxResult<()>;
}

/// Opens block files by name
pub trait StorageBackend: Send + Sync {
    /// Open (or create) the named file
    fn open(&self, name: &str) -> RxResult<Arc<dyn BlockFile>>;
}

/// Storage capability that builds a fresh backend for every log it backs
pub type StorageConstructor = Arc<dyn Fn() -> Arc<dyn StorageBackend> + Send + Sync>;
