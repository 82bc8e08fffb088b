//! In-memory storage backend
//!
//! Files are kept per name for the lifetime of the backend. Each `open`
//! returns a fresh handle onto the same blocks, so closing one handle leaves
//! the others usable.

use bytes::Bytes;
use parking_lot::RwLock;
use rxhyper_core::{BlockFile, RxError, RxResult, StorageBackend};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

type Blocks = Arc<RwLock<BTreeMap<u64, Bytes>>>;

/// In-memory storage backend
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    files: Arc<RwLock<HashMap<String, Blocks>>>,
}

impl MemoryStorage {
    /// Create an empty backend
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of every file opened so far
    pub fn file_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.files.read().keys().cloned().collect();
        names.sort();
        names
    }
}

impl StorageBackend for MemoryStorage {
    fn open(&self, name: &str) -> RxResult<Arc<dyn BlockFile>> {
        if name.is_empty() {
            return Err(RxError::storage("File name cannot be empty"));
        }
        let blocks = self
            .files
            .write()
            .entry(name.to_string())
            .or_default()
            .clone();
        Ok(Arc::new(MemoryBlockFile {
            name: name.to_string(),
            blocks,
            closed: AtomicBool::new(false),
        }))
    }
}

/// Handle onto one in-memory file
#[derive(Debug)]
pub struct MemoryBlockFile {
    name: String,
    blocks: Blocks,
    closed: AtomicBool,
}

impl MemoryBlockFile {
    fn check_open(&self) -> RxResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(RxError::closed(format!("File '{}'", self.name)))
        } else {
            Ok(())
        }
    }
}

impl BlockFile for MemoryBlockFile {
    fn read(&self, index: u64) -> RxResult<Option<Bytes>> {
        self.check_open()?;
        Ok(self.blocks.read().get(&index).cloned())
    }

    fn write(&self, index: u64, block: Bytes) -> RxResult<()> {
        self.check_open()?;
        self.blocks.write().insert(index, block);
        Ok(())
    }

    fn len(&self) -> u64 {
        let blocks = self.blocks.read();
        let mut len = 0;
        while blocks.contains_key(&len) {
            len += 1;
        }
        len
    }

    fn close(&self) -> RxResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
