//! Boundary interfaces consumed from external libraries
//!
//! Pure signatures only. Default handlers live in `rxhyper-effects`; the
//! in-memory log and store used by tests live in `rxhyper-testkit`.

pub mod buffer;
pub mod codec;
pub mod duplex;
pub mod log;
pub mod pipeline;
pub mod storage;
pub mod store;

pub use buffer::Buffers;
pub use codec::{Block, ValueCodec, ValueEncoding};
pub use duplex::{ByteDuplex, DuplexEvent};
pub use log::{
    AppendOutcome, BlockRange, ByteStreamOptions, GetOptions, LogEvent, LogFactory, LogKey,
    LogOptions, PeerDiscoveryDone, ReadStreamOptions, ReplicatedLog, KEY_LEN,
};
pub use pipeline::Pipeline;
pub use storage::{BlockFile, StorageBackend, StorageConstructor};
pub use store::{MultiLogStore, StoreEvent, StoreFactory, StoreOptions};
