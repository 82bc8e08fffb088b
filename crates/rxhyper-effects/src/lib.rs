//! rxhyper Effects - default capability handlers
//!
//! Concrete implementations of the base capabilities declared in
//! `rxhyper-core`: the Tokio pipeline, the standard value codec, hex buffer
//! helpers, the in-memory storage backend, and the builtin module loader that
//! serves them by name.

#![forbid(unsafe_code)]

pub mod buffer;
pub mod codec;
pub mod loader;
pub mod pipeline;
pub mod storage;

pub use buffer::HexBuffers;
pub use codec::StandardCodec;
pub use loader::{BuiltinLoader, Provider};
pub use pipeline::TokioPipeline;
pub use storage::{MemoryBlockFile, MemoryStorage};
