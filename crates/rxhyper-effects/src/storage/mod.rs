//! Storage backend handlers

pub mod memory;

pub use memory::{MemoryBlockFile, MemoryStorage};
