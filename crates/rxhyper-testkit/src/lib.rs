//! rxhyper Testing Infrastructure
//!
//! In-memory stand-ins for the external replicated-log and multi-log store
//! libraries, an in-memory byte duplex, and fixture configuration.
//!
//! # Usage
//!
//! ```toml
//! [dev-dependencies]
//! rxhyper-testkit = { path = "../rxhyper-testkit" }
//! ```
//!
//! ```rust,no_run
//! use rxhyper_testkit::*;
//!
//! # async fn demo() {
//! init_test_tracing();
//! let overrides = fixture_overrides();
//! # let _ = overrides;
//! # }
//! ```

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

pub mod duplex;
pub mod fixtures;
pub mod log;
pub mod protocol;
pub mod store;

pub use duplex::{pipe, DuplexCommand, MemoryDuplex};
pub use fixtures::{fixture_loader, fixture_overrides, init_test_tracing, memory_storage};
pub use log::{discovery_key, LogCore, MemoryLog, MemoryLogFactory, DEFAULT_EVENT_BUFFER};
pub use protocol::{Frame, FrameDecoder};
pub use store::{MemoryStore, MemoryStoreFactory};
