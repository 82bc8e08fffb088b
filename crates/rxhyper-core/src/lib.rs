//! rxhyper Core - capability resolution and subsystem bootstrap
//!
//! Foundation shared by every rxhyper crate. It contains the dependency
//! resolution model and the boundary traits for the external replicated-log
//! libraries, with no concrete handlers.
//!
//! # Layers
//!
//! ## Configuration
//! - `SharedConfiguration`: merge-only name → record map, resolved cache,
//!   module loader, `make_file` hook, and `RuntimeSettings`
//! - `CapabilityResolver`: cache-first resolution with optional degradation
//!
//! ## Bootstrap
//! - `CoalescingInitializer`: single-flight, retry-on-failure subsystem setup
//! - `Container`: immutable subsystem context with parent fallback
//!
//! ## Boundary Interfaces (pure signatures)
//! - `ReplicatedLog`, `MultiLogStore`: the log and store libraries
//! - `ByteDuplex`: replication transports
//! - `Pipeline`, `ValueCodec`, `Buffers`, `StorageBackend`: base capabilities

#![forbid(unsafe_code)]

/// Capabilities, resolution records, and the module loader seam
pub mod capability;

/// Process-wide shared configuration
pub mod configuration;

/// Immutable subsystem containers
pub mod container;

/// Boundary traits for external collaborators
pub mod effects;

/// Unified error handling
pub mod errors;

/// Coalescing async initializer
pub mod initializer;

/// Capability resolver
pub mod resolver;

/// TOML and environment backed runtime settings
pub mod settings;

pub use capability::{is_remote_specifier, names, Capability, CapabilityRecord, ModuleLoader};
pub use configuration::{default_make_file, ConfigOverrides, MakeFile, SharedConfiguration};
pub use container::{Container, ContainerBuilder};
pub use effects::*;
pub use errors::{RxError, RxResult};
pub use initializer::{Bootstrap, CoalescingInitializer, InitializerState};
pub use resolver::CapabilityResolver;
pub use settings::RuntimeSettings;
