//! rxhyper Facade - reactive logs and stores
//!
//! The user-facing layer. [`RxHyper`] hosts the shared configuration and the
//! base → log → store initializers; [`RxLog`] and [`RxStore`] wrap the
//! external log and store libraries as async calls and lazy streams, and
//! take part in replication through the bridge.
//!
//! ```rust,ignore
//! let host = RxHyper::with_builtins();
//! let ctx = host.install_log(overrides).await?;
//! let log = RxLog::create(ctx, LogOptions::with_encoding(ValueEncoding::Json))?;
//! log.append(vec!["hello".into()]).await?;
//! ```

#![forbid(unsafe_code)]

/// Subsystem bootstraps
pub mod bootstrap;

/// Typed subsystem contexts
pub mod context;

/// Reactive log facade
pub mod log;

/// Hosting runtime
pub mod runtime;

/// Reactive store facade
pub mod store;

pub use bootstrap::{BaseBootstrap, LogBootstrap, StoreBootstrap};
pub use context::{BaseContext, LogContext, StoreContext, SETTINGS};
pub use log::{AppendResult, DoneFactory, RxLog};
pub use runtime::RxHyper;
pub use store::RxStore;

pub use rxhyper_bridge::{BridgeOutcome, Endpoint, Notification, Observer, PeerKind};
