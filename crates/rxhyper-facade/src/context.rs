//! Typed subsystem contexts
//!
//! Each context is produced once by its subsystem bootstrap and shared by
//! `Arc` with every facade created from it. Contexts never change after
//! construction; the untyped [`Container`] underneath is what user-supplied
//! factories receive.

use rxhyper_core::{
    names, Buffers, Capability, Container, LogFactory, MakeFile, Pipeline, RuntimeSettings,
    RxError, RxResult, StorageBackend, StoreFactory, ValueCodec,
};
use std::fmt;
use std::sync::Arc;

/// Container entry holding the [`RuntimeSettings`]
pub const SETTINGS: &str = "settings";

/// Capabilities every subsystem shares
pub struct BaseContext {
    container: Arc<Container>,
    pipeline: Arc<dyn Pipeline>,
    codec: Arc<dyn ValueCodec>,
    buffers: Arc<dyn Buffers>,
    storage: Option<Capability>,
    make_file: MakeFile,
    settings: RuntimeSettings,
}

impl BaseContext {
    pub(crate) fn new(
        pipeline: Arc<dyn Pipeline>,
        codec: Arc<dyn ValueCodec>,
        buffers: Arc<dyn Buffers>,
        storage: Option<Capability>,
        make_file: MakeFile,
        settings: RuntimeSettings,
    ) -> Self {
        let mut builder = Container::builder("base")
            .value(names::PIPELINE, pipeline.clone())
            .value(names::CODEC, codec.clone())
            .value(names::BUFFER, buffers.clone())
            .value(SETTINGS, settings.clone());
        if let Some(storage) = &storage {
            builder = builder.capability(settings.default_storage.clone(), storage.clone());
        }

        Self {
            container: Arc::new(builder.build()),
            pipeline,
            codec,
            buffers,
            storage,
            make_file,
            settings,
        }
    }

    /// Untyped view of this context
    pub fn container(&self) -> &Arc<Container> {
        &self.container
    }

    /// Task and timer runtime
    pub fn pipeline(&self) -> Arc<dyn Pipeline> {
        self.pipeline.clone()
    }

    /// Block codec
    pub fn codec(&self) -> Arc<dyn ValueCodec> {
        self.codec.clone()
    }

    /// Key buffer helpers
    pub fn buffers(&self) -> Arc<dyn Buffers> {
        self.buffers.clone()
    }

    /// Settings captured at bootstrap
    pub fn settings(&self) -> &RuntimeSettings {
        &self.settings
    }

    /// Whether a default storage backend resolved
    pub fn has_storage(&self) -> bool {
        self.storage.is_some()
    }

    /// Storage for a log or store created without an explicit backend
    pub fn make_file(&self) -> RxResult<Arc<dyn StorageBackend>> {
        let storage = self.storage.as_ref().ok_or_else(|| {
            RxError::usage(format!(
                "No storage supplied and default storage '{}' is unavailable",
                self.settings.default_storage
            ))
        })?;
        (self.make_file)(storage)
    }
}

impl fmt::Debug for BaseContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BaseContext")
            .field("container", &self.container)
            .field("storage", &self.storage.is_some())
            .field("settings", &self.settings)
            .finish()
    }
}

/// Base context plus the log library
pub struct LogContext {
    base: Arc<BaseContext>,
    container: Arc<Container>,
    factory: Arc<dyn LogFactory>,
}

impl LogContext {
    pub(crate) fn new(base: Arc<BaseContext>, factory: Arc<dyn LogFactory>) -> Self {
        let container = Container::builder("log")
            .child_of(base.container().clone())
            .value(names::LOG, factory.clone())
            .build();
        Self {
            base,
            container: Arc::new(container),
            factory,
        }
    }

    /// Shared base capabilities
    pub fn base(&self) -> &Arc<BaseContext> {
        &self.base
    }

    /// Untyped view, falling back to the base container
    pub fn container(&self) -> &Arc<Container> {
        &self.container
    }

    /// Log library constructor
    pub fn factory(&self) -> Arc<dyn LogFactory> {
        self.factory.clone()
    }
}

impl fmt::Debug for LogContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogContext")
            .field("container", &self.container)
            .finish()
    }
}

/// Log context plus the store library
pub struct StoreContext {
    log: Arc<LogContext>,
    container: Arc<Container>,
    factory: Arc<dyn StoreFactory>,
}

impl StoreContext {
    pub(crate) fn new(log: Arc<LogContext>, factory: Arc<dyn StoreFactory>) -> Self {
        let container = Container::builder("store")
            .child_of(log.container().clone())
            .value(names::STORE, factory.clone())
            .build();
        Self {
            log,
            container: Arc::new(container),
            factory,
        }
    }

    /// Context used for logs handed out by stores
    pub fn log(&self) -> &Arc<LogContext> {
        &self.log
    }

    /// Shared base capabilities
    pub fn base(&self) -> &Arc<BaseContext> {
        self.log.base()
    }

    /// Untyped view, falling back to the log and base containers
    pub fn container(&self) -> &Arc<Container> {
        &self.container
    }

    /// Store library constructor
    pub fn factory(&self) -> Arc<dyn StoreFactory> {
        self.factory.clone()
    }
}

impl fmt::Debug for StoreContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreContext")
            .field("container", &self.container)
            .finish()
    }
}
