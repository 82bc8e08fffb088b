//! Hosting runtime
//!
//! Owns the one [`SharedConfiguration`] of a process (or test) and the three
//! subsystem initializers chained base → log → store.

use rxhyper_core::{
    CapabilityResolver, CoalescingInitializer, ConfigOverrides, ModuleLoader,
    RuntimeSettings, RxResult, SharedConfiguration,
};
use rxhyper_effects::BuiltinLoader;
use std::fmt;
use std::sync::Arc;

use crate::bootstrap::{BaseBootstrap, LogBootstrap, StoreBootstrap};
use crate::context::{BaseContext, LogContext, StoreContext};

/// Host of the rxhyper subsystems
pub struct RxHyper {
    config: SharedConfiguration,
    base: Arc<CoalescingInitializer<BaseBootstrap>>,
    log: Arc<CoalescingInitializer<LogBootstrap>>,
    store: CoalescingInitializer<StoreBootstrap>,
}

impl RxHyper {
    /// Host resolving modules through `loader`
    pub fn new(loader: Arc<dyn ModuleLoader>) -> Self {
        let config = SharedConfiguration::new(loader);
        let resolver = CapabilityResolver::new(config.clone());
        let base = Arc::new(CoalescingInitializer::new(BaseBootstrap, resolver.clone()));
        let log = Arc::new(CoalescingInitializer::new(
            LogBootstrap::new(base.clone()),
            resolver.clone(),
        ));
        let store = CoalescingInitializer::new(StoreBootstrap::new(log.clone()), resolver);
        Self {
            config,
            base,
            log,
            store,
        }
    }

    /// Host over the builtin loader configured by `settings`
    pub fn from_settings(settings: RuntimeSettings) -> Self {
        let host = Self::new(Arc::new(BuiltinLoader::from_settings(&settings)));
        host.config.merge(ConfigOverrides::new().settings(settings));
        host
    }

    /// Host over the builtin loader with default settings
    pub fn with_builtins() -> Self {
        Self::from_settings(RuntimeSettings::default())
    }

    /// The shared configuration
    pub fn configuration(&self) -> &SharedConfiguration {
        &self.config
    }

    /// Install the base subsystem
    pub async fn install_base(&self, overrides: ConfigOverrides) -> RxResult<Arc<BaseContext>> {
        self.base.initialize(overrides).await
    }

    /// Install the log subsystem, and base before it
    pub async fn install_log(&self, overrides: ConfigOverrides) -> RxResult<Arc<LogContext>> {
        self.log.initialize(overrides).await
    }

    /// Install the store subsystem, and log and base before it
    pub async fn install_store(&self, overrides: ConfigOverrides) -> RxResult<Arc<StoreContext>> {
        self.store.initialize(overrides).await
    }

    /// Base initializer
    pub fn base(&self) -> &CoalescingInitializer<BaseBootstrap> {
        &self.base
    }

    /// Log initializer
    pub fn log(&self) -> &CoalescingInitializer<LogBootstrap> {
        &self.log
    }

    /// Store initializer
    pub fn store(&self) -> &CoalescingInitializer<StoreBootstrap> {
        &self.store
    }
}

impl Default for RxHyper {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl fmt::Debug for RxHyper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RxHyper")
            .field("base", &self.base.state())
            .field("log", &self.log.state())
            .field("store", &self.store.state())
            .finish()
    }
}
