//! Subsystem bootstraps
//!
//! Base resolves the shared capabilities. Log and store first register their
//! library records (unless the host already supplied one), bring their
//! parent subsystem up, then resolve their library.

use async_trait::async_trait;
use rxhyper_core::{
    names, Bootstrap, Buffers, Capability, CapabilityRecord, CapabilityResolver,
    CoalescingInitializer, ConfigOverrides, LogFactory, Pipeline, RxError, RxResult, StoreFactory,
    ValueCodec,
};
use std::sync::Arc;
use tracing::debug;

use crate::context::{BaseContext, LogContext, StoreContext};

fn typed<T: std::any::Any + Clone>(capability: &Capability, name: &str) -> RxResult<T> {
    capability.get::<T>().ok_or_else(|| {
        RxError::resolution(name, "resolved capability has an unexpected type")
    })
}

/// Resolves pipeline, codec, buffer and the default storage
#[derive(Debug, Default)]
pub struct BaseBootstrap;

#[async_trait]
impl Bootstrap for BaseBootstrap {
    type Context = BaseContext;

    fn subsystem(&self) -> &'static str {
        "base"
    }

    async fn bootstrap(&self, resolver: &CapabilityResolver) -> RxResult<BaseContext> {
        let config = resolver.configuration();
        let settings = config.settings();
        settings.validate()?;

        let resolved = resolver
            .resolve_all(&[
                names::PIPELINE,
                names::CODEC,
                names::BUFFER,
                settings.default_storage.as_str(),
            ])
            .await?;
        let [pipeline, codec, buffer, storage] = <[Capability; 4]>::try_from(resolved)
            .map_err(|_| RxError::initialization("base", "capability count mismatch"))?;

        let storage = (!storage.is_empty()).then_some(storage);
        debug!(
            storage = %settings.default_storage,
            available = storage.is_some(),
            "Base capabilities resolved"
        );

        Ok(BaseContext::new(
            typed::<Arc<dyn Pipeline>>(&pipeline, names::PIPELINE)?,
            typed::<Arc<dyn ValueCodec>>(&codec, names::CODEC)?,
            typed::<Arc<dyn Buffers>>(&buffer, names::BUFFER)?,
            storage,
            config.make_file(),
            settings,
        ))
    }
}

/// Brings base up, then resolves the log library
pub struct LogBootstrap {
    base: Arc<CoalescingInitializer<BaseBootstrap>>,
}

impl LogBootstrap {
    /// Bootstrap deriving from `base`
    pub fn new(base: Arc<CoalescingInitializer<BaseBootstrap>>) -> Self {
        Self { base }
    }
}

#[async_trait]
impl Bootstrap for LogBootstrap {
    type Context = LogContext;

    fn subsystem(&self) -> &'static str {
        "log"
    }

    async fn bootstrap(&self, resolver: &CapabilityResolver) -> RxResult<LogContext> {
        resolver
            .configuration()
            .register_if_absent(names::LOG, CapabilityRecord::module(names::LOG));
        let base = self.base.initialize(ConfigOverrides::new()).await?;
        let library = resolver.resolve(names::LOG).await?;
        Ok(LogContext::new(
            base,
            typed::<Arc<dyn LogFactory>>(&library, names::LOG)?,
        ))
    }
}

/// Brings log (and so base) up, then resolves the store library
pub struct StoreBootstrap {
    log: Arc<CoalescingInitializer<LogBootstrap>>,
}

impl StoreBootstrap {
    /// Bootstrap deriving from `log`
    pub fn new(log: Arc<CoalescingInitializer<LogBootstrap>>) -> Self {
        Self { log }
    }
}

#[async_trait]
impl Bootstrap for StoreBootstrap {
    type Context = StoreContext;

    fn subsystem(&self) -> &'static str {
        "store"
    }

    async fn bootstrap(&self, resolver: &CapabilityResolver) -> RxResult<StoreContext> {
        resolver
            .configuration()
            .register_if_absent(names::STORE, CapabilityRecord::module(names::STORE));
        let log = self.log.initialize(ConfigOverrides::new()).await?;
        let library = resolver.resolve(names::STORE).await?;
        Ok(StoreContext::new(
            log,
            typed::<Arc<dyn StoreFactory>>(&library, names::STORE)?,
        ))
    }
}
