//! Test fixtures
//!
//! Installation overrides that register every capability directly, so tests
//! never depend on module loading.

use rxhyper_core::{
    names, Buffers, Capability, CapabilityRecord, ConfigOverrides, LogFactory, Pipeline,
    StorageBackend, StorageConstructor, StoreFactory, ValueCodec,
};
use rxhyper_effects::{BuiltinLoader, HexBuffers, MemoryStorage, StandardCodec, TokioPipeline};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use crate::log::MemoryLogFactory;
use crate::store::MemoryStoreFactory;

/// Storage constructor yielding a fresh in-memory backend per log
pub fn memory_storage() -> StorageConstructor {
    Arc::new(|| Arc::new(MemoryStorage::new()) as Arc<dyn StorageBackend>)
}

/// Overrides registering pipeline, codec, buffer, memory storage, and the
/// memory log and store libraries as plain values
pub fn fixture_overrides() -> ConfigOverrides {
    ConfigOverrides::new()
        .dependency(
            names::PIPELINE,
            CapabilityRecord::value(Arc::new(TokioPipeline::new()) as Arc<dyn Pipeline>),
        )
        .dependency(
            names::CODEC,
            CapabilityRecord::value(Arc::new(StandardCodec::new()) as Arc<dyn ValueCodec>),
        )
        .dependency(
            names::BUFFER,
            CapabilityRecord::value(Arc::new(HexBuffers::new()) as Arc<dyn Buffers>),
        )
        .dependency(
            names::MEMORY_STORAGE,
            CapabilityRecord::value(memory_storage()).optional(),
        )
        .dependency(
            names::LOG,
            CapabilityRecord::value(Arc::new(MemoryLogFactory::new()) as Arc<dyn LogFactory>),
        )
        .dependency(
            names::STORE,
            CapabilityRecord::value(Arc::new(MemoryStoreFactory::new()) as Arc<dyn StoreFactory>),
        )
}

/// Builtin loader that also serves the memory log and store libraries
pub fn fixture_loader() -> BuiltinLoader {
    BuiltinLoader::new()
        .with_provider(names::LOG, || {
            Capability::new(Arc::new(MemoryLogFactory::new()) as Arc<dyn LogFactory>)
        })
        .with_provider(names::STORE, || {
            Capability::new(Arc::new(MemoryStoreFactory::new()) as Arc<dyn StoreFactory>)
        })
}

/// Install a test subscriber honouring `RUST_LOG`; safe to call repeatedly
pub fn init_test_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use rxhyper_core::{CapabilityResolver, ModuleLoader, SharedConfiguration};

    #[tokio::test]
    async fn fixture_registers_every_capability() {
        init_test_tracing();
        init_test_tracing();

        let config = SharedConfiguration::new(Arc::new(BuiltinLoader::new()));
        config.merge(fixture_overrides());
        let resolver = CapabilityResolver::new(config);

        let log = resolver.resolve(names::LOG).await.unwrap();
        assert!(log.get::<Arc<dyn LogFactory>>().is_some());
        let store = resolver.resolve(names::STORE).await.unwrap();
        assert!(store.get::<Arc<dyn StoreFactory>>().is_some());
        let storage = resolver.resolve(names::MEMORY_STORAGE).await.unwrap();
        assert!(storage.get::<StorageConstructor>().is_some());
    }

    #[tokio::test]
    async fn fixture_loader_serves_libraries() {
        let loader = fixture_loader();
        let log = loader.load(names::LOG).await.unwrap();
        assert!(log.get::<Arc<dyn LogFactory>>().is_some());
    }
}
