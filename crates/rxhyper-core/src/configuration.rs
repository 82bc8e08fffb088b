//! Shared Configuration
//!
//! The process-wide mapping from capability name to resolution record, the
//! cache of already resolved capabilities, and the module-loading strategy.
//! One instance is created by the host and shared by reference with every
//! subsystem initializer. It only ever grows: overrides are merged key by key
//! (last write wins) and nothing is removed.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::capability::{names, Capability, CapabilityRecord, ModuleLoader};
use crate::effects::{StorageBackend, StorageConstructor};
use crate::errors::{RxError, RxResult};
use crate::settings::RuntimeSettings;

/// Turns the resolved default-storage capability into a storage backend
pub type MakeFile = Arc<dyn Fn(&Capability) -> RxResult<Arc<dyn StorageBackend>> + Send + Sync>;

/// Default `make_file`: call a [`StorageConstructor`] capability, or share a
/// backend capability as is
pub fn default_make_file() -> MakeFile {
    Arc::new(|capability: &Capability| {
        if let Some(construct) = capability.get::<StorageConstructor>() {
            return Ok(construct());
        }
        capability
            .get::<Arc<dyn StorageBackend>>()
            .ok_or_else(|| RxError::usage("Default storage capability is not a storage backend"))
    })
}

/// Caller-supplied modifications merged on every initialize call
#[derive(Clone, Default)]
pub struct ConfigOverrides {
    dependencies: HashMap<String, CapabilityRecord>,
    resolved: HashMap<String, Capability>,
    settings: Option<RuntimeSettings>,
    loader: Option<Arc<dyn ModuleLoader>>,
    make_file: Option<MakeFile>,
}

impl ConfigOverrides {
    /// Empty overrides
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace a dependency record
    pub fn dependency(mut self, name: impl Into<String>, record: CapabilityRecord) -> Self {
        self.dependencies.insert(name.into(), record);
        self
    }

    /// Seed an already resolved capability
    pub fn resolved(mut self, name: impl Into<String>, capability: Capability) -> Self {
        self.resolved.insert(name.into(), capability);
        self
    }

    /// Replace the runtime settings
    pub fn settings(mut self, settings: RuntimeSettings) -> Self {
        self.settings = Some(settings);
        self
    }

    /// Replace the module loader
    pub fn loader(mut self, loader: Arc<dyn ModuleLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    /// Replace how the default storage capability becomes a backend
    pub fn make_file(mut self, make_file: MakeFile) -> Self {
        self.make_file = Some(make_file);
        self
    }

    /// Whether nothing would change on merge
    pub fn is_empty(&self) -> bool {
        self.dependencies.is_empty()
            && self.resolved.is_empty()
            && self.settings.is_none()
            && self.loader.is_none()
            && self.make_file.is_none()
    }
}

impl From<RuntimeSettings> for ConfigOverrides {
    fn from(settings: RuntimeSettings) -> Self {
        Self::new().settings(settings)
    }
}

impl fmt::Debug for ConfigOverrides {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut dependencies: Vec<_> = self.dependencies.keys().collect();
        dependencies.sort();
        f.debug_struct("ConfigOverrides")
            .field("dependencies", &dependencies)
            .field("resolved", &self.resolved.len())
            .field("settings", &self.settings)
            .field("loader", &self.loader.is_some())
            .field("make_file", &self.make_file.is_some())
            .finish()
    }
}

struct ConfigurationState {
    dependencies: HashMap<String, CapabilityRecord>,
    resolved: HashMap<String, Capability>,
    settings: RuntimeSettings,
    loader: Arc<dyn ModuleLoader>,
    make_file: MakeFile,
}

/// Shared, merge-only configuration handle
#[derive(Clone)]
pub struct SharedConfiguration {
    inner: Arc<RwLock<ConfigurationState>>,
}

impl SharedConfiguration {
    /// Configuration with the default base records, resolved through `loader`
    pub fn new(loader: Arc<dyn ModuleLoader>) -> Self {
        let settings = RuntimeSettings::default();
        let mut dependencies = HashMap::new();
        dependencies.insert(
            names::PIPELINE.to_string(),
            CapabilityRecord::module(names::PIPELINE),
        );
        dependencies.insert(names::CODEC.to_string(), CapabilityRecord::module(names::CODEC));
        dependencies.insert(
            names::BUFFER.to_string(),
            CapabilityRecord::module(names::BUFFER),
        );
        dependencies.insert(
            names::MEMORY_STORAGE.to_string(),
            CapabilityRecord::module(names::MEMORY_STORAGE).optional(),
        );

        Self {
            inner: Arc::new(RwLock::new(ConfigurationState {
                dependencies,
                resolved: HashMap::new(),
                settings,
                loader,
                make_file: default_make_file(),
            })),
        }
    }

    /// Merge overrides, key by key
    pub fn merge(&self, overrides: ConfigOverrides) {
        if overrides.is_empty() {
            return;
        }
        let mut state = self.inner.write();
        state.dependencies.extend(overrides.dependencies);
        state.resolved.extend(overrides.resolved);
        if let Some(settings) = overrides.settings {
            state.settings = settings;
        }
        if let Some(loader) = overrides.loader {
            state.loader = loader;
        }
        if let Some(make_file) = overrides.make_file {
            state.make_file = make_file;
        }
    }

    /// Register a record unless one already exists under `name`
    pub fn register_if_absent(&self, name: &str, record: CapabilityRecord) {
        self.inner
            .write()
            .dependencies
            .entry(name.to_string())
            .or_insert(record);
    }

    /// Record registered under `name`
    pub fn record(&self, name: &str) -> Option<CapabilityRecord> {
        self.inner.read().dependencies.get(name).cloned()
    }

    /// Cached capability under `name`
    pub fn resolved(&self, name: &str) -> Option<Capability> {
        self.inner.read().resolved.get(name).cloned()
    }

    /// Cache a resolved capability; an existing entry wins
    pub fn cache(&self, name: &str, capability: Capability) -> Capability {
        self.inner
            .write()
            .resolved
            .entry(name.to_string())
            .or_insert(capability)
            .clone()
    }

    /// Current module loader
    pub fn loader(&self) -> Arc<dyn ModuleLoader> {
        self.inner.read().loader.clone()
    }

    /// Current storage factory hook
    pub fn make_file(&self) -> MakeFile {
        self.inner.read().make_file.clone()
    }

    /// Snapshot of the runtime settings
    pub fn settings(&self) -> RuntimeSettings {
        self.inner.read().settings.clone()
    }

    /// Sorted names of every registered record
    pub fn dependency_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.inner.read().dependencies.keys().cloned().collect();
        names.sort();
        names
    }
}

impl fmt::Debug for SharedConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.read();
        f.debug_struct("SharedConfiguration")
            .field("dependencies", &state.dependencies.len())
            .field("resolved", &state.resolved.len())
            .field("settings", &state.settings)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct NullLoader;

    #[async_trait]
    impl ModuleLoader for NullLoader {
        async fn load(&self, specifier: &str) -> RxResult<Capability> {
            Err(RxError::not_found(specifier.to_string()))
        }
    }

    #[test]
    fn default_records() {
        let config = SharedConfiguration::new(Arc::new(NullLoader));
        assert_eq!(
            config.dependency_names(),
            vec!["buffer", "codec", "memory", "pipeline"]
        );
        assert!(config.record("memory").unwrap().is_optional());
        assert!(!config.record("codec").unwrap().is_optional());
    }

    #[test]
    fn merge_is_last_write_wins_and_never_removes() {
        let config = SharedConfiguration::new(Arc::new(NullLoader));
        config.merge(
            ConfigOverrides::new().dependency("codec", CapabilityRecord::value(1u8).optional()),
        );
        config.merge(ConfigOverrides::new().dependency("extra", CapabilityRecord::value(2u8)));

        assert!(config.record("codec").unwrap().is_optional());
        assert!(config.record("extra").is_some());
        assert!(config.record("pipeline").is_some());
    }

    #[test]
    fn register_if_absent_keeps_existing() {
        let config = SharedConfiguration::new(Arc::new(NullLoader));
        config.merge(ConfigOverrides::new().dependency("log", CapabilityRecord::value(1u8)));
        config.register_if_absent("log", CapabilityRecord::module("log"));
        assert_eq!(config.record("log").unwrap().specifier(), None);

        config.register_if_absent("store", CapabilityRecord::module("store"));
        assert_eq!(config.record("store").unwrap().specifier(), Some("store"));
    }

    #[test]
    fn cache_keeps_first_value() {
        let config = SharedConfiguration::new(Arc::new(NullLoader));
        let first = config.cache("codec", Capability::new(1u8));
        let second = config.cache("codec", Capability::new(2u8));
        assert!(first.ptr_eq(&second));
        assert_eq!(config.resolved("codec").unwrap().get::<u8>(), Some(1));
    }

    struct NoFiles;

    impl StorageBackend for NoFiles {
        fn open(&self, name: &str) -> RxResult<Arc<dyn crate::effects::BlockFile>> {
            Err(RxError::storage(format!("cannot open {name}")))
        }
    }

    #[test]
    fn make_file_accepts_constructors_and_backends() {
        let make_file = default_make_file();

        let shared: Arc<dyn StorageBackend> = Arc::new(NoFiles);
        let backend = make_file(&Capability::new(shared.clone())).unwrap();
        assert!(Arc::ptr_eq(&backend, &shared));

        let construct: StorageConstructor = Arc::new(|| Arc::new(NoFiles) as Arc<dyn StorageBackend>);
        let first = make_file(&Capability::new(construct.clone())).unwrap();
        let second = make_file(&Capability::new(construct)).unwrap();
        assert!(!Arc::ptr_eq(&first, &second));

        assert!(make_file(&Capability::new(1u8)).is_err());
        assert!(make_file(&Capability::empty()).is_err());
    }

    #[test]
    fn settings_override() {
        let config = SharedConfiguration::new(Arc::new(NullLoader));
        let settings = RuntimeSettings {
            event_buffer: 4,
            ..RuntimeSettings::default()
        };
        config.merge(settings.into());
        assert_eq!(config.settings().event_buffer, 4);
    }
}
