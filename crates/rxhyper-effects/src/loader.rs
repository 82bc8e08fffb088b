//! Builtin module loader
//!
//! Static registry of capability providers keyed by module specifier. The
//! host may register additional providers, for example the log and store
//! libraries, before handing the loader to the shared configuration.

use async_trait::async_trait;
use rxhyper_core::{
    is_remote_specifier, names, Buffers, Capability, ModuleLoader, Pipeline, RuntimeSettings,
    RxError, RxResult, StorageBackend, StorageConstructor, ValueCodec,
};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::buffer::HexBuffers;
use crate::codec::StandardCodec;
use crate::pipeline::TokioPipeline;
use crate::storage::MemoryStorage;

/// Produces a fresh capability for a specifier
pub type Provider = Arc<dyn Fn() -> Capability + Send + Sync>;

/// Module loader backed by a static provider table
#[derive(Clone)]
pub struct BuiltinLoader {
    providers: HashMap<String, Provider>,
    reject_remote: bool,
}

impl BuiltinLoader {
    /// Loader with the default pipeline, codec, buffer, and memory providers
    pub fn new() -> Self {
        Self {
            providers: HashMap::new(),
            reject_remote: true,
        }
        .with_provider(names::PIPELINE, || {
            Capability::new(Arc::new(TokioPipeline::new()) as Arc<dyn Pipeline>)
        })
        .with_provider(names::CODEC, || {
            Capability::new(Arc::new(StandardCodec::new()) as Arc<dyn ValueCodec>)
        })
        .with_provider(names::BUFFER, || {
            Capability::new(Arc::new(HexBuffers::new()) as Arc<dyn Buffers>)
        })
        .with_provider(names::MEMORY_STORAGE, || {
            let construct: StorageConstructor =
                Arc::new(|| Arc::new(MemoryStorage::new()) as Arc<dyn StorageBackend>);
            Capability::new(construct)
        })
    }

    /// Default loader honouring `reject_remote_modules`
    pub fn from_settings(settings: &RuntimeSettings) -> Self {
        let mut loader = Self::new();
        loader.reject_remote = settings.reject_remote_modules;
        loader
    }

    /// Register or replace the provider for `specifier`
    pub fn with_provider<F>(mut self, specifier: impl Into<String>, provider: F) -> Self
    where
        F: Fn() -> Capability + Send + Sync + 'static,
    {
        self.providers.insert(specifier.into(), Arc::new(provider));
        self
    }

    /// Sorted registered specifiers
    pub fn specifiers(&self) -> Vec<String> {
        let mut specifiers: Vec<_> = self.providers.keys().cloned().collect();
        specifiers.sort();
        specifiers
    }
}

impl Default for BuiltinLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for BuiltinLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuiltinLoader")
            .field("specifiers", &self.specifiers())
            .field("reject_remote", &self.reject_remote)
            .finish()
    }
}

#[async_trait]
impl ModuleLoader for BuiltinLoader {
    async fn load(&self, specifier: &str) -> RxResult<Capability> {
        if self.reject_remote && is_remote_specifier(specifier) {
            return Err(RxError::usage(format!(
                "Remote module '{specifier}' cannot be loaded by the builtin loader"
            )));
        }
        match self.providers.get(specifier) {
            Some(provider) => {
                debug!(specifier, "Loading builtin module");
                Ok(provider())
            }
            None => Err(RxError::not_found(format!("No builtin module '{specifier}'"))),
        }
    }
}
