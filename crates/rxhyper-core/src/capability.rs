//! Capabilities and their resolution records
//!
//! A capability is an external dependency resolved by name: the pipeline
//! runtime, the value codec, buffer utilities, a storage backend, or the log
//! and store libraries. Values are type-erased so the configuration can carry
//! any implementation the host chooses.

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use crate::errors::RxResult;

/// Well-known capability names
pub mod names {
    /// Task spawning and timers backing the reactive pipeline
    pub const PIPELINE: &str = "pipeline";
    /// Block value codec
    pub const CODEC: &str = "codec";
    /// Byte buffer utilities
    pub const BUFFER: &str = "buffer";
    /// Default in-memory storage backend
    pub const MEMORY_STORAGE: &str = "memory";
    /// Replicated log library constructor
    pub const LOG: &str = "log";
    /// Multi-log store library constructor
    pub const STORE: &str = "store";
}

/// A resolved, type-erased capability value.
///
/// An empty capability stands in for an optional dependency that failed to
/// resolve.
#[derive(Clone, Default)]
pub struct Capability(Option<Arc<dyn Any + Send + Sync>>);

impl Capability {
    /// Wrap a concrete value
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Some(Arc::new(value)))
    }

    /// The empty capability
    pub fn empty() -> Self {
        Self(None)
    }

    /// Whether this capability carries no value
    pub fn is_empty(&self) -> bool {
        self.0.is_none()
    }

    /// Clone out the value if it has type `T`.
    ///
    /// Trait-object capabilities are stored as `Arc<dyn Trait>`, so callers
    /// ask for `get::<Arc<dyn Trait>>()`.
    pub fn get<T: Any + Clone>(&self) -> Option<T> {
        self.0.as_ref()?.downcast_ref::<T>().cloned()
    }

    /// Whether both handles point at the same value
    pub fn ptr_eq(&self, other: &Capability) -> bool {
        match (&self.0, &other.0) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        }
    }
}

impl fmt::Debug for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            f.write_str("Capability(empty)")
        } else {
            f.write_str("Capability(..)")
        }
    }
}

/// Boxed resolver function stored in a record
pub type ResolveFn = Arc<dyn Fn() -> BoxFuture<'static, RxResult<Capability>> + Send + Sync>;

#[derive(Clone)]
enum RecordSource {
    Resolver(ResolveFn),
    Module(String),
}

/// How to obtain a capability, and whether failing to do so is fatal.
#[derive(Clone)]
pub struct CapabilityRecord {
    source: RecordSource,
    optional: bool,
}

impl CapabilityRecord {
    /// Record backed by an async resolver function
    pub fn new<F, Fut>(resolve: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = RxResult<Capability>> + Send + 'static,
    {
        Self {
            source: RecordSource::Resolver(Arc::new(move || resolve().boxed())),
            optional: false,
        }
    }

    /// Record that always yields an already constructed value
    pub fn value<T: Any + Send + Sync>(value: T) -> Self {
        let capability = Capability::new(value);
        Self::new(move || {
            let capability = capability.clone();
            async move { Ok(capability) }
        })
    }

    /// Record resolved through whichever module loader is configured at
    /// resolution time
    pub fn module(specifier: impl Into<String>) -> Self {
        Self {
            source: RecordSource::Module(specifier.into()),
            optional: false,
        }
    }

    /// Mark the record optional
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Whether a resolution failure degrades to an empty capability
    pub fn is_optional(&self) -> bool {
        self.optional
    }

    /// Module specifier, for loader-backed records
    pub fn specifier(&self) -> Option<&str> {
        match &self.source {
            RecordSource::Module(specifier) => Some(specifier),
            RecordSource::Resolver(_) => None,
        }
    }

    /// Run the resolver; loader-backed records use `loader`
    pub async fn resolve(&self, loader: &dyn ModuleLoader) -> RxResult<Capability> {
        match &self.source {
            RecordSource::Resolver(resolve) => resolve().await,
            RecordSource::Module(specifier) => loader.load(specifier).await,
        }
    }
}

impl fmt::Debug for CapabilityRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilityRecord")
            .field("specifier", &self.specifier())
            .field("optional", &self.optional)
            .finish()
    }
}

/// Module-loading strategy supplied through configuration
#[async_trait]
pub trait ModuleLoader: Send + Sync {
    /// Load the module named by `specifier` as a capability
    async fn load(&self, specifier: &str) -> RxResult<Capability>;
}

/// Whether a specifier names a remote module (`scheme://...`)
pub fn is_remote_specifier(specifier: &str) -> bool {
    match specifier.split_once("://") {
        Some((scheme, rest)) => {
            !scheme.is_empty()
                && !rest.is_empty()
                && scheme
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::RxError;

    struct RefusingLoader;

    #[async_trait]
    impl ModuleLoader for RefusingLoader {
        async fn load(&self, specifier: &str) -> RxResult<Capability> {
            Err(RxError::not_found(specifier.to_string()))
        }
    }

    #[test]
    fn typed_access() {
        let cap = Capability::new(42u32);
        assert_eq!(cap.get::<u32>(), Some(42));
        assert_eq!(cap.get::<u64>(), None);
        assert!(Capability::empty().get::<u32>().is_none());
    }

    #[test]
    fn trait_object_capability() {
        let shared: Arc<dyn Fn() -> u8 + Send + Sync> = Arc::new(|| 7);
        let cap = Capability::new(shared);
        let f = cap.get::<Arc<dyn Fn() -> u8 + Send + Sync>>().unwrap();
        assert_eq!(f(), 7);
    }

    #[tokio::test]
    async fn value_record_resolves_same_instance() {
        let record = CapabilityRecord::value(String::from("codec"));
        let a = record.resolve(&RefusingLoader).await.unwrap();
        let b = record.resolve(&RefusingLoader).await.unwrap();
        assert!(a.ptr_eq(&b));
    }

    #[tokio::test]
    async fn module_record_uses_loader() {
        let record = CapabilityRecord::module("nothing-here").optional();
        assert!(record.is_optional());
        assert_eq!(record.specifier(), Some("nothing-here"));
        assert!(record.resolve(&RefusingLoader).await.is_err());
    }

    #[test]
    fn remote_specifiers() {
        assert!(is_remote_specifier("https://esm.run/rxjs"));
        assert!(is_remote_specifier("file:///tmp/module"));
        assert!(!is_remote_specifier("codec"));
        assert!(!is_remote_specifier("://broken"));
    }
}
