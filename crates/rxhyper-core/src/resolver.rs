//! Capability Resolver
//!
//! Resolves named capabilities through the records held by the shared
//! configuration. Failure of a non-optional capability is fatal; failure of an
//! optional one yields [`Capability::empty`].

use futures::future::try_join_all;
use tracing::{debug, warn};

use crate::capability::Capability;
use crate::configuration::SharedConfiguration;
use crate::errors::{RxError, RxResult};

/// Resolves capabilities against a [`SharedConfiguration`]
#[derive(Debug, Clone)]
pub struct CapabilityResolver {
    config: SharedConfiguration,
}

impl CapabilityResolver {
    /// Resolver over `config`
    pub fn new(config: SharedConfiguration) -> Self {
        Self { config }
    }

    /// The configuration this resolver reads
    pub fn configuration(&self) -> &SharedConfiguration {
        &self.config
    }

    /// Resolve one capability, consulting the cache first
    pub async fn resolve(&self, name: &str) -> RxResult<Capability> {
        if let Some(capability) = self.config.resolved(name) {
            return Ok(capability);
        }

        let Some(record) = self.config.record(name) else {
            return Err(RxError::resolution(name, "no dependency record registered"));
        };

        let loader = self.config.loader();
        match record.resolve(loader.as_ref()).await {
            Ok(capability) => {
                debug!(capability = name, "Capability resolved");
                Ok(self.config.cache(name, capability))
            }
            Err(err) if record.is_optional() => {
                warn!(
                    capability = name,
                    error = %err,
                    "Optional capability unavailable, continuing without it"
                );
                Ok(Capability::empty())
            }
            Err(err) => Err(match err {
                RxError::Resolution { .. } => err,
                other => RxError::resolution(name, other.to_string()),
            }),
        }
    }

    /// Resolve several capabilities concurrently, in input order
    pub async fn resolve_all(&self, names: &[&str]) -> RxResult<Vec<Capability>> {
        try_join_all(names.iter().map(|name| self.resolve(name))).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use crate::capability::{CapabilityRecord, ModuleLoader};
    use crate::configuration::ConfigOverrides;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingLoader {
        loads: AtomicUsize,
    }

    #[async_trait]
    impl ModuleLoader for CountingLoader {
        async fn load(&self, specifier: &str) -> RxResult<Capability> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            match specifier {
                "memory" => Err(RxError::not_found("memory")),
                other => Ok(Capability::new(other.to_string())),
            }
        }
    }

    fn resolver() -> (CapabilityResolver, Arc<CountingLoader>) {
        let loader = Arc::new(CountingLoader {
            loads: AtomicUsize::new(0),
        });
        let config = SharedConfiguration::new(loader.clone());
        (CapabilityResolver::new(config), loader)
    }

    #[tokio::test]
    async fn resolves_through_loader_and_caches() {
        let (resolver, loader) = resolver();
        let first = resolver.resolve("codec").await.unwrap();
        let second = resolver.resolve("codec").await.unwrap();

        assert_eq!(first.get::<String>().as_deref(), Some("codec"));
        assert!(first.ptr_eq(&second));
        assert_eq!(loader.loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn optional_failure_degrades_to_empty() {
        let (resolver, _) = resolver();
        let storage = resolver.resolve("memory").await.unwrap();
        assert!(storage.is_empty());
        assert!(resolver.configuration().resolved("memory").is_none());
    }

    #[tokio::test]
    async fn required_failure_is_resolution_error() {
        let (resolver, _) = resolver();
        resolver.configuration().merge(ConfigOverrides::new().dependency(
            "codec",
            CapabilityRecord::new(|| async { Err(RxError::not_found("codec module")) }),
        ));

        let err = resolver.resolve("codec").await.unwrap_err();
        assert_matches!(err, RxError::Resolution { ref name, .. } if name == "codec");
    }

    #[tokio::test]
    async fn unknown_name_is_resolution_error() {
        let (resolver, _) = resolver();
        let err = resolver.resolve("nope").await.unwrap_err();
        assert_matches!(err, RxError::Resolution { .. });
    }

    #[tokio::test]
    async fn override_after_resolution_does_not_replace_cache() {
        let (resolver, _) = resolver();
        resolver.resolve("buffer").await.unwrap();
        resolver.configuration().merge(
            ConfigOverrides::new().dependency("buffer", CapabilityRecord::value(99u32)),
        );

        let cached = resolver.resolve("buffer").await.unwrap();
        assert_eq!(cached.get::<String>().as_deref(), Some("buffer"));
    }

    #[tokio::test]
    async fn resolve_all_preserves_order() {
        let (resolver, _) = resolver();
        let caps = resolver
            .resolve_all(&["pipeline", "codec", "memory"])
            .await
            .unwrap();
        assert_eq!(caps[0].get::<String>().as_deref(), Some("pipeline"));
        assert_eq!(caps[1].get::<String>().as_deref(), Some("codec"));
        assert!(caps[2].is_empty());
    }
}
