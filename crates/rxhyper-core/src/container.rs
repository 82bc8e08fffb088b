//! Subsystem Context container
//!
//! An immutable bundle of named capabilities. Derived subsystems build a child
//! container on top of their parent's; lookups fall back to the parent. Once
//! built a container is never mutated, so it can be shared freely by `Arc`.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::capability::Capability;
use crate::errors::{RxError, RxResult};

/// Immutable named-capability bundle
#[derive(Clone, Default)]
pub struct Container {
    subsystem: String,
    entries: Arc<HashMap<String, Capability>>,
    parent: Option<Arc<Container>>,
}

impl Container {
    /// Start building a container for `subsystem`
    pub fn builder(subsystem: impl Into<String>) -> ContainerBuilder {
        ContainerBuilder {
            subsystem: subsystem.into(),
            entries: HashMap::new(),
            parent: None,
        }
    }

    /// Name of the owning subsystem
    pub fn subsystem(&self) -> &str {
        &self.subsystem
    }

    /// Parent container, if derived
    pub fn parent(&self) -> Option<&Arc<Container>> {
        self.parent.as_ref()
    }

    /// Raw capability lookup, falling back to the parent
    pub fn capability(&self, name: &str) -> Option<Capability> {
        match self.entries.get(name) {
            Some(capability) => Some(capability.clone()),
            None => self.parent.as_ref()?.capability(name),
        }
    }

    /// Typed lookup
    pub fn get<T: std::any::Any + Clone>(&self, name: &str) -> Option<T> {
        self.capability(name)?.get::<T>()
    }

    /// Typed lookup that fails with a usage error when absent or mistyped
    pub fn require<T: std::any::Any + Clone>(&self, name: &str) -> RxResult<T> {
        self.get::<T>(name).ok_or_else(|| {
            RxError::usage(format!(
                "Capability '{name}' is not available in the '{}' container",
                self.subsystem
            ))
        })
    }

    /// Whether `name` is present here or in a parent
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
            || self
                .parent
                .as_ref()
                .map(|parent| parent.contains(name))
                .unwrap_or(false)
    }

    /// Sorted names visible from this container
    pub fn names(&self) -> Vec<String> {
        let mut names = self
            .parent
            .as_ref()
            .map(|parent| parent.names())
            .unwrap_or_default();
        for name in self.entries.keys() {
            if !names.contains(name) {
                names.push(name.clone());
            }
        }
        names.sort();
        names
    }
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Container")
            .field("subsystem", &self.subsystem)
            .field("names", &self.names())
            .finish()
    }
}

/// Builder for [`Container`]
#[derive(Debug)]
pub struct ContainerBuilder {
    subsystem: String,
    entries: HashMap<String, Capability>,
    parent: Option<Arc<Container>>,
}

impl ContainerBuilder {
    /// Derive from `parent`
    pub fn child_of(mut self, parent: Arc<Container>) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Add a concrete value
    pub fn value<T: std::any::Any + Send + Sync>(self, name: impl Into<String>, value: T) -> Self {
        self.capability(name, Capability::new(value))
    }

    /// Add a resolved capability
    pub fn capability(mut self, name: impl Into<String>, capability: Capability) -> Self {
        self.entries.insert(name.into(), capability);
        self
    }

    /// Freeze the container
    pub fn build(self) -> Container {
        Container {
            subsystem: self.subsystem,
            entries: Arc::new(self.entries),
            parent: self.parent,
        }
    }
}
